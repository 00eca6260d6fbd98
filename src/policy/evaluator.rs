//! The policy evaluator: one tool call in, exactly one decision out.

use super::{PolicyError, arbiter, pattern, semantic};
use crate::audit::{AuditLog, EvaluationTrace};
use crate::config::Settings;
use crate::llm::{DecisionProvider, EmbeddingProvider};
use crate::rules::{Decision, RuleKind, RuleStore};

use std::sync::Arc;
use std::time::Instant;

/// One tool call to evaluate.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub tool_name: String,
    pub tool_input: String,
    /// Caller-supplied justification, forwarded to arbitration. Soft rules
    /// honor a recognized override token here; hard rules ignore it.
    pub justification: Option<String>,
}

/// Sequences pattern check → semantic retrieval → arbitration.
///
/// Fast pattern rules short-circuit: a direct match never reaches a
/// provider. Everything past the pattern check runs under the evaluation
/// timeout, and any failure there resolves to the fail-closed block outcome,
/// since silently allowing a blocked action is the unsafe direction.
pub struct PolicyEvaluator {
    store: RuleStore,
    embedder: Arc<dyn EmbeddingProvider>,
    decider: Arc<dyn DecisionProvider>,
    audit: AuditLog,
    settings: Settings,
}

struct EvalOutcome {
    decision: Decision,
    rules_checked: i64,
    matched_ids: Vec<i64>,
    llm_prompt: Option<String>,
    llm_response: Option<String>,
}

impl PolicyEvaluator {
    pub fn new(
        store: RuleStore,
        embedder: Arc<dyn EmbeddingProvider>,
        decider: Arc<dyn DecisionProvider>,
        audit: AuditLog,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            embedder,
            decider,
            audit,
            settings,
        }
    }

    /// Evaluate one tool call. Always yields exactly one decision; internal
    /// failures surface as a block with a rule-check-error comment, never as
    /// a silent allow.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Decision {
        let started = Instant::now();

        let (decision, rules_checked, matched_ids, llm_prompt, llm_response) =
            match self.evaluate_inner(request).await {
                Ok(outcome) => (
                    outcome.decision,
                    outcome.rules_checked,
                    outcome.matched_ids,
                    outcome.llm_prompt,
                    outcome.llm_response,
                ),
                Err(error) => {
                    tracing::error!(%error, tool = %request.tool_name, "rule check failed, failing closed");
                    let decision =
                        Decision::block(format!("Rule check error: {error} (failing closed)"));
                    (decision, 0, Vec::new(), None, None)
                }
            };

        let action_label = decision.action.to_string();
        let trace = EvaluationTrace {
            tool_name: &request.tool_name,
            tool_input: &request.tool_input,
            rules_checked,
            matched_rule_ids: &matched_ids,
            decision: &action_label,
            reason: &decision.comment,
            llm_prompt: llm_prompt.as_deref(),
            llm_response: llm_response.as_deref(),
            duration_ms: started.elapsed().as_millis() as i64,
        };
        if let Err(error) = self.audit.record_evaluation(&trace).await {
            tracing::warn!(%error, "failed to record evaluation trace");
        }

        decision
    }

    async fn evaluate_inner(&self, request: &EvaluationRequest) -> Result<EvalOutcome, PolicyError> {
        let pattern_rules = self
            .store
            .list_active(Some(&request.tool_name), Some(RuleKind::Pattern))
            .await?;
        let check = pattern::check_rules(&pattern_rules, &request.tool_input);

        for rule_id in &check.logged_ids {
            tracing::info!(rule_id, tool = %request.tool_name, "log rule matched");
        }

        // Direct pattern match short-circuits the pipeline entirely.
        if !check.passed {
            return Ok(EvalOutcome {
                decision: Decision {
                    approved: false,
                    action: check.action,
                    comment: check.comment,
                },
                rules_checked: check.rules_checked as i64,
                matched_ids: check.matched_ids,
                llm_prompt: None,
                llm_response: None,
            });
        }

        // Everything network-bound runs under one deadline: the caller
        // blocks the agent's tool execution on this result.
        let phase = self.semantic_and_arbitration(request, check.deferred);
        let (scan_checked, candidate_ids, exchange) =
            tokio::time::timeout(self.settings.eval_timeout, phase)
                .await
                .map_err(|_| PolicyError::Timeout)??;

        let rules_checked = (check.rules_checked + scan_checked) as i64;

        let Some(exchange) = exchange else {
            return Ok(EvalOutcome {
                decision: Decision::allow("No applicable rules"),
                rules_checked,
                matched_ids: Vec::new(),
                llm_prompt: None,
                llm_response: None,
            });
        };

        // The arbitration decision is adopted verbatim; matched ids are
        // whatever rules its comment names, falling back to the candidates.
        let mut matched_ids = extract_rule_ids(&exchange.value.comment);
        if matched_ids.is_empty() && !exchange.value.approved {
            matched_ids = candidate_ids;
        }

        Ok(EvalOutcome {
            decision: exchange.value.clone(),
            rules_checked,
            matched_ids,
            llm_prompt: Some(exchange.prompt),
            llm_response: Some(exchange.response),
        })
    }

    async fn semantic_and_arbitration(
        &self,
        request: &EvaluationRequest,
        deferred: Vec<super::ReviewCandidate>,
    ) -> Result<
        (
            usize,
            Vec<i64>,
            Option<crate::llm::Exchange<Decision>>,
        ),
        PolicyError,
    > {
        let scan = semantic::find_candidates(
            &self.store,
            self.embedder.as_ref(),
            &request.tool_name,
            &request.tool_input,
            self.settings.vector_top_k,
            self.settings.distance_threshold,
        )
        .await?;

        // Earliest-added first: pattern-deferred, then semantic.
        let mut candidates = deferred;
        candidates.extend(scan.candidates);
        let candidate_ids: Vec<i64> = candidates
            .iter()
            .take(self.settings.arbitration_rule_cap)
            .map(|candidate| candidate.rule_id)
            .collect();

        let exchange = arbiter::arbitrate(
            self.decider.as_ref(),
            &self.settings,
            &request.tool_name,
            &request.tool_input,
            request.justification.as_deref(),
            &candidates,
        )
        .await?;

        Ok((scan.rules_checked, candidate_ids, exchange))
    }
}

impl std::fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEvaluator").finish_non_exhaustive()
    }
}

/// Pull rule ids out of a comment like `[BLOCK #5] ...`.
pub fn extract_rule_ids(comment: &str) -> Vec<i64> {
    let regex = match regex::Regex::new(r"#(\d+)") {
        Ok(regex) => regex,
        Err(_) => return Vec::new(),
    };
    regex
        .captures_iter(comment)
        .filter_map(|capture| capture.get(1))
        .filter_map(|digits| digits.as_str().parse().ok())
        .collect()
}
