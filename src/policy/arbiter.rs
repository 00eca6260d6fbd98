//! Arbitration: one consolidated model call for every ambiguous match.

use super::{ReviewCandidate, truncate_chars};
use crate::config::Settings;
use crate::llm::{DecisionProvider, Exchange, LlmError};
use crate::rules::Decision;

/// Resolve review candidates into a final decision with exactly one
/// structured model call, however many rules matched.
///
/// Candidates arrive earliest-added first: pattern-deferred matches, then
/// semantic candidates. Only the first `arbitration_rule_cap` are forwarded.
/// An empty candidate list short-circuits to approval without any network
/// call. The returned decision is adopted verbatim by the evaluator; the
/// hard/soft override policy lives in the provider's operating instructions,
/// not here.
pub async fn arbitrate(
    provider: &dyn DecisionProvider,
    settings: &Settings,
    tool_name: &str,
    tool_input: &str,
    justification: Option<&str>,
    candidates: &[ReviewCandidate],
) -> Result<Option<Exchange<Decision>>, LlmError> {
    if candidates.is_empty() {
        return Ok(None);
    }

    let prompt = build_prompt(settings, tool_name, tool_input, justification, candidates);
    let exchange = provider.decide(&prompt).await?;
    Ok(Some(exchange))
}

/// Render the arbitration prompt: tool, truncated input, optional
/// justification, and the compact rule list.
pub fn build_prompt(
    settings: &Settings,
    tool_name: &str,
    tool_input: &str,
    justification: Option<&str>,
    candidates: &[ReviewCandidate],
) -> String {
    let rules_block = build_rules_block(candidates, settings.arbitration_rule_cap);
    let input = truncate_chars(tool_input, settings.arbitration_input_chars);

    let justification_block = match justification {
        Some(justification) if !justification.is_empty() => {
            let truncated = truncate_chars(justification, settings.justification_chars);
            format!("\nJustification: {truncated}\n")
        }
        _ => String::new(),
    };

    format!(
        "Tool: {tool_name}\nInput: {input}\n{justification_block}\nRules:\n{rules_block}\n\nViolates any rule?"
    )
}

/// One compact line per rule, capped, tagged hard or soft.
pub fn build_rules_block(candidates: &[ReviewCandidate], cap: usize) -> String {
    let mut lines = Vec::new();
    for candidate in candidates.iter().take(cap) {
        let hard_label = if candidate.hard { "HARD" } else { "SOFT" };
        let mut line = format!(
            "- [{hard_label}] #{} ({}): {}",
            candidate.rule_id,
            candidate.action,
            truncate_chars(&candidate.description, 80),
        );
        if let Some(solution) = candidate.solution.as_deref()
            && !solution.is_empty()
        {
            line.push_str(&format!(" → {}", truncate_chars(solution, 60)));
        }
        if let Some(review_prompt) = candidate.review_prompt.as_deref()
            && !review_prompt.is_empty()
        {
            line.push_str(&format!("\n  Check: {}", truncate_chars(review_prompt, 100)));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CandidateSource;
    use crate::rules::{DecisionAction, RuleAction};

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(rule_id: i64, hard: bool) -> ReviewCandidate {
        ReviewCandidate {
            rule_id,
            description: format!("rule {rule_id} description"),
            problem: None,
            solution: Some("do the other thing".into()),
            action: RuleAction::Warn,
            review_prompt: None,
            hard,
            source: CandidateSource::Keyword,
            distance: 0.5,
        }
    }

    struct CountingDecider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DecisionProvider for CountingDecider {
        async fn decide(&self, prompt: &str) -> Result<Exchange<Decision>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Exchange {
                value: Decision::allow("no violation"),
                prompt: prompt.to_string(),
                response: "{}".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_short_circuit_without_network() {
        let provider = CountingDecider {
            calls: AtomicUsize::new(0),
        };
        let settings = Settings::default();

        let outcome = arbitrate(&provider, &settings, "Bash", "ls", None, &[])
            .await
            .expect("arbitrate");

        assert!(outcome.is_none(), "no rules means no arbitration outcome");
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            0,
            "no network call without candidates"
        );
    }

    #[tokio::test]
    async fn test_many_candidates_one_call_capped_at_five() {
        let provider = CountingDecider {
            calls: AtomicUsize::new(0),
        };
        let settings = Settings::default();
        let candidates: Vec<_> = (1..=8).map(|id| candidate(id, false)).collect();

        let outcome = arbitrate(&provider, &settings, "Bash", "ls", None, &candidates)
            .await
            .expect("arbitrate")
            .expect("exchange");

        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            1,
            "all candidates consolidate into a single call"
        );
        assert!(outcome.prompt.contains("#5"));
        assert!(
            !outcome.prompt.contains("#6"),
            "rules beyond the cap are dropped: {}",
            outcome.prompt
        );
    }

    #[test]
    fn test_rules_block_tags_hard_and_soft() {
        let block = build_rules_block(&[candidate(1, true), candidate(2, false)], 5);
        let lines: Vec<_> = block.lines().collect();
        assert!(lines[0].starts_with("- [HARD] #1"));
        assert!(lines[1].starts_with("- [SOFT] #2"));
        assert!(lines[0].contains("→ do the other thing"));
    }

    #[test]
    fn test_prompt_truncates_input_and_carries_justification() {
        let settings = Settings::default();
        let long_input = "x".repeat(2000);
        let prompt = build_prompt(
            &settings,
            "Bash",
            &long_input,
            Some("OVERRIDE: temporary migration shim"),
            &[candidate(1, false)],
        );

        assert!(prompt.contains("OVERRIDE: temporary migration shim"));
        let input_line = prompt
            .lines()
            .find(|line| line.starts_with("Input: "))
            .expect("input line");
        assert_eq!(input_line.len(), "Input: ".len() + 800, "input capped at 800 chars");
    }

    #[test]
    fn test_review_prompt_surfaces_as_check_line() {
        let mut with_guidance = candidate(3, false);
        with_guidance.review_prompt = Some("only flag outbound uploads".into());
        let block = build_rules_block(&[with_guidance], 5);
        assert!(block.contains("Check: only flag outbound uploads"));
    }

    #[tokio::test]
    async fn test_decision_is_adopted_verbatim() {
        struct Blocker;

        #[async_trait]
        impl DecisionProvider for Blocker {
            async fn decide(&self, prompt: &str) -> Result<Exchange<Decision>, LlmError> {
                Ok(Exchange {
                    value: Decision::block("[BLOCK #1] hard rule"),
                    prompt: prompt.to_string(),
                    response: "{}".into(),
                })
            }
        }

        let settings = Settings::default();
        let outcome = arbitrate(&Blocker, &settings, "Bash", "ls", None, &[candidate(1, true)])
            .await
            .expect("arbitrate")
            .expect("exchange");

        assert!(!outcome.value.approved);
        assert_eq!(outcome.value.action, DecisionAction::Block);
    }
}
