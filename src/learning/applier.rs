//! Applying proposed rule changes to the store.

use crate::llm::EmbeddingProvider;
use crate::rules::{
    ChangeAction, NewRule, RuleChange, RuleError, RulePatch, RuleStore,
};

/// Aggregate result of applying one change list.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    /// One line per proposal: what happened, or why it was skipped/failed.
    pub outcomes: Vec<String>,
}

/// Apply proposed changes in list order.
///
/// Each change is fault-isolated: a failure is recorded and the loop moves
/// on, so one malformed proposal never discards the rest. Partial
/// application is expected.
pub async fn apply_changes(
    store: &RuleStore,
    embedder: &dyn EmbeddingProvider,
    changes: &[RuleChange],
    session_id: Option<i64>,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for change in changes {
        let outcome = apply_one(store, embedder, change, session_id).await;
        match outcome {
            Ok(line) => {
                match change.action {
                    ChangeAction::Create => report.created += 1,
                    ChangeAction::Update => report.updated += 1,
                    ChangeAction::Delete => report.deleted += 1,
                }
                report.outcomes.push(line);
            }
            Err(error) => {
                tracing::warn!(%error, action = %change.action, "failed to apply rule change");
                report.outcomes.push(format!("error ({}): {error}", change.action));
            }
        }
    }

    report
}

async fn apply_one(
    store: &RuleStore,
    embedder: &dyn EmbeddingProvider,
    change: &RuleChange,
    session_id: Option<i64>,
) -> Result<String, RuleError> {
    match change.action {
        ChangeAction::Create => {
            let patterns_json = change
                .patterns
                .as_ref()
                .map(|patterns| serde_json::to_string(patterns).unwrap_or_default());

            let id = store
                .insert(&NewRule {
                    kind: change.kind,
                    pattern: change.pattern.clone(),
                    patterns: patterns_json,
                    description: change.description.clone().unwrap_or_default(),
                    problem: change.problem.clone(),
                    solution: change.solution.clone(),
                    tool: change.tool.clone(),
                    action: change.rule_action,
                    priority: 0,
                    requires_review: change.requires_review.unwrap_or(false),
                    review_prompt: change.review_prompt.clone(),
                    hard: false,
                    source_session_id: session_id,
                })
                .await?;
            store.ensure_embedding(id, embedder).await?;
            Ok(format!("created rule #{id}"))
        }

        ChangeAction::Update => {
            let Some(rule_id) = change.rule_id else {
                return Ok("skipped update without rule id".into());
            };

            let patch = RulePatch {
                pattern: change.pattern.clone(),
                patterns: change
                    .patterns
                    .as_ref()
                    .map(|patterns| serde_json::to_string(patterns).unwrap_or_default()),
                description: change.description.clone(),
                problem: change.problem.clone(),
                solution: change.solution.clone(),
                action: change.rule_action,
                requires_review: change.requires_review,
                review_prompt: change.review_prompt.clone(),
            };
            store.update(rule_id, &patch).await?;

            // Text changes invalidate the stored vector; regenerate from the
            // updated row rather than patching in place.
            if patch.touches_embedding_text() {
                store.delete_embedding(rule_id).await?;
                store.ensure_embedding(rule_id, embedder).await?;
            }
            Ok(format!("updated rule #{rule_id}"))
        }

        ChangeAction::Delete => {
            let Some(rule_id) = change.rule_id else {
                return Ok("skipped delete without rule id".into());
            };
            store.delete(rule_id).await?;
            Ok(format!("deleted rule #{rule_id}"))
        }
    }
}
