//! Rule-change extraction from conversation excerpts.

use super::LearningError;
use super::transcript::{self, TranscriptEntry};
use crate::config::Settings;
use crate::llm::{Exchange, ExtractionProvider};
use crate::rules::{ChangeSet, Rule, RuleStore};

/// Extract proposed rule changes from a transcript.
///
/// One structured model call: the active-rules snapshot (truncated) plus the
/// bounded conversation excerpt. The evidence contract (quote an actual
/// error and fix, or an explicit user directive, else propose nothing) is
/// carried by the extraction model's operating instructions.
pub async fn extract(
    provider: &dyn ExtractionProvider,
    store: &RuleStore,
    entries: &[TranscriptEntry],
    settings: &Settings,
) -> Result<Exchange<ChangeSet>, LearningError> {
    let rules = store.list_active(None, None).await?;
    let existing = render_existing_rules(&rules, settings.rules_snapshot_chars);
    let conversation = transcript::format_excerpt(
        entries,
        settings.excerpt_max_turns,
        settings.excerpt_max_chars,
        settings.excerpt_line_chars,
    );

    let prompt = build_prompt(&existing, &conversation);
    Ok(provider.extract(&prompt).await?)
}

/// Render the active rule set compactly for model context.
pub fn render_existing_rules(rules: &[Rule], max_chars: usize) -> String {
    if rules.is_empty() {
        return "(no rules yet)".into();
    }

    let mut text = String::new();
    for rule in rules {
        let scope = rule.tool.as_deref().unwrap_or("all tools");
        let mut line = format!(
            "#{} [{}/{}] {} ({scope})",
            rule.id, rule.kind, rule.action, rule.description
        );
        if let Some(solution) = rule.solution.as_deref()
            && !solution.is_empty()
        {
            line.push_str(&format!(" → {solution}"));
        }
        text.push_str(&line);
        text.push('\n');
    }

    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        return format!("{cut}\n... (truncated)");
    }
    text
}

/// The extraction user prompt.
pub fn build_prompt(existing_rules: &str, conversation: &str) -> String {
    format!(
        "Analyze this conversation and extract rule changes.\n\n\
         EXISTING RULES:\n{existing_rules}\n\n\
         CONVERSATION:\n{conversation}\n\n\
         What rules should be created, updated, or deleted?"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::learning::transcript::TranscriptMessage;
    use crate::llm::LlmError;
    use crate::rules::{NewRule, RuleKind};

    use async_trait::async_trait;

    struct EmptyExtractor;

    #[async_trait]
    impl ExtractionProvider for EmptyExtractor {
        async fn extract(&self, prompt: &str) -> Result<Exchange<ChangeSet>, LlmError> {
            Ok(Exchange {
                value: ChangeSet {
                    changes: Vec::new(),
                    summary: "No evidence of corrected mistakes".into(),
                },
                prompt: prompt.to_string(),
                response: "{}".into(),
            })
        }
    }

    fn user_turn(text: &str) -> TranscriptEntry {
        TranscriptEntry {
            kind: "user".into(),
            message: Some(TranscriptMessage {
                role: Some("user".into()),
                content: serde_json::Value::String(text.into()),
            }),
            uuid: None,
            session_id: None,
            cwd: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_uneventful_transcript_extracts_no_changes() {
        let store = RuleStore::new(memory_pool().await);
        let entries = vec![user_turn("list the files"), user_turn("thanks")];

        let exchange = extract(&EmptyExtractor, &store, &entries, &Settings::default())
            .await
            .expect("extract");
        assert!(exchange.value.changes.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_carries_rules_snapshot_and_excerpt() {
        let store = RuleStore::new(memory_pool().await);
        store
            .insert(&NewRule {
                kind: Some(RuleKind::Semantic),
                description: "prefer uv over pip".into(),
                solution: Some("uv add".into()),
                ..NewRule::default()
            })
            .await
            .expect("insert");

        let entries = vec![user_turn("install requests for me")];
        let exchange = extract(&EmptyExtractor, &store, &entries, &Settings::default())
            .await
            .expect("extract");

        assert!(exchange.prompt.contains("prefer uv over pip (all tools) → uv add"));
        assert!(exchange.prompt.contains("USER: install requests for me"));
    }

    #[test]
    fn test_render_existing_rules_truncates_long_sets() {
        let rules: Vec<Rule> = (1..=200)
            .map(|id| Rule {
                id,
                kind: RuleKind::Semantic,
                pattern: None,
                patterns: None,
                description: "x".repeat(100),
                problem: None,
                solution: None,
                tool: None,
                action: crate::rules::RuleAction::Warn,
                active: true,
                priority: 0,
                requires_review: false,
                review_prompt: None,
                hard: false,
                source_session_id: None,
                created_at: String::new(),
            })
            .collect();

        let rendered = render_existing_rules(&rules, 3000);
        assert!(rendered.ends_with("... (truncated)"));
        assert!(rendered.chars().count() < 3100);
    }

    #[test]
    fn test_render_empty_rule_set() {
        assert_eq!(render_existing_rules(&[], 3000), "(no rules yet)");
    }
}
