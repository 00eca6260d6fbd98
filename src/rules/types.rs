//! Data types for the rule store and decisions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a rule is matched against tool input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Matched by regex patterns against the input text.
    Pattern,
    /// Matched by keyword overlap and embedding similarity, confirmed by
    /// arbitration.
    Semantic,
}

impl RuleKind {
    /// Parse from a string, defaulting to Semantic.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "pattern" => Self::Pattern,
            _ => Self::Semantic,
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern => write!(f, "pattern"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

/// What a matching rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Block,
    Warn,
    /// Recorded in the audit trail only; never fails a check.
    Log,
}

impl RuleAction {
    /// Parse from a string, defaulting to Warn.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "block" => Self::Block,
            "log" => Self::Log,
            _ => Self::Warn,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Warn => write!(f, "warn"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// The outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Warn,
    Block,
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// A stored rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: i64,
    pub kind: RuleKind,
    /// Single regex pattern. Exactly one of `pattern`/`patterns` drives
    /// pattern-kind matching; semantic rules ignore both.
    pub pattern: Option<String>,
    /// JSON array of regex patterns.
    pub patterns: Option<String>,
    pub description: String,
    pub problem: Option<String>,
    pub solution: Option<String>,
    /// Tool scope; None applies to all tools.
    pub tool: Option<String>,
    pub action: RuleAction,
    pub active: bool,
    /// Higher priority is evaluated first. Governs evaluation order, not
    /// display order.
    pub priority: i64,
    /// When set, a pattern match is necessary but not sufficient: the match
    /// is deferred to arbitration instead of contributing directly.
    pub requires_review: bool,
    /// Guidance forwarded to the arbitration model.
    pub review_prompt: Option<String>,
    /// Hard rules cannot be overridden by caller justification.
    pub hard: bool,
    pub source_session_id: Option<i64>,
    pub created_at: String,
}

impl Rule {
    /// The text an embedding is derived from.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.description, self.problem.as_deref(), self.solution.as_deref())
    }
}

/// Build the canonical embedding input for a rule's text fields.
pub fn embedding_text(description: &str, problem: Option<&str>, solution: Option<&str>) -> String {
    let mut text = description.to_string();
    if let Some(problem) = problem
        && !problem.is_empty()
    {
        text.push_str(&format!(" Problem: {problem}"));
    }
    if let Some(solution) = solution
        && !solution.is_empty()
    {
        text.push_str(&format!(" Solution: {solution}"));
    }
    text
}

/// Insert payload for a new rule.
#[derive(Debug, Clone, Default)]
pub struct NewRule {
    pub kind: Option<RuleKind>,
    pub pattern: Option<String>,
    pub patterns: Option<String>,
    pub description: String,
    pub problem: Option<String>,
    pub solution: Option<String>,
    pub tool: Option<String>,
    pub action: Option<RuleAction>,
    pub priority: i64,
    pub requires_review: bool,
    pub review_prompt: Option<String>,
    pub hard: bool,
    pub source_session_id: Option<i64>,
}

/// Partial update: only supplied fields are written.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub pattern: Option<String>,
    pub patterns: Option<String>,
    pub description: Option<String>,
    pub problem: Option<String>,
    pub solution: Option<String>,
    pub action: Option<RuleAction>,
    pub requires_review: Option<bool>,
    pub review_prompt: Option<String>,
}

impl RulePatch {
    /// Whether this patch changes the text the embedding is derived from.
    pub fn touches_embedding_text(&self) -> bool {
        self.description.is_some() || self.problem.is_some() || self.solution.is_some()
    }
}

/// What a proposed rule mutation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One proposed rule mutation from the learning extractor.
///
/// Also the structured shape returned by the extraction model, so unknown or
/// missing optional fields deserialize to None rather than failing the run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuleChange {
    pub action: ChangeAction,
    /// Target rule for update/delete.
    #[serde(default)]
    pub rule_id: Option<i64>,
    #[serde(default)]
    pub kind: Option<RuleKind>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub patterns: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    /// What went wrong, quoted from the conversation.
    #[serde(default)]
    pub problem: Option<String>,
    /// How it was resolved, quoted from the conversation.
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub rule_action: Option<RuleAction>,
    #[serde(default)]
    pub requires_review: Option<bool>,
    #[serde(default)]
    pub review_prompt: Option<String>,
    /// Why this change is being made, referencing concrete evidence.
    pub reason: String,
}

/// The extraction model's full answer: proposed changes plus a summary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChangeSet {
    pub changes: Vec<RuleChange>,
    pub summary: String,
}

/// Final decision for one tool call. Also the structured shape returned by
/// the arbitration model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    pub approved: bool,
    pub action: DecisionAction,
    pub comment: String,
}

impl Decision {
    pub fn allow(comment: impl Into<String>) -> Self {
        Self {
            approved: true,
            action: DecisionAction::Allow,
            comment: comment.into(),
        }
    }

    pub fn block(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            action: DecisionAction::Block,
            comment: comment.into(),
        }
    }

    pub fn warn(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            action: DecisionAction::Warn,
            comment: comment.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_concatenates_present_fields() {
        let text = embedding_text("use uv", Some("pip broke the env"), Some("uv add"));
        assert_eq!(text, "use uv Problem: pip broke the env Solution: uv add");
    }

    #[test]
    fn test_embedding_text_skips_missing_fields() {
        assert_eq!(embedding_text("use uv", None, None), "use uv");
        assert_eq!(embedding_text("use uv", Some(""), None), "use uv");
    }

    #[test]
    fn test_patch_embedding_text_detection() {
        let patch = RulePatch {
            action: Some(RuleAction::Block),
            ..RulePatch::default()
        };
        assert!(!patch.touches_embedding_text());

        let patch = RulePatch {
            solution: Some("use rg".into()),
            ..RulePatch::default()
        };
        assert!(patch.touches_embedding_text());
    }

    #[test]
    fn test_lossy_parsing_defaults() {
        assert_eq!(RuleKind::from_str_lossy("pattern"), RuleKind::Pattern);
        assert_eq!(RuleKind::from_str_lossy("anything"), RuleKind::Semantic);
        assert_eq!(RuleAction::from_str_lossy("block"), RuleAction::Block);
        assert_eq!(RuleAction::from_str_lossy("junk"), RuleAction::Warn);
    }
}
