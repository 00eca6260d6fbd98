//! Policy evaluation pipeline: pattern rules, semantic retrieval, and
//! consolidated arbitration.
//!
//! One tool call in, exactly one decision out. Fast pattern rules
//! short-circuit; everything ambiguous is consolidated into a single
//! arbitration call; provider failures on this path fail closed.

pub mod arbiter;
pub mod evaluator;
pub mod pattern;
pub mod semantic;

pub use evaluator::{EvaluationRequest, PolicyEvaluator};

use crate::rules::{Rule, RuleAction};

use thiserror::Error;

/// Evaluation pipeline errors. Every variant maps to the fail-closed block
/// outcome at the evaluator boundary.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("rule store error: {0}")]
    Store(#[from] crate::rules::RuleError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::llm::LlmError),

    #[error("evaluation timed out")]
    Timeout,
}

/// Where a review candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// A pattern rule matched but carries `requires_review`.
    PatternReview,
    /// Keyword overlap between the rule description and the input.
    Keyword,
    /// Vector similarity between the rule embedding and the input.
    Vector,
}

/// A rule that needs arbitration before it can affect the decision.
#[derive(Debug, Clone)]
pub struct ReviewCandidate {
    pub rule_id: i64,
    pub description: String,
    pub problem: Option<String>,
    pub solution: Option<String>,
    pub action: RuleAction,
    pub review_prompt: Option<String>,
    pub hard: bool,
    pub source: CandidateSource,
    /// Vector distance for vector candidates; keyword candidates carry a
    /// synthetic placeholder treated as close by definition.
    pub distance: f32,
}

impl ReviewCandidate {
    pub(crate) fn from_rule(rule: &Rule, source: CandidateSource, distance: f32) -> Self {
        Self {
            rule_id: rule.id,
            description: rule.description.clone(),
            problem: rule.problem.clone(),
            solution: rule.solution.clone(),
            action: rule.action,
            review_prompt: rule.review_prompt.clone(),
            hard: rule.hard,
            source,
            distance,
        }
    }
}

/// Truncate to a character budget without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
