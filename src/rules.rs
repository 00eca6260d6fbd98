//! Rule storage: the mutable rule set, its embeddings, and decisions.

pub mod store;
pub mod types;

pub use store::{RuleStore, cosine_distance, deserialize_vector, serialize_vector};
pub use types::{
    ChangeAction, ChangeSet, Decision, DecisionAction, NewRule, Rule, RuleAction, RuleChange,
    RuleKind, RulePatch, embedding_text,
};

use thiserror::Error;

/// Rule store errors.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule store database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rule {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Provider(#[from] crate::llm::LlmError),
}
