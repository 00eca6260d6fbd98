//! LLM provider access: embeddings and structured decisions.
//!
//! The pipelines never talk to a provider directly; they go through the
//! three traits below so evaluation logic stays testable with mocks and a
//! provider swap never touches the core. Production implementations live in
//! the submodules and speak OpenAI-compatible HTTP.

pub mod embedding;
pub mod manager;
pub mod structured;

pub use embedding::OpenAiEmbeddings;
pub use manager::LlmManager;
pub use structured::{LlmDecider, LlmExtractor, StructuredClient};

use crate::rules::{ChangeSet, Decision};

use async_trait::async_trait;

/// Provider-layer errors. Every variant is a typed failure the evaluation
/// path converts to its fail-closed outcome.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("missing API key for provider: {0}")]
    MissingApiKey(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed structured output: {0}")]
    MalformedOutput(String),

    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// A typed model response paired with the raw exchange, so audit traces can
/// record exactly what was sent and received.
#[derive(Debug, Clone)]
pub struct Exchange<T> {
    pub value: T,
    pub prompt: String,
    pub response: String,
}

/// Produces a fixed-length embedding vector for a text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Resolves an arbitration prompt into a structured decision.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, prompt: &str) -> Result<Exchange<Decision>, LlmError>;
}

/// Resolves an extraction prompt into proposed rule changes.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    async fn extract(&self, prompt: &str) -> Result<Exchange<ChangeSet>, LlmError>;
}
