//! Embedding generation via the OpenAI embeddings API.

use crate::llm::manager::LlmManager;
use crate::llm::{EmbeddingProvider, LlmError};

use async_trait::async_trait;
use serde::Deserialize;

use std::sync::Arc;

/// Number of components in every stored embedding.
pub const EMBEDDING_DIM: usize = 384;

const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Embedding provider backed by OpenAI's embeddings endpoint, requesting
/// 384-component vectors so storage stays compact.
pub struct OpenAiEmbeddings {
    manager: Arc<LlmManager>,
}

impl OpenAiEmbeddings {
    pub fn new(manager: Arc<LlmManager>) -> Self {
        Self { manager }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let api_key = self.manager.api_key("openai")?;

        let body = serde_json::json!({
            "model": EMBEDDING_MODEL,
            "input": text,
            "dimensions": EMBEDDING_DIM,
        });

        let response = self
            .manager
            .http_client()
            .post(self.manager.embeddings_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or(LlmError::EmptyResponse)?;

        if vector.len() != EMBEDDING_DIM {
            return Err(LlmError::MalformedOutput(format!(
                "expected {EMBEDDING_DIM}-component embedding, got {}",
                vector.len()
            )));
        }

        Ok(vector)
    }
}

impl std::fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("model", &EMBEDDING_MODEL)
            .finish_non_exhaustive()
    }
}
