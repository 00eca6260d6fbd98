//! Structured completions over OpenAI-compatible chat endpoints.
//!
//! One request, one schema-constrained JSON answer, parsed into a typed
//! value. Schema generation comes from the response type's `JsonSchema`
//! derive, so the wire contract and the Rust type cannot drift apart.

use crate::config::Settings;
use crate::llm::manager::LlmManager;
use crate::llm::{DecisionProvider, Exchange, ExtractionProvider, LlmError};
use crate::rules::{ChangeSet, Decision};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use std::sync::Arc;

/// Sends a prompt plus schema and validates the typed response.
#[derive(Clone)]
pub struct StructuredClient {
    manager: Arc<LlmManager>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl StructuredClient {
    pub fn new(manager: Arc<LlmManager>) -> Self {
        Self { manager }
    }

    /// Issue one structured completion and parse the answer as `T`.
    pub async fn complete<T>(
        &self,
        model_name: &str,
        system_prompt: &str,
        user_prompt: &str,
        schema_name: &str,
    ) -> Result<Exchange<T>, LlmError>
    where
        T: JsonSchema + DeserializeOwned,
    {
        let (provider, model) = self.manager.resolve_model(model_name);
        let api_key = self.manager.api_key(&provider)?;
        let url = self.manager.chat_url(&provider)?;

        let schema = schemars::r#gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let schema_value = serde_json::to_value(&schema)
            .map_err(|error| LlmError::MalformedOutput(error.to_string()))?;

        let body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "schema": schema_value,
                },
            },
        });

        let response = self
            .manager
            .http_client()
            .post(url)
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

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        let value: T = serde_json::from_str(&content).map_err(|error| {
            LlmError::MalformedOutput(format!("schema {schema_name}: {error}"))
        })?;

        Ok(Exchange {
            value,
            prompt: user_prompt.to_string(),
            response: content,
        })
    }
}

impl std::fmt::Debug for StructuredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredClient").finish_non_exhaustive()
    }
}

/// Arbitration decisions via the configured eval model.
pub struct LlmDecider {
    client: StructuredClient,
    model: String,
    system_prompt: String,
}

impl LlmDecider {
    pub fn new(manager: Arc<LlmManager>, settings: &Settings) -> Self {
        Self {
            client: StructuredClient::new(manager),
            model: settings.eval_model.clone(),
            system_prompt: settings.eval_prompt.clone(),
        }
    }
}

#[async_trait]
impl DecisionProvider for LlmDecider {
    async fn decide(&self, prompt: &str) -> Result<Exchange<Decision>, LlmError> {
        self.client
            .complete::<Decision>(&self.model, &self.system_prompt, prompt, "rule_decision")
            .await
    }
}

/// Rule-change extraction via the configured learn model.
pub struct LlmExtractor {
    client: StructuredClient,
    model: String,
    system_prompt: String,
}

impl LlmExtractor {
    pub fn new(manager: Arc<LlmManager>, settings: &Settings) -> Self {
        Self {
            client: StructuredClient::new(manager),
            model: settings.learn_model.clone(),
            system_prompt: settings.learn_prompt.clone(),
        }
    }
}

#[async_trait]
impl ExtractionProvider for LlmExtractor {
    async fn extract(&self, prompt: &str) -> Result<Exchange<ChangeSet>, LlmError> {
        self.client
            .complete::<ChangeSet>(&self.model, &self.system_prompt, prompt, "rule_changes")
            .await
    }
}
