//! Provider credentials and the shared HTTP client.
//!
//! The manager is intentionally simple: it holds API keys and a reqwest
//! client. Which model handles which pipeline is decided by Settings, not
//! here.

use crate::llm::LlmError;

// Default API endpoints per provider (chat completions).
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Holds provider API keys and the HTTP client shared by every call.
pub struct LlmManager {
    http_client: reqwest::Client,
    openai_key: Option<String>,
    openrouter_key: Option<String>,
    groq_key: Option<String>,
}

impl LlmManager {
    /// Build a manager reading keys from the environment.
    ///
    /// The client-level timeout is a generous backstop; the evaluation path
    /// applies its own tighter deadline around the whole phase.
    pub fn from_env() -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http_client,
            openai_key: std::env::var("OPENAI_API_KEY").ok(),
            openrouter_key: std::env::var("OPENROUTER_API_KEY").ok(),
            groq_key: std::env::var("GROQ_API_KEY").ok(),
        })
    }

    /// Get the API key for a provider.
    pub fn api_key(&self, provider: &str) -> Result<String, LlmError> {
        let key = match provider {
            "openai" => &self.openai_key,
            "openrouter" => &self.openrouter_key,
            "groq" => &self.groq_key,
            _ => return Err(LlmError::UnknownProvider(provider.into())),
        };
        key.clone()
            .ok_or_else(|| LlmError::MissingApiKey(provider.into()))
    }

    /// Chat-completions endpoint for a provider.
    pub fn chat_url(&self, provider: &str) -> Result<&'static str, LlmError> {
        match provider {
            "openai" => Ok(DEFAULT_OPENAI_BASE_URL),
            "openrouter" => Ok(DEFAULT_OPENROUTER_BASE_URL),
            "groq" => Ok(DEFAULT_GROQ_BASE_URL),
            _ => Err(LlmError::UnknownProvider(provider.into())),
        }
    }

    /// Embeddings endpoint. Embeddings always go to OpenAI regardless of
    /// which provider handles completions. The stored vectors must all come
    /// from one model family to be comparable.
    pub fn embeddings_url(&self) -> &'static str {
        OPENAI_EMBEDDINGS_URL
    }

    /// The shared HTTP client.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Split "provider/model" into components, defaulting to openai.
    pub fn resolve_model(&self, model_name: &str) -> (String, String) {
        match model_name.split_once('/') {
            Some((provider, model)) => (provider.to_string(), model.to_string()),
            None => ("openai".into(), model_name.into()),
        }
    }
}

impl std::fmt::Debug for LlmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmManager")
            .field("openai_key", &self.openai_key.is_some())
            .field("openrouter_key", &self.openrouter_key.is_some())
            .field("groq_key", &self.groq_key.is_some())
            .finish()
    }
}
