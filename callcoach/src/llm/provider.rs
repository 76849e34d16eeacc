use async_trait::async_trait;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{CoachError, Result};
use crate::llm::api::LlmApiClient;
use crate::llm::prompts::Prompt;

/// Anything that can turn a prompt into raw model text. One call is one
/// upstream attempt; callers own retries.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Identifier folded into cache keys so a model switch never reuses
    /// another model's results.
    fn model_id(&self) -> &str;

    async fn infer(&self, prompt: &Prompt) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

#[derive(Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    model: String,
    client: Option<LlmApiClient>,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => match &config.base_url {
                Some(base_url) => LlmBackend::OpenAICompatible {
                    base_url: base_url.clone(),
                },
                None => {
                    return Self::unavailable(&format!(
                        "Unknown provider in model: {}",
                        config.model
                    ))
                }
            },
        };

        match LlmApiClient::new(config) {
            Ok(client) => Self {
                backend,
                model: client.model().to_string(),
                client: Some(client),
            },
            Err(error) => {
                tracing::warn!(model = %config.model, error = %error, "LLM client unavailable");
                Self::unavailable(&error.to_string())
            }
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            model: String::new(),
            client: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    fn unavailable_reason(&self) -> String {
        match &self.backend {
            LlmBackend::Unavailable { reason } => reason.clone(),
            _ => "LLM client was not initialized".to_string(),
        }
    }
}

#[async_trait]
impl InferenceClient for LlmProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn infer(&self, prompt: &Prompt) -> Result<String> {
        match &self.client {
            Some(client) => client.complete(prompt).await,
            None => Err(CoachError::LlmUnavailable(self.unavailable_reason())),
        }
    }
}
