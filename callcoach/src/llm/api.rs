use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};

use crate::{
    config::{parse_llm_provider_model, LlmConfig},
    error::{CoachError, Result},
    llm::prompts::Prompt,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

/// Thin chat-completions client. It makes exactly one HTTP attempt per call;
/// retrying is the orchestrator's job.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(
            provider.to_lowercase().as_str(),
            "ollama" | "local" | "lmstudio"
        );

        if needs_api_key && api_config.api_key.is_none() {
            return Err(CoachError::LlmUnavailable(
                "API key required for this provider".to_string(),
            ));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| {
                CoachError::LlmUnavailable(format!("Failed to create LLM HTTP client: {error}"))
            })?;

        // async-openai retries 429/5xx internally for up to 15 minutes by
        // default. A zero budget makes it hand the first failure back to us.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn complete(&self, prompt: &Prompt) -> Result<String> {
        if prompt.user.trim().is_empty() {
            return Err(CoachError::Validation("Prompt cannot be empty".to_string()));
        }

        let request = self.build_request(prompt)?;

        match self.client.chat().create(request).await {
            Ok(response) => {
                let content = Self::extract_content(response)?;
                tracing::debug!(response_len = content.len(), "LLM response received");
                Ok(content)
            }
            Err(error) => {
                let mapped = Self::map_openai_error(error);
                tracing::debug!(error = %mapped, transient = mapped.is_transient(), "LLM request failed");
                Err(mapped)
            }
        }
    }

    fn build_request(&self, prompt: &Prompt) -> Result<CreateChatCompletionRequest> {
        let mut messages = Vec::new();

        if !prompt.system.trim().is_empty() {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(prompt.system.as_str())
                    .build()
                    .map_err(|error| {
                        CoachError::Validation(format!("Invalid system prompt: {error}"))
                    })?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.user.as_str())
                .build()
                .map_err(|error| CoachError::Validation(format!("Invalid user prompt: {error}")))?
                .into(),
        );

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.config.model.clone()).messages(messages);

        if let Some(temperature) = self.config.temperature {
            request.temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request.max_tokens(max_tokens);
        }

        request.build().map_err(|error| {
            CoachError::Validation(format!("Invalid LLM completion request: {error}"))
        })
    }

    fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoachError::Schema {
                message: "LLM response contained no choices".to_string(),
                raw: String::new(),
            })?
            .message
            .content
            .unwrap_or_default();

        if message.trim().is_empty() {
            return Err(CoachError::Schema {
                message: "LLM response contained empty content".to_string(),
                raw: message,
            });
        }

        Ok(message)
    }

    fn map_openai_error(error: OpenAIError) -> CoachError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => Self::map_reqwest_error(reqwest_error),
            OpenAIError::ApiError(api_error) => Self::map_api_error(api_error),
            // Usually an HTML error page from a proxy in front of the provider.
            OpenAIError::JSONDeserialize(err) => {
                CoachError::UpstreamTransient(format!("Unreadable LLM response: {err}"))
            }
            OpenAIError::InvalidArgument(message) => CoachError::Validation(message),
            other => CoachError::UpstreamPermanent(other.to_string()),
        }
    }

    fn map_reqwest_error(error: reqwest::Error) -> CoachError {
        match error.status() {
            Some(reqwest::StatusCode::TOO_MANY_REQUESTS) => {
                CoachError::UpstreamRateLimit { retry_after: None }
            }
            Some(status) if status.is_server_error() => {
                CoachError::UpstreamTransient(format!("LLM request failed: {error}"))
            }
            Some(reqwest::StatusCode::UNAUTHORIZED) | Some(reqwest::StatusCode::FORBIDDEN) => {
                CoachError::UpstreamPermanent(format!("LLM authentication failed: {error}"))
            }
            Some(_) => CoachError::UpstreamPermanent(format!("LLM request rejected: {error}")),
            None => CoachError::UpstreamTransient(format!("LLM request failed: {error}")),
        }
    }

    fn map_api_error(api_error: ApiError) -> CoachError {
        if Self::is_rate_limit_api_error(&api_error) {
            return CoachError::UpstreamRateLimit { retry_after: None };
        }
        if Self::is_auth_api_error(&api_error) {
            return CoachError::UpstreamPermanent(format!(
                "LLM authentication failed: {api_error}"
            ));
        }
        if Self::is_content_policy_api_error(&api_error) {
            return CoachError::UpstreamPermanent(format!(
                "LLM rejected content: {api_error}"
            ));
        }

        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        // Server errors arrive without a type or code.
        if (api_error.r#type.is_none() && api_error.code.is_none())
            || error_type.contains("server_error")
        {
            return CoachError::UpstreamTransient(format!("LLM API error: {api_error}"));
        }

        CoachError::UpstreamPermanent(format!("LLM API error: {api_error}"))
    }

    fn is_rate_limit_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        // An exhausted quota will not recover by waiting.
        if code == "insufficient_quota" || error_type == "insufficient_quota" {
            return false;
        }

        message.contains("rate limit")
            || message.contains("too many requests")
            || error_type.contains("rate_limit")
            || code.contains("rate_limit")
    }

    fn is_auth_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("unauthorized")
            || message.contains("forbidden")
            || message.contains("invalid api key")
            || code.contains("invalid_api_key")
            || code.contains("authentication")
            || error_type.contains("authentication")
    }

    fn is_content_policy_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        code.contains("content_policy")
            || code.contains("content_filter")
            || message.contains("content policy")
            || message.contains("content management policy")
    }
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let normalized_model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: normalized_model,
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}
