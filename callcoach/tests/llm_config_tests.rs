use std::env;

use serial_test::serial;

use callcoach::config::{parse_llm_provider_model, Config, LlmConfig, KNOWN_LLM_PROVIDERS};
use callcoach::error::{CoachError, FailureClass};

const LLM_VARS: &[&str] = &[
    "LLM_MODEL",
    "LLM_API_KEY",
    "LLM_BASE_URL",
    "LLM_TIMEOUT",
    "LLM_TEMPERATURE",
    "LLM_MAX_TOKENS",
];

fn clear_llm_env() {
    for var in LLM_VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_llm_config_openai() {
    let (provider, model) = parse_llm_provider_model("openai/gpt-4o");
    assert_eq!(provider, "openai");
    assert_eq!(model, "gpt-4o");
}

#[test]
fn test_llm_config_openrouter_keeps_nested_model() {
    let (provider, model) = parse_llm_provider_model("openrouter/anthropic/claude-3.5-sonnet");
    assert_eq!(provider, "openrouter");
    assert_eq!(model, "anthropic/claude-3.5-sonnet");
}

#[test]
fn test_llm_config_unknown_prefix_defaults_to_local() {
    let (provider, model) = parse_llm_provider_model("unknown/model-name");
    assert_eq!(provider, "local");
    assert_eq!(model, "unknown/model-name");
}

#[test]
fn test_known_llm_providers_constant() {
    assert!(KNOWN_LLM_PROVIDERS.contains(&"ollama"));
    assert!(KNOWN_LLM_PROVIDERS.contains(&"lmstudio"));
    assert_eq!(KNOWN_LLM_PROVIDERS.len(), 4);
}

#[test]
#[serial]
fn test_llm_config_none_when_no_env() {
    clear_llm_env();

    let config = Config::from_env();

    assert!(
        config.llm.is_none(),
        "LlmConfig should be None when LLM_MODEL is not set"
    );
}

#[test]
#[serial]
fn test_llm_config_some_when_model_env_set() {
    clear_llm_env();
    env::set_var("LLM_MODEL", "openai/gpt-4o-mini");

    let llm = Config::from_env().llm.unwrap();

    assert_eq!(llm.model, "openai/gpt-4o-mini");
    assert!(llm.api_key.is_none());
    assert!(llm.base_url.is_none());
    assert_eq!(llm.timeout_secs, 60);
    assert!(llm.temperature.is_none());

    clear_llm_env();
}

#[test]
#[serial]
fn test_llm_config_with_all_env_vars() {
    clear_llm_env();
    env::set_var("LLM_MODEL", "ollama/llama3.2");
    env::set_var("LLM_API_KEY", "sk-test-key");
    env::set_var("LLM_BASE_URL", "http://localhost:11434/v1");
    env::set_var("LLM_TIMEOUT", "90");
    env::set_var("LLM_TEMPERATURE", "0.2");
    env::set_var("LLM_MAX_TOKENS", "1500");

    let llm: LlmConfig = Config::from_env().llm.unwrap();

    assert_eq!(llm.model, "ollama/llama3.2");
    assert_eq!(llm.api_key, Some("sk-test-key".to_string()));
    assert_eq!(llm.base_url, Some("http://localhost:11434/v1".to_string()));
    assert_eq!(llm.timeout_secs, 90);
    assert_eq!(llm.temperature, Some(0.2));
    assert_eq!(llm.max_tokens, Some(1500));

    clear_llm_env();
}

#[test]
fn test_exhausted_retries_keep_the_underlying_class() {
    let error = CoachError::RetriesExhausted {
        attempts: 4,
        source: Box::new(CoachError::UpstreamRateLimit {
            retry_after: Some(60),
        }),
    };
    assert!(error.is_transient());
    assert_eq!(error.attempts(), 4);
    assert!(error.to_string().ends_with("(gave up after 4 attempts)"));
}

#[test]
fn test_unavailable_llm_is_permanent() {
    let error = CoachError::LlmUnavailable("no model configured".to_string());
    assert!(!error.is_transient());
    assert_eq!(error.class(), FailureClass::Permanent);
}
