use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callcoach::config::LlmConfig;
use callcoach::error::{CoachError, FailureClass};
use callcoach::llm::{InferenceClient, LlmBackend, LlmProvider, Prompt};

fn llm_config_with_base_url(model: &str, base_url: String) -> LlmConfig {
    LlmConfig {
        model: model.to_string(),
        api_key: Some("test-key".to_string()),
        base_url: Some(base_url),
        timeout_secs: 5,
        temperature: Some(0.0),
        max_tokens: None,
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content
                },
                "finish_reason": "stop"
            }
        ],
        "usage": {
            "prompt_tokens": 1,
            "completion_tokens": 1,
            "total_tokens": 2
        }
    })
}

fn api_error_body(message: &str, error_type: &str, code: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": serde_json::Value::Null,
            "code": code
        }
    })
}

fn prompt() -> Prompt {
    Prompt {
        system: "You are a sales coach.".to_string(),
        user: "Score this call.".to_string(),
    }
}

async fn provider_for(server: &MockServer) -> LlmProvider {
    let config = llm_config_with_base_url("openai/gpt-4o-mini", format!("{}/v1", server.uri()));
    LlmProvider::new(Some(&config))
}

async fn mount_once(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_infer_returns_message_content() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(200).set_body_json(completion_body(r#"{"score": 70}"#)),
    )
    .await;

    let provider = provider_for(&server).await;
    assert_eq!(provider.backend(), &LlmBackend::OpenAI);

    let content = provider.infer(&prompt()).await.unwrap();
    assert_eq!(content, r#"{"score": 70}"#);
}

#[tokio::test]
async fn test_rate_limit_is_transient_and_not_retried_internally() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(429).set_body_json(api_error_body(
            "Rate limit reached for requests",
            "requests",
            "rate_limit_exceeded",
        )),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert!(matches!(err, CoachError::UpstreamRateLimit { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_exhausted_quota_is_permanent() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(429).set_body_json(api_error_body(
            "You exceeded your current quota, please check your plan and billing details.",
            "insufficient_quota",
            "insufficient_quota",
        )),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert!(!matches!(err, CoachError::UpstreamRateLimit { .. }));
    assert_eq!(err.class(), FailureClass::Permanent);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(503).set_body_string("upstream connect error"),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert!(matches!(err, CoachError::UpstreamTransient(_)));
}

#[tokio::test]
async fn test_invalid_api_key_is_permanent() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(401).set_body_json(api_error_body(
            "Incorrect API key provided",
            "invalid_request_error",
            "invalid_api_key",
        )),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert!(matches!(err, CoachError::UpstreamPermanent(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_content_policy_rejection_is_permanent() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(400).set_body_json(api_error_body(
            "Your request was rejected as a result of our safety system.",
            "invalid_request_error",
            "content_policy_violation",
        )),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert!(matches!(err, CoachError::UpstreamPermanent(ref m) if m.contains("rejected content")));
}

#[tokio::test]
async fn test_empty_completion_is_a_schema_error() {
    let server = MockServer::start().await;
    mount_once(
        &server,
        ResponseTemplate::new(200).set_body_json(completion_body("   ")),
    )
    .await;

    let err = provider_for(&server)
        .await
        .infer(&prompt())
        .await
        .unwrap_err();

    assert_eq!(err.class(), FailureClass::Schema);
}

#[tokio::test]
async fn test_unavailable_provider_never_calls_upstream() {
    let provider = LlmProvider::new(None);

    let err = provider.infer(&prompt()).await.unwrap_err();

    assert!(matches!(err, CoachError::LlmUnavailable(_)));
    assert_eq!(err.class(), FailureClass::Permanent);
}
