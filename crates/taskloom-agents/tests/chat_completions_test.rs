use std::collections::HashMap;

use serde_json::json;
use taskloom_agents::{
    ChatCompletionsProvider, ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest,
    ProviderErrorKind, ToolDefinition,
};
use taskloom_config::{ProviderConfig, ProviderConfigFactory, ProviderKind};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(base_url: &str) -> ProviderConfig {
    let vars: HashMap<String, String> = [
        ("GEMINI_API_KEY".to_string(), "test-key".to_string()),
        ("GEMINI_BASE_URL".to_string(), base_url.to_string()),
    ]
    .into();
    ProviderConfigFactory::from_vars(vars)
        .create_config(ProviderKind::Gemini)
        .expect("config should build")
}

fn request(tools: Vec<ToolDefinition>) -> LlmRequest {
    LlmRequest {
        model: "gemini-2.0-flash".to_string(),
        messages: vec![ChatMessage::text(ChatRole::User, "Hello")],
        system: Some("You are a helpful assistant.".to_string()),
        max_tokens: None,
        temperature: None,
        tools,
    }
}

#[tokio::test]
async fn parses_text_completions() {
    let mock_server = MockServer::start().await;

    let response_body = json!({
        "id": "chatcmpl-123",
        "model": "gemini-2.0-flash",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello there!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
    });

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    let response = provider.complete(&request(vec![])).await.unwrap();

    assert_eq!(response.content.len(), 1);
    match &response.content[0] {
        ContentBlock::Text { text } => assert_eq!(text, "Hello there!"),
        _ => panic!("Expected text content"),
    }
    assert_eq!(response.usage.unwrap().input_tokens, 9);
}

#[tokio::test]
async fn parses_tool_calls() {
    let mock_server = MockServer::start().await;

    let response_body = json!({
        "id": "chatcmpl-123",
        "model": "gemini-2.0-flash",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc123",
                    "type": "function",
                    "function": {
                        "name": "add_task",
                        "arguments": "{\"title\": \"buy milk\"}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    });

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    let tools = vec![ToolDefinition {
        name: "add_task".to_string(),
        description: "Create a task".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"title": {"type": "string"}}
        }),
    }];
    let response = provider.complete(&request(tools)).await.unwrap();

    assert_eq!(response.content.len(), 1);
    match &response.content[0] {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "call_abc123");
            assert_eq!(name, "add_task");
            assert_eq!(input["title"], "buy milk");
        }
        _ => panic!("Expected tool use"),
    }
}

#[tokio::test]
async fn rate_limit_status_maps_to_rate_limited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded"))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    let err = provider.complete(&request(vec![])).await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::RateLimited);
    assert!(err.is_retriable());
}

#[tokio::test]
async fn auth_status_maps_to_auth_failed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    let err = provider.complete(&request(vec![])).await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::AuthFailed);
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn server_errors_map_to_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    let err = provider.complete(&request(vec![])).await.unwrap_err();

    assert_eq!(err.kind, ProviderErrorKind::Unavailable);
    assert!(err.is_retriable());
}

#[tokio::test]
async fn health_check_reports_reachable_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let provider = ChatCompletionsProvider::new(config_for(&mock_server.uri()));
    assert!(provider.health_check().await.unwrap());
}

#[tokio::test]
async fn health_check_is_false_for_unreachable_endpoint() {
    let provider = ChatCompletionsProvider::new(config_for("http://127.0.0.1:1"));
    assert!(!provider.health_check().await.unwrap());
}
