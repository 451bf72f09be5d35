use anyhow::Result;
use futures::StreamExt;
use indoc::formatdoc;
use modelgate::{
    config::Settings,
    errors::{ErrorClass, GatewayError},
    gateway::{Gateway, GatewayConfig, GatewayRequest},
    models::{message::Message, tool::ToolDescriptor},
    providers::configs::{
        AnthropicProviderConfig, DatabricksAuth, DatabricksProviderConfig, OpenAiProviderConfig,
        ProviderConfig,
    },
    providers::factory::get_provider,
    retry::RetryPolicy,
    router::ProviderRegistry,
    sandbox::{FnTool, ToolRegistry},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[Value]) -> ResponseTemplate {
    let mut body = String::new();
    for event in events {
        body.push_str(&format!("data: {}\n\n", event));
    }
    ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream")
}

fn gateway_for(configs: Vec<ProviderConfig>) -> Result<Gateway> {
    let mut builder = ProviderRegistry::builder();
    for config in configs {
        builder = builder.register(get_provider(config)?);
    }
    let config = GatewayConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(10)),
        ..Default::default()
    };
    Ok(Gateway::new(Arc::new(builder.build()?), config))
}

fn ask(text: &str) -> Vec<Message> {
    vec![Message::user().with_text(text)]
}

fn add_tool() -> ToolRegistry {
    ToolRegistry::new().with_tool(Arc::new(FnTool::new(
        ToolDescriptor::new("add", "Add two integers")
            .with_parameter("a", "integer", "First operand", true)
            .with_parameter("b", "integer", "Second operand", true),
        |args| {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(a + b))
        },
    )))
}

#[tokio::test]
async fn test_openai_text_is_forwarded_as_it_streams() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(sse(&[
            json!({"choices": [{"delta": {"content": "Hello"}}]}),
            json!({"choices": [{"delta": {"content": ", world"}}]}),
            json!({
                "choices": [],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(vec![ProviderConfig::OpenAi(OpenAiProviderConfig::new(
        server.uri(),
        "sk-test",
    ))])?;

    let chunks: Vec<String> = gateway
        .reply(GatewayRequest::new("gpt-4o", ask("Say hello")))
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks, vec!["Hello".to_string(), ", world".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_databricks_tool_round_trip() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/serving-endpoints/.+/invocations$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\": 40, \"b\": 2}"}
                    }]
                }
            }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/serving-endpoints/.+/invocations$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "40 + 2 = 42"}}]
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(vec![ProviderConfig::Databricks(DatabricksProviderConfig::new(
        server.uri(),
        DatabricksAuth::token("dapi-test"),
    ))])?;

    let answer = gateway
        .complete(
            GatewayRequest::new("onprem-custom:20b", ask("What is 40 + 2?")).with_tools(add_tool()),
        )
        .await?;
    assert_eq!(answer, "40 + 2 = 42");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: Value = serde_json::from_slice(&requests[1].body)?;
    let messages = second["messages"].as_array().unwrap();
    let result = messages.last().unwrap();
    assert_eq!(result["role"], "tool");
    assert_eq!(result["tool_call_id"], "call_1");
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap())?;
    assert_eq!(payload, json!({"status": "success", "result": 42}));
    assert_eq!(second["tools"][0]["function"]["name"], "add");
    Ok(())
}

#[tokio::test]
async fn test_anthropic_rate_limit_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "slow down"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse(&[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 3}}}),
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Bonjour"}
            }),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "usage": {"output_tokens": 1}}),
            json!({"type": "message_stop"}),
        ]))
        .mount(&server)
        .await;

    let gateway = gateway_for(vec![ProviderConfig::Anthropic(AnthropicProviderConfig::new(
        server.uri(),
        "test-key",
    ))])?;

    let answer = gateway
        .complete(GatewayRequest::new("claude-3-5-sonnet-latest", ask("Say hello in French")))
        .await?;

    assert_eq!(answer, "Bonjour");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(vec![ProviderConfig::OpenAi(OpenAiProviderConfig::new(
        server.uri(),
        "sk-wrong",
    ))])?;

    let items: Vec<Result<String, GatewayError>> = gateway
        .reply(GatewayRequest::new("gpt-4o", ask("hi")))
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.class(), ErrorClass::AuthFailure);
    assert!(err.to_string().contains("Incorrect API key"));
    assert!(err.hint().is_some());
    Ok(())
}

#[tokio::test]
async fn test_settings_route_models_to_their_backends() -> Result<()> {
    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[json!({"choices": [{"delta": {"content": "from openai"}}]})]))
        .mount(&openai)
        .await;
    let openrouter = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("X-Title", "modelgate"))
        .respond_with(sse(&[json!({"choices": [{"delta": {"content": "from openrouter"}}]})]))
        .mount(&openrouter)
        .await;

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("modelgate.toml");
    std::fs::write(
        &file,
        formatdoc! {r#"
            [providers.openai]
            host = "{openai}"
            api_key = "sk-test"

            [providers.openrouter]
            host = "{openrouter}"
            api_key = "or-test"

            [aliases]
            fast = "gpt-4o-mini"
        "#,
            openai = openai.uri(),
            openrouter = openrouter.uri(),
        },
    )?;

    let settings = Settings::load(Some(&file))?;
    let registry = ProviderRegistry::from_settings(&settings)?;
    let gateway = Gateway::new(Arc::new(registry), settings.gateway.gateway_config());

    let routed = gateway
        .complete(GatewayRequest::new("cloud-a/model-x", ask("hi")))
        .await?;
    assert_eq!(routed, "from openrouter");

    let aliased = gateway.complete(GatewayRequest::new("fast", ask("hi"))).await?;
    assert_eq!(aliased, "from openai");

    let sent: Value = serde_json::from_slice(&openai.received_requests().await.unwrap()[0].body)?;
    assert_eq!(sent["model"], "gpt-4o-mini");

    match gateway.complete(GatewayRequest::new("mystery", ask("hi"))).await {
        Err(GatewayError::ModelUnavailable { available, .. }) => {
            assert!(available.contains(&"gpt-4o".to_string()));
        }
        other => panic!("unexpected: {:?}", other),
    }
    Ok(())
}
