use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::base::{
    Completion, CompletionRequest, DeltaStream, Provider, ProviderDescriptor, ProviderId,
    StreamDelta, Usage,
};
use super::configs::{require_key, validate_host, AnthropicProviderConfig};
use super::utils::{
    check_status, convert_image, generate_tool_call_id, handle_response, sanitize_function_name,
    sse_data, ImageFormat,
};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{ToolCallRequest, ToolDescriptor};
use crate::transcoder::render_file_part;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self, ProviderError> {
        validate_host("anthropic", &config.host)?;
        require_key("anthropic", &config.api_key)?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];
        let input_tokens = usage["input_tokens"].as_i64().map(|v| v as i32);
        let output_tokens = usage["output_tokens"].as_i64().map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        Ok(self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .await?)
    }
}

/// System text lives outside the message list; system-role history entries
/// are folded into it.
fn system_prompt(request: &CompletionRequest) -> Option<String> {
    let mut blocks: Vec<&str> = Vec::new();
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        blocks.push(system);
    }
    blocks.extend(
        request
            .messages
            .iter()
            .filter(|m| m.role == Role::System && !m.text.is_empty())
            .map(|m| m.text.as_str()),
    );
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => continue,
            Role::User => {
                let content = if message.is_multipart() {
                    let mut blocks = Vec::new();
                    if !message.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.text}));
                    }
                    for part in &message.parts {
                        if part.is_image() {
                            blocks.push(convert_image(part, &ImageFormat::Anthropic));
                        } else {
                            blocks.push(json!({"type": "text", "text": render_file_part(part)}));
                        }
                    }
                    Value::Array(blocks)
                } else {
                    json!(message.text)
                };
                spec.push(json!({"role": "user", "content": content}));
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.text.is_empty() {
                    blocks.push(json!({"type": "text", "text": message.text}));
                }
                for call in &message.tool_calls {
                    let input = serde_json::from_str::<Value>(&call.raw_arguments)
                        .ok()
                        .filter(Value::is_object)
                        .unwrap_or_else(|| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": sanitize_function_name(&call.tool_name),
                        "input": input,
                    }));
                }
                spec.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.text,
                });
                // Results answering one assistant turn share a single user message
                let grouped = spec.last().map_or(false, is_tool_result_message);
                match spec.last_mut().and_then(|last| last["content"].as_array_mut()) {
                    Some(content) if grouped => content.push(block),
                    _ => spec.push(json!({"role": "user", "content": [block]})),
                }
            }
        }
    }

    spec
}

fn is_tool_result_message(value: &Value) -> bool {
    value["role"] == "user" && value["content"][0]["type"] == "tool_result"
}

pub fn tools_to_anthropic_spec(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": sanitize_function_name(&tool.name),
                "description": tool.description,
                "input_schema": tool.input_schema(),
            })
        })
        .collect()
}

fn anthropic_payload(request: &CompletionRequest, stream: bool) -> Value {
    let params = &request.params;
    let mut payload = json!({
        "model": request.model,
        "messages": messages_to_anthropic_spec(&request.messages),
        "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let Some(system) = system_prompt(request) {
        payload["system"] = json!(system);
    }
    if !request.tools.is_empty() {
        payload["tools"] = json!(tools_to_anthropic_spec(&request.tools));
    }
    if let Some(temp) = params.temperature {
        payload["temperature"] = json!(temp);
    }
    if let Some(top_p) = params.top_p {
        payload["top_p"] = json!(top_p);
    }
    if !params.stop.is_empty() {
        payload["stop_sequences"] = json!(params.stop);
    }
    if stream {
        payload["stream"] = json!(true);
    }
    payload
}

pub fn anthropic_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let blocks = response["content"].as_array().ok_or_else(|| {
        ProviderError::InvalidResponse("Anthropic response has no content".to_string())
    })?;

    let mut message = Message::assistant();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                message.text.push_str(block["text"].as_str().unwrap_or_default());
            }
            Some("tool_use") => {
                let id = block["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(generate_tool_call_id);
                let name = block["name"].as_str().unwrap_or_default();
                message = message.with_tool_call(ToolCallRequest::new(
                    id,
                    name,
                    block["input"].to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(message)
}

fn anthropic_error(error: &Value) -> ProviderError {
    let kind = error["type"].as_str().unwrap_or("error");
    let message = error["message"].as_str().unwrap_or("unknown error");
    match kind {
        "rate_limit_error" => ProviderError::Http {
            status: 429,
            message: message.to_string(),
        },
        "overloaded_error" => ProviderError::Http {
            status: 529,
            message: message.to_string(),
        },
        "authentication_error" => ProviderError::Auth(message.to_string()),
        "not_found_error" => ProviderError::Http {
            status: 404,
            message: message.to_string(),
        },
        _ if message.contains("prompt is too long") => {
            ProviderError::ContextLengthExceeded(message.to_string())
        }
        _ => ProviderError::InvalidResponse(format!("Anthropic API error: {}", message)),
    }
}

#[derive(Debug, Default)]
struct ToolUseBlock {
    id: String,
    name: String,
    input_json: String,
}

/// Decode Anthropic message events. `tool_use` blocks are buffered until
/// their `content_block_stop` arrives.
fn anthropic_delta_stream(
    mut events: BoxStream<'static, Result<String, ProviderError>>,
) -> DeltaStream {
    Box::pin(async_stream::try_stream! {
        let mut blocks: BTreeMap<u64, ToolUseBlock> = BTreeMap::new();
        let mut input_tokens: Option<i32> = None;

        while let Some(data) = events.next().await {
            let data = data?;
            if data.is_empty() {
                continue;
            }
            let event: Value = serde_json::from_str(&data)?;
            let index = event["index"].as_u64().unwrap_or(0);

            match event["type"].as_str().unwrap_or_default() {
                "message_start" => {
                    input_tokens = event["message"]["usage"]["input_tokens"]
                        .as_i64()
                        .map(|v| v as i32);
                }
                "content_block_start" => {
                    let block = &event["content_block"];
                    if block["type"] == "tool_use" {
                        blocks.insert(index, ToolUseBlock {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            input_json: String::new(),
                        });
                    }
                }
                "content_block_delta" => {
                    let delta = &event["delta"];
                    match delta["type"].as_str().unwrap_or_default() {
                        "text_delta" => {
                            let text = delta["text"].as_str().unwrap_or_default();
                            if !text.is_empty() {
                                yield StreamDelta::Text(text.to_string());
                            }
                        }
                        "input_json_delta" => {
                            if let Some(block) = blocks.get_mut(&index) {
                                let fragment = delta["partial_json"].as_str().unwrap_or_default();
                                block.input_json.push_str(fragment);
                            }
                        }
                        _ => {}
                    }
                }
                "content_block_stop" => {
                    if let Some(block) = blocks.remove(&index) {
                        let id = if block.id.is_empty() {
                            generate_tool_call_id()
                        } else {
                            block.id
                        };
                        let arguments = if block.input_json.is_empty() {
                            "{}".to_string()
                        } else {
                            block.input_json
                        };
                        let call = ToolCallRequest::new(id, block.name, arguments);
                        yield StreamDelta::ToolCall(call);
                    }
                }
                "message_delta" => {
                    let output_tokens = event["usage"]["output_tokens"].as_i64().map(|v| v as i32);
                    let total_tokens = match (input_tokens, output_tokens) {
                        (Some(input), Some(output)) => Some(input + output),
                        _ => None,
                    };
                    yield StreamDelta::Usage(Usage::new(input_tokens, output_tokens, total_tokens));
                }
                "message_stop" => break,
                "error" => {
                    Err(anthropic_error(&event["error"]))?;
                }
                _ => {}
            }
        }
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::Anthropic,
            streaming: true,
            streams_with_tools: true,
            native_content: true,
        }
    }

    fn supports(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    fn supported_models(&self) -> Vec<String> {
        self.config.models.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = anthropic_payload(request, false);
        let response = handle_response(self.post(&payload).await?).await?;

        if response["type"] == "error" {
            return Err(anthropic_error(&response["error"]));
        }

        Ok(Completion {
            message: anthropic_response_to_message(&response)?,
            usage: Self::get_usage(&response),
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let payload = anthropic_payload(request, true);
        let response = check_status(self.post(&payload).await?).await?;
        Ok(anthropic_delta_stream(sse_data(response.bytes_stream())))
    }
}
