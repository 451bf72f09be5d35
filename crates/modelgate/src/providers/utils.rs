use futures::stream::{BoxStream, Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use super::base::{Completion, CompletionRequest, DeltaStream, StreamDelta, Usage};
use crate::errors::ProviderError;
use crate::models::content::FilePart;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{ToolCallRequest, ToolDescriptor};
use crate::transcoder::render_file_part;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub enum ImageFormat {
    OpenAi,
    Anthropic,
}

/// Convert internal Message format to OpenAI's API message specification
///   some openai compatible endpoints use the anthropic image spec at the content level
///   even though the message structure is otherwise following openai, the enum switches this
pub fn messages_to_openai_spec(
    system: Option<&str>,
    messages: &[Message],
    image_format: &ImageFormat,
) -> Vec<Value> {
    let mut messages_spec = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages_spec.push(json!({ "role": "system", "content": system }));
    }

    for message in messages {
        match message.role {
            Role::Tool => messages_spec.push(json!({
                "role": "tool",
                "content": message.text,
                "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            })),
            Role::Assistant => {
                let mut converted = json!({ "role": "assistant" });
                converted["content"] = if message.text.is_empty() && message.has_tool_calls() {
                    Value::Null
                } else {
                    json!(message.text)
                };
                if message.has_tool_calls() {
                    let tool_calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": sanitize_function_name(&call.tool_name),
                                    "arguments": call.raw_arguments,
                                }
                            })
                        })
                        .collect();
                    converted["tool_calls"] = json!(tool_calls);
                }
                messages_spec.push(converted);
            }
            Role::System | Role::User => messages_spec.push(json!({
                "role": message.role.as_str(),
                "content": openai_content(message, image_format),
            })),
        }
    }

    messages_spec
}

fn openai_content(message: &Message, image_format: &ImageFormat) -> Value {
    if !message.is_multipart() {
        return json!(message.text);
    }

    let mut content = Vec::with_capacity(message.parts.len() + 1);
    if !message.text.is_empty() {
        content.push(json!({ "type": "text", "text": message.text }));
    }
    for part in &message.parts {
        if part.is_image() {
            content.push(convert_image(part, image_format));
        } else {
            content.push(json!({ "type": "text", "text": render_file_part(part) }));
        }
    }
    Value::Array(content)
}

/// Convert an image part into an image json based on format
pub fn convert_image(image: &FilePart, image_format: &ImageFormat) -> Value {
    match image_format {
        ImageFormat::OpenAi => json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.mime_type, image.to_base64())
            }
        }),
        ImageFormat::Anthropic => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.mime_type,
                "data": image.to_base64(),
            }
        }),
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[ToolDescriptor]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::with_capacity(tools.len());

    for tool in tools {
        let name = sanitize_function_name(&tool.name);
        if !tool_names.insert(name.clone()) {
            return Err(ProviderError::Configuration(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": name,
                "description": tool.description,
                "parameters": tool.input_schema(),
            }
        }));
    }

    Ok(result)
}

/// Build a chat-completions payload for the request
pub fn openai_payload(
    model: &str,
    request: &CompletionRequest,
    image_format: &ImageFormat,
    stream: bool,
) -> Result<Value, ProviderError> {
    let messages = messages_to_openai_spec(
        request.system.as_deref(),
        &request.messages,
        image_format,
    );
    let tools = tools_to_openai_spec(&request.tools)?;

    let mut payload = json!({
        "model": model,
        "messages": messages,
    });

    if !tools.is_empty() {
        payload["tools"] = json!(tools);
    }
    let params = &request.params;
    if let Some(temp) = params.temperature {
        payload["temperature"] = json!(temp);
    }
    if let Some(tokens) = params.max_tokens {
        payload["max_tokens"] = json!(tokens);
    }
    if let Some(top_p) = params.top_p {
        payload["top_p"] = json!(top_p);
    }
    if let Some(seed) = params.seed {
        payload["seed"] = json!(seed);
    }
    if !params.stop.is_empty() {
        payload["stop"] = json!(params.stop);
    }
    if stream {
        payload["stream"] = json!(true);
    }

    Ok(payload)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = &response["choices"][0]["message"];
    if original.is_null() {
        return Err(ProviderError::InvalidResponse(
            "response contained no choices".to_string(),
        ));
    }

    let mut message = Message::assistant();
    if let Some(text) = original.get("content").and_then(Value::as_str) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"]
                .as_str()
                .filter(|id| !id.is_empty())
                .map(String::from)
                .unwrap_or_else(generate_tool_call_id);
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            // Some compatible servers send arguments as an object rather than a string
            let arguments = match &tool_call["function"]["arguments"] {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            message = message.with_tool_call(ToolCallRequest::new(id, function_name, arguments));
        }
    }

    Ok(message)
}

pub fn get_openai_usage(data: &Value) -> Usage {
    match data.get("usage") {
        Some(usage) if !usage.is_null() => openai_usage(usage),
        _ => Usage::default(),
    }
}

fn openai_usage(usage: &Value) -> Usage {
    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}


pub fn generate_tool_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

pub fn check_bedrock_context_length_error(error: &Value) -> Option<ProviderError> {
    let external_message = error
        .get("external_model_message")?
        .get("message")?
        .as_str()?;
    if external_message.to_lowercase().contains("too long") {
        Some(ProviderError::ContextLengthExceeded(
            external_message.to_string(),
        ))
    } else {
        None
    }
}

/// Turn an `error` object embedded in a 200 response into a provider error
pub fn embedded_error(provider: &str, error: &Value) -> ProviderError {
    check_openai_context_length_error(error)
        .or_else(|| check_bedrock_context_length_error(error))
        .unwrap_or_else(|| {
            ProviderError::InvalidResponse(format!("{} API error: {}", provider, error))
        })
}

/// Parse a chat-completions body, raising any error object it carries
pub fn openai_completion(provider: &str, response: &Value) -> Result<Completion, ProviderError> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        return Err(embedded_error(provider, error));
    }
    Ok(Completion {
        message: openai_response_to_message(response)?,
        usage: get_openai_usage(response),
    })
}

/// Decode a streaming chat-completions response
pub fn openai_response_stream(response: reqwest::Response) -> DeltaStream {
    openai_delta_stream(sse_data(response.bytes_stream()))
}

/// Read a JSON body, or an `Http` error carrying the backend's message
pub async fn handle_response(response: reqwest::Response) -> Result<Value, ProviderError> {
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

/// Pass successful responses through; turn the rest into `Http` errors
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        message: error_message_from_body(&body),
    })
}

fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value["error"]["message"]
                .as_str()
                .or_else(|| value["error"].as_str())
                .or_else(|| value["message"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Split a server-sent-events byte stream into the payloads of its `data:` lines
pub fn sse_data<S, B, E>(bytes: S) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ProviderError> + Send,
{
    Box::pin(async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Into::into)?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(data) = data_line(&line) {
                    yield data;
                }
            }
        }

        if let Some(data) = data_line(&buffer) {
            yield data;
        }
    })
}

fn data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    line.strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn finish(self) -> ToolCallRequest {
        let id = if self.id.is_empty() {
            generate_tool_call_id()
        } else {
            self.id
        };
        ToolCallRequest::new(id, self.name, self.arguments)
    }
}

/// Decode chat-completions stream chunks. Text is forwarded as it arrives;
/// tool call fragments are stitched together and emitted once the stream ends.
pub fn openai_delta_stream(
    mut events: BoxStream<'static, Result<String, ProviderError>>,
) -> DeltaStream {
    Box::pin(async_stream::try_stream! {
        let mut partial: BTreeMap<u64, PartialToolCall> = BTreeMap::new();

        while let Some(data) = events.next().await {
            let data = data?;
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }

            let chunk: Value = serde_json::from_str(&data)?;
            if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
                Err(embedded_error("stream", error))?;
            }
            if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
                yield StreamDelta::Usage(openai_usage(usage));
            }

            let delta = &chunk["choices"][0]["delta"];
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    yield StreamDelta::Text(text.to_string());
                }
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let entry = partial.entry(index).or_default();
                    if let Some(id) = call.get("id").and_then(Value::as_str) {
                        entry.id = id.to_string();
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        entry.name.push_str(name);
                    }
                    if let Some(arguments) = call["function"]["arguments"].as_str() {
                        entry.arguments.push_str(arguments);
                    }
                }
            }
        }

        for (_, call) in partial {
            yield StreamDelta::ToolCall(call.finish());
        }
    })
}
