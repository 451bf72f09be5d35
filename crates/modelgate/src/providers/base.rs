use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::{ToolCallRequest, ToolDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Sampling controls forwarded to the backend when set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub stop: Vec<String>,
}

/// One backend call: the history already encoded for the target provider
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub message: Message,
    pub usage: Usage,
}

/// An increment of a streamed response. Tool calls arrive whole, after the
/// provider has reassembled their fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    ToolCall(ToolCallRequest),
    Usage(Usage),
}

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, ProviderError>>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    OpenRouter,
    Ollama,
    Databricks,
}

/// What the router and transcoder need to know about a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    /// The provider can stream incremental deltas
    pub streaming: bool,
    /// The provider can stream while tool definitions are part of the request
    pub streams_with_tools: bool,
    /// The provider accepts structured multi-part content
    pub native_content: bool,
}

impl ProviderDescriptor {
    /// Whether a request with these tools should be streamed live
    pub fn streams(&self, has_tools: bool) -> bool {
        self.streaming && (!has_tools || self.streams_with_tools)
    }
}

/// Base trait for AI providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    fn descriptor(&self) -> ProviderDescriptor;

    /// Whether this provider serves the given (already normalized) model
    fn supports(&self, model: &str) -> bool;

    /// Models this provider advertises, used for diagnostics and remediation hints
    fn supported_models(&self) -> Vec<String>;

    /// Generate the next message in one round trip
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Stream the next message. Providers without incremental streaming replay
    /// a full completion as deltas.
    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let completion = self.complete(request).await?;
        Ok(completion_to_deltas(completion))
    }
}

pub fn completion_to_deltas(completion: Completion) -> DeltaStream {
    let Completion { message, usage } = completion;
    let mut deltas = Vec::new();
    if !message.text.is_empty() {
        deltas.push(Ok(StreamDelta::Text(message.text)));
    }
    deltas.extend(
        message
            .tool_calls
            .into_iter()
            .map(|call| Ok(StreamDelta::ToolCall(call))),
    );
    deltas.push(Ok(StreamDelta::Usage(usage)));
    stream::iter(deltas).boxed()
}
