use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::base::{
    Completion, CompletionRequest, DeltaStream, Provider, ProviderDescriptor, ProviderId,
};
use super::configs::{validate_host, OllamaProviderConfig};
use super::utils::{
    check_status, handle_response, openai_completion, openai_payload, openai_response_stream,
    ImageFormat,
};
use crate::errors::ProviderError;

/// Model identifiers routed to the local runtime carry this prefix
pub const LOCAL_PREFIX: &str = "local:";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self, ProviderError> {
        validate_host("ollama", &config.host)?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// The model name as the local runtime knows it
    fn runtime_model(model: &str) -> &str {
        model.strip_prefix(LOCAL_PREFIX).unwrap_or(model)
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        Ok(self.client.post(&url).json(payload).send().await?)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        // The OpenAI-compatible endpoint does not stream tool calls
        ProviderDescriptor {
            id: ProviderId::Ollama,
            streaming: true,
            streams_with_tools: false,
            native_content: false,
        }
    }

    fn supports(&self, model: &str) -> bool {
        model.starts_with(LOCAL_PREFIX)
    }

    fn supported_models(&self) -> Vec<String> {
        self.config.models.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let model = Self::runtime_model(&request.model);
        let payload = openai_payload(model, request, &ImageFormat::OpenAi, false)?;
        let response = handle_response(self.post(&payload).await?).await?;
        openai_completion("Ollama", &response)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let model = Self::runtime_model(&request.model);
        let payload = openai_payload(model, request, &ImageFormat::OpenAi, true)?;
        let response = check_status(self.post(&payload).await?).await?;
        Ok(openai_response_stream(response))
    }
}
