use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{
    Completion, CompletionRequest, DeltaStream, Provider, ProviderDescriptor, ProviderId,
};
use super::configs::{require_key, validate_host, OpenAiProviderConfig};
use super::utils::{
    check_status, handle_response, openai_completion, openai_payload, openai_response_stream,
    ImageFormat,
};
use crate::errors::ProviderError;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        validate_host("openai", &config.host)?;
        require_key("openai", &config.api_key)?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        tracing::debug!(provider = "openai", url = %url, "sending chat completion");
        Ok(self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(payload)
            .send()
            .await?)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::OpenAi,
            streaming: true,
            streams_with_tools: true,
            native_content: true,
        }
    }

    fn supports(&self, model: &str) -> bool {
        self.config.models.iter().any(|m| m == model) || model.starts_with("gpt-")
    }

    fn supported_models(&self) -> Vec<String> {
        self.config.models.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = openai_payload(&request.model, request, &ImageFormat::OpenAi, false)?;
        let response = handle_response(self.post(&payload).await?).await?;
        openai_completion("OpenAI", &response)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let mut payload = openai_payload(&request.model, request, &ImageFormat::OpenAi, true)?;
        payload["stream_options"] = json!({ "include_usage": true });
        let response = check_status(self.post(&payload).await?).await?;
        Ok(openai_response_stream(response))
    }
}
