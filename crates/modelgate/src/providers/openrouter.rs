use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::base::{
    Completion, CompletionRequest, DeltaStream, Provider, ProviderDescriptor, ProviderId,
};
use super::configs::{require_key, validate_host, OpenRouterProviderConfig};
use super::utils::{
    check_status, handle_response, openai_completion, openai_payload, openai_response_stream,
    ImageFormat,
};
use crate::errors::ProviderError;

const APP_URL: &str = "https://github.com/modelgate/modelgate";
const APP_TITLE: &str = "modelgate";

/// Hosted aggregator addressed with `vendor/model` identifiers
pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterProviderConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterProviderConfig) -> Result<Self, ProviderError> {
        validate_host("openrouter", &config.host)?;
        require_key("openrouter", &config.api_key)?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        Ok(self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", APP_URL)
            .header("X-Title", APP_TITLE)
            .json(payload)
            .send()
            .await?)
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::OpenRouter,
            streaming: true,
            streams_with_tools: true,
            native_content: true,
        }
    }

    fn supports(&self, model: &str) -> bool {
        model.contains('/')
    }

    fn supported_models(&self) -> Vec<String> {
        self.config.models.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = openai_payload(&request.model, request, &ImageFormat::OpenAi, false)?;
        let response = handle_response(self.post(&payload).await?).await?;
        openai_completion("OpenRouter", &response)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let payload = openai_payload(&request.model, request, &ImageFormat::OpenAi, true)?;
        let response = check_status(self.post(&payload).await?).await?;
        Ok(openai_response_stream(response))
    }
}
