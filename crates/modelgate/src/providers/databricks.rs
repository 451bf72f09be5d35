use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;

use super::base::{Completion, CompletionRequest, Provider, ProviderDescriptor, ProviderId};
use super::configs::{validate_host, DatabricksAuth, DatabricksProviderConfig};
use super::oauth::{CredentialSupplier, OAuthTokenCache, StaticToken};
use super::utils::{handle_response, openai_completion, openai_payload, ImageFormat};
use crate::errors::ProviderError;

/// Serving endpoints of a self-hosted workspace, addressed as `name:tag`
pub struct DatabricksProvider {
    client: Client,
    config: DatabricksProviderConfig,
    credentials: Arc<dyn CredentialSupplier>,
}

impl DatabricksProvider {
    pub fn new(config: DatabricksProviderConfig) -> Result<Self, ProviderError> {
        validate_host("databricks", &config.host)?;

        let credentials: Arc<dyn CredentialSupplier> = match &config.auth {
            DatabricksAuth::Token(token) => {
                if token.trim().is_empty() {
                    return Err(ProviderError::Configuration(
                        "databricks requires a token".to_string(),
                    ));
                }
                Arc::new(StaticToken::new(token.clone()))
            }
            DatabricksAuth::OAuth {
                client_id,
                client_secret,
                scopes,
                token_endpoint,
                cache_dir,
            } => {
                let mut cache = OAuthTokenCache::new(
                    &config.host,
                    client_id,
                    client_secret.clone(),
                    scopes.clone(),
                )?;
                if let Some(endpoint) = token_endpoint {
                    cache = cache.with_token_endpoint(endpoint.clone());
                }
                if let Some(dir) = cache_dir {
                    cache = cache.with_cache_dir(dir);
                }
                Arc::new(cache)
            }
        };

        Self::with_credentials(config, credentials)
    }

    /// Use an externally owned credential supplier instead of `config.auth`
    pub fn with_credentials(
        config: DatabricksProviderConfig,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Result<Self, ProviderError> {
        validate_host("databricks", &config.host)?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!(
            "{}/serving-endpoints/{}/invocations",
            self.config.host.trim_end_matches('/'),
            urlencoding::encode(model)
        )
    }

    async fn send(&self, url: &str, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let token = self.credentials.get_token().await?;
        Ok(self
            .client
            .post(url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?)
    }

    async fn post(&self, model: &str, payload: &Value) -> Result<Value, ProviderError> {
        let url = self.endpoint_url(model);

        let mut response = self.send(&url, payload).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // The token may have been revoked before its advertised expiry
            tracing::debug!(provider = "databricks", "token rejected, refreshing once");
            self.credentials.invalidate().await;
            response = self.send(&url, payload).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                self.credentials.invalidate().await;
            }
        }

        handle_response(response).await
    }
}

#[async_trait]
impl Provider for DatabricksProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            id: ProviderId::Databricks,
            streaming: false,
            streams_with_tools: false,
            native_content: false,
        }
    }

    fn supports(&self, model: &str) -> bool {
        model.contains(':')
    }

    fn supported_models(&self) -> Vec<String> {
        self.config.endpoints.clone()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let mut payload =
            openai_payload(&request.model, request, &ImageFormat::Anthropic, false)?;
        // The endpoint is named in the URL
        if let Some(object) = payload.as_object_mut() {
            object.remove("model");
        }

        let response = self.post(&request.model, &payload).await?;
        openai_completion("Databricks", &response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::base::GenerationParams;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            system: Some("You are a helpful assistant.".to_string()),
            messages: vec![Message::user().with_text("Hello")],
            tools: vec![],
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn test_databricks_completion_with_token() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;

        let mock_response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                }
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 25,
                "total_tokens": 35
            }
        });

        let expected_request_body = json!({
            "messages": [
                {"role": "system", "content": "You are a helpful assistant."},
                {"role": "user", "content": "Hello"}
            ]
        });

        Mock::given(method("POST"))
            .and(path("/serving-endpoints/onprem-custom%3A20b/invocations"))
            .and(header("Authorization", "Bearer test_token"))
            .and(body_json(expected_request_body))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_response))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config =
            DatabricksProviderConfig::new(mock_server.uri(), DatabricksAuth::token("test_token"));
        let provider = DatabricksProvider::new(config)?;

        let completion = provider.complete(&request("onprem-custom:20b")).await?;

        assert_eq!(completion.message.text, "Hello!");
        assert_eq!(completion.usage.total_tokens, Some(35));
        Ok(())
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_and_retries_once() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oidc/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "rotated",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/serving-endpoints/model%3Av1/invocations"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error_code": "UNAUTHENTICATED",
                "message": "Invalid access token"
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let auth = DatabricksAuth::OAuth {
            client_id: "client".to_string(),
            client_secret: Some("secret".to_string()),
            scopes: vec!["all-apis".to_string()],
            token_endpoint: Some(format!("{}/oidc/v1/token", mock_server.uri())),
            cache_dir: None,
        };
        let provider =
            DatabricksProvider::new(DatabricksProviderConfig::new(mock_server.uri(), auth))?;

        let result = provider.complete(&request("model:v1")).await;
        match result {
            Err(ProviderError::Http { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid access token");
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.message)),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_bedrock_context_error() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {
                    "error": "Received error from amazon-bedrock",
                    "external_model_message": {
                        "message": "Input is too long for requested model."
                    }
                }
            })))
            .mount(&mock_server)
            .await;

        let provider = DatabricksProvider::new(DatabricksProviderConfig::new(
            mock_server.uri(),
            DatabricksAuth::token("t"),
        ))?;
        let result = provider.complete(&request("claude:bedrock")).await;
        assert!(matches!(result, Err(ProviderError::ContextLengthExceeded(_))));
        Ok(())
    }

    #[test]
    fn test_empty_token_is_configuration_error() {
        let result = DatabricksProvider::new(DatabricksProviderConfig::new(
            "https://example.cloud.databricks.com",
            DatabricksAuth::token(""),
        ));
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }
}
