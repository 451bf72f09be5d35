use std::sync::Arc;

use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    databricks::DatabricksProvider, ollama::OllamaProvider, openai::OpenAiProvider,
    openrouter::OpenRouterProvider,
};
use crate::errors::ProviderError;

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::OpenRouter(openrouter_config) => {
            Ok(Arc::new(OpenRouterProvider::new(openrouter_config)?))
        }
        ProviderConfig::Ollama(ollama_config) => Ok(Arc::new(OllamaProvider::new(ollama_config)?)),
        ProviderConfig::Databricks(databricks_config) => {
            Ok(Arc::new(DatabricksProvider::new(databricks_config)?))
        }
    }
}
