use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::errors::ProviderError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const OPENROUTER_HOST: &str = "https://openrouter.ai/api";
pub const OLLAMA_HOST: &str = "http://localhost:11434";

pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "o1",
    "o3-mini",
];
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-latest",
    "claude-3-5-haiku-latest",
    "claude-3-opus-latest",
];
pub const OPENROUTER_MODELS: &[&str] = &[
    "openai/gpt-4o",
    "anthropic/claude-3.5-sonnet",
    "meta-llama/llama-3.1-70b-instruct",
];
pub const OLLAMA_MODELS: &[&str] = &["local:qwen2.5"];

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    OpenRouter(OpenRouterProviderConfig),
    Ollama(OllamaProviderConfig),
    Databricks(DatabricksProviderConfig),
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    /// Explicit allow-list; anything starting with `gpt-` is accepted too
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl OpenAiProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            models: to_strings(OPENAI_MODELS),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl AnthropicProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            models: to_strings(ANTHROPIC_MODELS),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterProviderConfig {
    pub host: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl OpenRouterProviderConfig {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            models: to_strings(OPENROUTER_MODELS),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl OllamaProviderConfig {
    pub fn new<H: Into<String>>(host: H) -> Self {
        Self {
            host: host.into(),
            models: to_strings(OLLAMA_MODELS),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DatabricksAuth {
    Token(String),
    OAuth {
        client_id: String,
        client_secret: Option<String>,
        scopes: Vec<String>,
        /// Discovered from the workspace when not set
        token_endpoint: Option<String>,
        /// Where tokens are persisted between runs; in-memory only when not set
        cache_dir: Option<PathBuf>,
    },
}

impl DatabricksAuth {
    pub fn token<S: Into<String>>(token: S) -> Self {
        DatabricksAuth::Token(token.into())
    }

    pub fn oauth<S: Into<String>>(client_id: S, client_secret: Option<String>) -> Self {
        DatabricksAuth::OAuth {
            client_id: client_id.into(),
            client_secret,
            scopes: vec!["all-apis".to_string()],
            token_endpoint: None,
            cache_dir: default_token_cache_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabricksProviderConfig {
    pub host: String,
    pub auth: DatabricksAuth,
    /// Serving endpoints advertised by this workspace
    pub endpoints: Vec<String>,
    pub timeout: Duration,
}

impl DatabricksProviderConfig {
    pub fn new<H: Into<String>>(host: H, auth: DatabricksAuth) -> Self {
        Self {
            host: host.into(),
            auth,
            endpoints: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub fn default_token_cache_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("modelgate").join("oauth"))
}

pub(crate) fn validate_host(provider: &str, host: &str) -> Result<(), ProviderError> {
    let url = Url::parse(host).map_err(|e| {
        ProviderError::Configuration(format!(
            "{} host `{}` is not a valid URL: {}",
            provider, host, e
        ))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ProviderError::Configuration(format!(
            "{} host `{}` must use http or https, not {}",
            provider, host, scheme
        ))),
    }
}

pub(crate) fn require_key(provider: &str, key: &str) -> Result<(), ProviderError> {
    if key.trim().is_empty() {
        return Err(ProviderError::Configuration(format!(
            "{} requires an API key",
            provider
        )));
    }
    Ok(())
}

fn to_strings(models: &[&str]) -> Vec<String> {
    models.iter().map(|m| m.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_host() {
        assert!(validate_host("openai", "https://api.openai.com").is_ok());
        assert!(validate_host("ollama", "http://localhost:11434").is_ok());
        assert!(matches!(
            validate_host("openai", "not a url"),
            Err(ProviderError::Configuration(_))
        ));
        assert!(matches!(
            validate_host("openai", "ftp://example.com"),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_require_key() {
        assert!(require_key("openai", "sk-test").is_ok());
        assert!(require_key("openai", "  ").is_err());
    }

    #[test]
    fn test_oauth_defaults() {
        match DatabricksAuth::oauth("client", None) {
            DatabricksAuth::OAuth { scopes, token_endpoint, .. } => {
                assert_eq!(scopes, vec!["all-apis".to_string()]);
                assert!(token_endpoint.is_none());
            }
            _ => panic!("expected oauth"),
        }
    }
}
