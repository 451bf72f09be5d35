use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::errors::{GatewayError, ProviderError};
use crate::gateway::{GatewayConfig, FALLBACK_MESSAGE, MAX_ITERATIONS};
use crate::providers::configs::{
    default_token_cache_dir, AnthropicProviderConfig, DatabricksAuth, DatabricksProviderConfig,
    OllamaProviderConfig, OpenAiProviderConfig, OpenRouterProviderConfig, ProviderConfig,
    ANTHROPIC_HOST, OLLAMA_HOST, OPENAI_HOST, OPENROUTER_HOST,
};
use crate::providers::factory::get_provider;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::router::ProviderRegistry;
use crate::sandbox::DEFAULT_TOOL_TIMEOUT;

const ENV_PREFIX: &str = "MODELGATE";
const DEFAULT_FILE: &str = "modelgate";
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Missing required setting `{field}`")]
    MissingField { field: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: Option<u64>,
    pub fallback_message: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: None,
            fallback_message: FALLBACK_MESSAGE.to_string(),
        }
    }
}

impl GatewaySettings {
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut retry = RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        );
        if let Some(max) = self.retry_max_delay_ms {
            retry = retry.with_max_delay(Duration::from_millis(max));
        }
        GatewayConfig {
            max_iterations: self.max_iterations,
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            retry,
            fallback_message: self.fallback_message.clone(),
        }
    }
}

/// A hosted API authenticated with a key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostedSettings {
    pub host: Option<String>,
    pub api_key: Option<String>,
    /// Replaces the built-in model list when set
    pub models: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl HostedSettings {
    fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: Option<String>,
    pub models: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabricksSettings {
    pub host: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub token_cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersSettings {
    pub openai: Option<HostedSettings>,
    pub anthropic: Option<HostedSettings>,
    pub openrouter: Option<HostedSettings>,
    pub ollama: Option<OllamaSettings>,
    pub databricks: Option<DatabricksSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub providers: ProvidersSettings,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Settings {
    /// Load `modelgate.toml` from the working directory if present, then the environment
    pub fn new() -> Result<Self, SettingsError> {
        Self::load(None)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let builder = Config::builder()
            .set_default("gateway.max_iterations", MAX_ITERATIONS as i64)?
            .set_default("gateway.max_retries", DEFAULT_MAX_RETRIES as i64)?
            .set_default("gateway.retry_base_delay_ms", DEFAULT_RETRY_BASE_DELAY_MS as i64)?;

        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_FILE).required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                match missing_field(&error_str) {
                    Some(field) => Err(SettingsError::MissingField {
                        field: field.to_string(),
                    }),
                    None => Err(SettingsError::Other(err)),
                }
            }
        }
    }

    /// Provider configurations in routing priority order. Sections without
    /// credentials are skipped.
    pub fn provider_configs(&self) -> Result<Vec<ProviderConfig>, ProviderError> {
        let providers = &self.providers;
        let mut configs = Vec::new();

        if let Some(settings) = &providers.openai {
            match settings.key() {
                Some(key) => {
                    let mut config =
                        OpenAiProviderConfig::new(host_or(&settings.host, OPENAI_HOST), key);
                    apply_hosted(settings, &mut config.models, &mut config.timeout);
                    configs.push(ProviderConfig::OpenAi(config));
                }
                None => skip("openai"),
            }
        }

        if let Some(settings) = &providers.anthropic {
            match settings.key() {
                Some(key) => {
                    let mut config =
                        AnthropicProviderConfig::new(host_or(&settings.host, ANTHROPIC_HOST), key);
                    apply_hosted(settings, &mut config.models, &mut config.timeout);
                    configs.push(ProviderConfig::Anthropic(config));
                }
                None => skip("anthropic"),
            }
        }

        if let Some(settings) = &providers.openrouter {
            match settings.key() {
                Some(key) => {
                    let host = host_or(&settings.host, OPENROUTER_HOST);
                    let mut config = OpenRouterProviderConfig::new(host, key);
                    apply_hosted(settings, &mut config.models, &mut config.timeout);
                    configs.push(ProviderConfig::OpenRouter(config));
                }
                None => skip("openrouter"),
            }
        }

        if let Some(settings) = &providers.ollama {
            let mut config = OllamaProviderConfig::new(host_or(&settings.host, OLLAMA_HOST));
            if !settings.models.is_empty() {
                config.models = settings.models.clone();
            }
            if let Some(secs) = settings.timeout_secs {
                config.timeout = Duration::from_secs(secs);
            }
            configs.push(ProviderConfig::Ollama(config));
        }

        if let Some(settings) = &providers.databricks {
            match databricks_auth(settings)? {
                Some(auth) => {
                    let mut config = DatabricksProviderConfig::new(settings.host.clone(), auth);
                    config.endpoints = settings.endpoints.clone();
                    if let Some(secs) = settings.timeout_secs {
                        config.timeout = Duration::from_secs(secs);
                    }
                    configs.push(ProviderConfig::Databricks(config));
                }
                None => skip("databricks"),
            }
        }

        Ok(configs)
    }
}

fn missing_field(error: &str) -> Option<&str> {
    let rest = error.split_once("missing field `")?.1;
    rest.split_once('`').map(|(field, _)| field)
}

fn host_or(host: &Option<String>, default: &str) -> String {
    host.clone().unwrap_or_else(|| default.to_string())
}

fn apply_hosted(settings: &HostedSettings, models: &mut Vec<String>, timeout: &mut Duration) {
    if !settings.models.is_empty() {
        *models = settings.models.clone();
    }
    if let Some(secs) = settings.timeout_secs {
        *timeout = Duration::from_secs(secs);
    }
}

fn skip(provider: &str) {
    tracing::debug!(provider, "no credentials configured, provider not registered");
}

fn databricks_auth(settings: &DatabricksSettings) -> Result<Option<DatabricksAuth>, ProviderError> {
    if let Some(token) = settings.token.as_deref().filter(|t| !t.trim().is_empty()) {
        return Ok(Some(DatabricksAuth::token(token)));
    }

    match settings.client_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(client_id) => {
            let scopes = if settings.scopes.is_empty() {
                vec!["all-apis".to_string()]
            } else {
                settings.scopes.clone()
            };
            Ok(Some(DatabricksAuth::OAuth {
                client_id: client_id.to_string(),
                client_secret: settings.client_secret.clone(),
                scopes,
                token_endpoint: settings.token_endpoint.clone(),
                cache_dir: settings
                    .token_cache_dir
                    .clone()
                    .or_else(default_token_cache_dir),
            }))
        }
        None if settings.client_secret.is_some() => Err(ProviderError::Configuration(
            "databricks client_secret is set without a client_id".to_string(),
        )),
        None => Ok(None),
    }
}

impl ProviderRegistry {
    /// Build the registry for these settings, constructing every configured provider
    pub fn from_settings(settings: &Settings) -> Result<Self, GatewayError> {
        let mut builder = ProviderRegistry::builder();
        for config in settings.provider_configs()? {
            builder = builder.register(get_provider(config)?);
        }
        builder
            .aliases(settings.aliases.clone())
            .build()
    }
}
