use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

/// How a failed backend call is treated by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ErrorClass {
    RateLimited,
    AuthFailure,
    ModelUnavailable,
    TransientConnection,
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited)
    }
}

/// Errors reported by a backend integration
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            ProviderError::Configuration(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(err.to_string())
    }
}

/// Errors surfaced to the caller of the gateway
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("{class}: {message}")]
    Provider {
        class: ErrorClass,
        message: String,
        hint: Option<String>,
    },

    #[error("Model `{model}` is not served by any registered provider")]
    ModelUnavailable { model: String, available: Vec<String> },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl GatewayError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        GatewayError::Configuration {
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Provider { class, .. } => *class,
            GatewayError::ModelUnavailable { .. } => ErrorClass::ModelUnavailable,
            GatewayError::Configuration { .. } => ErrorClass::Fatal,
        }
    }

    /// What the caller could do about the failure, if anything
    pub fn hint(&self) -> Option<String> {
        match self {
            GatewayError::Provider { hint, .. } => hint.clone(),
            GatewayError::ModelUnavailable { available, .. } if !available.is_empty() => Some(
                format!("Available models: {}", available.join(", ")),
            ),
            GatewayError::ModelUnavailable { .. } => {
                Some("No providers are configured".to_string())
            }
            GatewayError::Configuration { .. } => None,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(message) => GatewayError::Configuration { message },
            other => GatewayError::Provider {
                class: crate::retry::classify(&other),
                message: other.to_string(),
                hint: None,
            },
        }
    }
}

/// Errors raised while executing a tool. These never leave the orchestrator;
/// they are turned into error payloads for the model to read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool `{0}`")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tool panicked: {0}")]
    Panicked(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
