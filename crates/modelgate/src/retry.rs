//! Failure classification and bounded backoff around a single backend call.

use std::future::Future;
use std::time::Duration;

use crate::errors::{ErrorClass, GatewayError, ProviderError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Number of alternative models mentioned in a remediation hint
const HINT_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait before retry `retry` (0-based): `base_delay * 2^retry`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1_u32 << retry.min(31);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable class, or
    /// the attempts run out. The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 0_u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let class = classify(&error);
                    if !class.is_retryable() || attempt + 1 >= attempts {
                        return Err(error);
                    }

                    let delay = self.delay_for_retry(attempt);
                    tracing::warn!(
                        target_call = label,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying backend call after rate limit"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Sort a backend failure into a retry class using its status code first and
/// the message text second.
pub fn classify(error: &ProviderError) -> ErrorClass {
    match error {
        ProviderError::Http { status, message } => match status {
            429 | 529 => ErrorClass::RateLimited,
            401 | 403 => ErrorClass::AuthFailure,
            404 => ErrorClass::ModelUnavailable,
            408 | 502 | 503 | 504 => ErrorClass::TransientConnection,
            _ => classify_message(message),
        },
        ProviderError::Transport(_) | ProviderError::Timeout(_) => {
            ErrorClass::TransientConnection
        }
        ProviderError::Auth(_) => ErrorClass::AuthFailure,
        ProviderError::ContextLengthExceeded(_) | ProviderError::Configuration(_) => {
            ErrorClass::Fatal
        }
        ProviderError::InvalidResponse(message) => classify_message(message),
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has(&["rate limit", "rate_limit", "too many requests", "quota"]) {
        ErrorClass::RateLimited
    } else if has(&["unauthorized", "invalid api key", "invalid_api_key", "authentication"]) {
        ErrorClass::AuthFailure
    } else if has(&["not found", "does not exist", "unknown model", "model_not_found"]) {
        ErrorClass::ModelUnavailable
    } else if has(&["timed out", "connection", "handshake"]) {
        ErrorClass::TransientConnection
    } else {
        ErrorClass::Fatal
    }
}

/// Advice for the caller once a failure leaves the retry policy
pub fn remediation_hint(error: &ProviderError, alternatives: &[String]) -> Option<String> {
    let suggest = || {
        let models: Vec<&str> = alternatives
            .iter()
            .take(HINT_ALTERNATIVES)
            .map(String::as_str)
            .collect();
        if models.is_empty() {
            None
        } else {
            Some(models.join(", "))
        }
    };

    match classify(error) {
        ErrorClass::RateLimited => Some(match suggest() {
            Some(models) => format!("Still rate limited after retries; wait or try {}", models),
            None => "Still rate limited after retries; wait before trying again".to_string(),
        }),
        ErrorClass::AuthFailure => {
            Some("Check the credentials configured for this provider".to_string())
        }
        ErrorClass::ModelUnavailable => suggest().map(|models| format!("Try one of: {}", models)),
        ErrorClass::TransientConnection => Some(
            "The backend could not be reached; restart the request once it is available"
                .to_string(),
        ),
        ErrorClass::Fatal => match error {
            ProviderError::ContextLengthExceeded(_) => Some(
                "Shorten the conversation or pick a model with a larger context window"
                    .to_string(),
            ),
            _ => None,
        },
    }
}

/// Convert a failure that exhausted the policy into what the caller sees
pub fn surface(error: ProviderError, alternatives: &[String]) -> GatewayError {
    if let ProviderError::Configuration(message) = error {
        return GatewayError::Configuration { message };
    }
    GatewayError::Provider {
        class: classify(&error),
        hint: remediation_hint(&error, alternatives),
        message: error.to_string(),
    }
}
