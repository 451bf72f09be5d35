//! Bearer-token suppliers for backends that authenticate per request.
//!
//! [`OAuthTokenCache`] runs the client-credentials grant against a workspace
//! token endpoint, keeps the token in memory until shortly before it expires,
//! and optionally persists it to disk so that separate processes can share it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Digest;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::ProviderError;

/// Tokens expiring within this window are treated as already expired
const REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    async fn get_token(&self) -> Result<String, ProviderError>;

    /// Forget the current token, e.g. after the backend rejected it
    async fn invalidate(&self);
}

/// A fixed token, such as a personal access token
pub struct StaticToken(String);

impl StaticToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialSupplier for StaticToken {
    async fn get_token(&self) -> Result<String, ProviderError> {
        Ok(self.0.clone())
    }

    async fn invalidate(&self) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct TokenData {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenData {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now()
            }
            None => true,
        }
    }
}

/// On-disk copy of a token, one file per host/client/scope combination
struct TokenStore {
    cache_path: PathBuf,
}

impl TokenStore {
    fn new(dir: &Path, host: &str, client_id: &str, scopes: &[String]) -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(client_id.as_bytes());
        hasher.update(scopes.join(",").as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        Self {
            cache_path: dir.join(format!("{}.json", hash)),
        }
    }

    fn load(&self) -> Option<TokenData> {
        let contents = fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str::<TokenData>(&contents)
            .ok()
            .filter(TokenData::is_fresh)
    }

    fn save(&self, token: &TokenData) -> std::io::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(token)?;
        fs::write(&self.cache_path, contents)
    }

    fn clear(&self) {
        let _ = fs::remove_file(&self.cache_path);
    }
}

pub struct OAuthTokenCache {
    client: Client,
    host: String,
    client_id: String,
    client_secret: Option<String>,
    scopes: Vec<String>,
    token_endpoint: Option<String>,
    store: Option<TokenStore>,
    cached: Mutex<Option<TokenData>>,
}

impl OAuthTokenCache {
    pub fn new(
        host: &str,
        client_id: &str,
        client_secret: Option<String>,
        scopes: Vec<String>,
    ) -> Result<Self, ProviderError> {
        if client_id.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "OAuth requires a client id".to_string(),
            ));
        }

        let client = Client::builder().timeout(TOKEN_REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret,
            scopes,
            token_endpoint: None,
            store: None,
            cached: Mutex::new(None),
        })
    }

    /// Skip discovery and use this token endpoint
    pub fn with_token_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Persist tokens under `dir`
    pub fn with_cache_dir(mut self, dir: &Path) -> Self {
        self.store = Some(TokenStore::new(
            dir,
            &self.host,
            &self.client_id,
            &self.scopes,
        ));
        self
    }

    async fn discover_token_endpoint(&self) -> Result<String, ProviderError> {
        let oidc_url = format!("{}/oidc/.well-known/oauth-authorization-server", self.host);

        let resp = self.client.get(&oidc_url).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "Failed to get OIDC configuration from {}",
                oidc_url
            )));
        }

        let oidc_config: Value = resp.json().await?;
        oidc_config
            .get("token_endpoint")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::Auth("token_endpoint not found in OIDC configuration".to_string())
            })
    }

    async fn request_token(&self) -> Result<TokenData, ProviderError> {
        let token_endpoint = match &self.token_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => self.discover_token_endpoint().await?,
        };

        let scope = self.scopes.join(" ");
        let params = [("grant_type", "client_credentials"), ("scope", scope.as_str())];

        let resp = self
            .client
            .post(&token_endpoint)
            .basic_auth(&self.client_id, self.client_secret.as_ref())
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Auth(format!(
                "Failed to obtain token: {}",
                err_text
            )));
        }

        let token_response: Value = resp.json().await?;
        let access_token = token_response
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::Auth("access_token not found in token response".to_string())
            })?
            .to_string();

        let expires_in = token_response
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok(TokenData {
            access_token,
            expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in as i64)),
        })
    }
}

#[async_trait]
impl CredentialSupplier for OAuthTokenCache {
    async fn get_token(&self) -> Result<String, ProviderError> {
        // Held across the refresh so concurrent callers share one token request
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        if let Some(token) = self.store.as_ref().and_then(TokenStore::load) {
            tracing::debug!(host = %self.host, "using persisted OAuth token");
            let access_token = token.access_token.clone();
            *cached = Some(token);
            return Ok(access_token);
        }

        tracing::debug!(host = %self.host, client_id = %self.client_id, "requesting OAuth token");
        let token = self.request_token().await?;
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&token) {
                tracing::warn!(error = %e, "could not persist OAuth token");
            }
        }
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        *cached = None;
        if let Some(store) = &self.store {
            store.clear();
        }
    }
}
