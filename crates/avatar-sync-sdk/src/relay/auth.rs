//! Relay authentication
//!
//! Tokens are requested from `<relay http endpoint>/auth/createWithIdent`
//! with the SHA-256 of the secret key and the local identity hash, and are
//! cached per (endpoint, identity, secret) until the relay rejects them.

use crate::config::HttpClientConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const AUTH_PATH: &str = "/auth/createWithIdent";

/// Cache key of an auth token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub endpoint: String,
    pub identity: String,
    pub secret: String,
}

impl TokenKey {
    pub fn new(endpoint: impl Into<String>, identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

/// Issued tokens by key
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<TokenKey, String>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TokenKey) -> Option<String> {
        self.tokens.lock().get(key).cloned()
    }

    pub fn insert(&self, key: TokenKey, token: String) {
        self.tokens.lock().insert(key, token);
    }

    pub fn remove(&self, key: &TokenKey) -> Option<String> {
        self.tokens.lock().remove(key)
    }

    pub fn clear(&self) {
        self.tokens.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// Issues relay tokens
#[async_trait]
pub trait AuthTokenSource: Send + Sync {
    /// Fails with `Unauthorized` on 401 and `RateLimited` on 429.
    async fn request_token(&self, key: &TokenKey) -> Result<String>;
}

/// Uppercase hex SHA-256 of the secret key.
pub fn secret_digest(secret: &str) -> String {
    hex::encode_upper(Sha256::digest(secret.as_bytes()))
}

/// `ws://` → `http://`, `wss://` → `https://`, plus the auth path.
pub fn auth_endpoint(relay_url: &str) -> String {
    let base = if let Some(rest) = relay_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = relay_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        relay_url.to_string()
    };
    format!("{}{}", base.trim_end_matches('/'), AUTH_PATH)
}

/// `reqwest` implementation of [`AuthTokenSource`]
pub struct HttpAuthClient {
    client: Client,
}

impl HttpAuthClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        info!("✅ auth HTTP client created");
        Ok(Self { client })
    }
}

#[async_trait]
impl AuthTokenSource for HttpAuthClient {
    async fn request_token(&self, key: &TokenKey) -> Result<String> {
        let url = auth_endpoint(&key.endpoint);
        debug!("requesting relay token from {}", url);

        let digest = secret_digest(&key.secret);
        let form = [("auth", digest.as_str()), ("charaIdent", key.identity.as_str())];
        let response = self.client.post(&url).form(&form).send().await?;

        let status = response.status();
        let body = response.text().await?;
        match status {
            StatusCode::UNAUTHORIZED => {
                warn!("relay rejected the secret key: {}", body);
                Err(SyncError::Unauthorized(body))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(SyncError::RateLimited(body)),
            status if !status.is_success() => Err(SyncError::Http {
                status: status.as_u16(),
                message: body,
            }),
            _ => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_endpoint_scheme_mapping() {
        assert_eq!(
            auth_endpoint("wss://relay.example.com"),
            "https://relay.example.com/auth/createWithIdent"
        );
        assert_eq!(
            auth_endpoint("ws://localhost:6000/"),
            "http://localhost:6000/auth/createWithIdent"
        );
    }

    #[test]
    fn test_secret_digest_is_uppercase_sha256() {
        assert_eq!(
            secret_digest("abc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_token_cache_keys() {
        let cache = TokenCache::new();
        let key = TokenKey::new("wss://relay", "IDENT", "secret");
        cache.insert(key.clone(), "token".to_string());

        assert_eq!(cache.get(&key).as_deref(), Some("token"));
        assert!(cache.get(&TokenKey::new("wss://relay", "IDENT", "other")).is_none());
        assert_eq!(cache.remove(&key).as_deref(), Some("token"));
        assert!(cache.is_empty());
    }
}
