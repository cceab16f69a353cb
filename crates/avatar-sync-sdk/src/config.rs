//! SDK configuration
//!
//! `SyncConfig` carries the relay endpoint, per-identity secret keys and every
//! timing knob of the scheduler and the relay controller. Build it with
//! [`SyncConfig::builder`].

use crate::error::{Result, SyncError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Relay endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Relay URL, `ws://` or `wss://`
    pub url: String,
    /// Display name of the relay
    pub name: String,
    /// Secret used when no identity-specific key is configured
    pub default_secret_key: Option<String>,
    /// Secret keys by local identity hash
    pub secret_keys: HashMap<String, String>,
    /// Keep the connection closed while set
    pub full_pause: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "wss://relay.example.com".to_string(),
            name: "Default relay".to_string(),
            default_secret_key: None,
            secret_keys: HashMap::new(),
            full_pause: false,
        }
    }
}

/// Relay connection timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTimings {
    /// Liveness check interval while connected
    pub health_check_interval: Duration,
    /// Lower bound of the randomized reconnect delay
    pub retry_delay_min: Duration,
    /// Upper bound of the randomized reconnect delay
    pub retry_delay_max: Duration,
    /// Fixed delay of the transport's own reconnect attempts
    pub transport_retry_delay: Duration,
    /// Poll interval while no secret key is configured
    pub secret_key_poll_interval: Duration,
    /// Poll interval while waiting for the local player to be present
    pub player_present_poll_interval: Duration,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            retry_delay_min: Duration::from_secs(5),
            retry_delay_max: Duration::from_secs(20),
            transport_retry_delay: Duration::from_secs(5),
            secret_key_poll_interval: Duration::from_secs(2),
            player_present_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Manifest creation timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Debounce window for palette changes
    pub palette_debounce: Duration,
    /// Upper bound for one path-resolution oracle call
    pub oracle_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            palette_debounce: Duration::from_secs(1),
            oracle_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client configuration for the auth endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

/// SDK configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub server: ServerConfig,
    pub timings: ConnectionTimings,
    pub resolver: ResolverConfig,
    pub http_client: HttpClientConfig,
    /// Protocol version the relay must report
    pub expected_protocol_version: u32,
    /// Event channel capacity
    pub event_buffer_size: usize,
    pub debug_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timings: ConnectionTimings::default(),
            resolver: ResolverConfig::default(),
            http_client: HttpClientConfig::default(),
            expected_protocol_version: crate::version::PROTOCOL_VERSION,
            event_buffer_size: 1000,
            debug_mode: false,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.trim();
        if url.is_empty() {
            return Err(SyncError::Config("server url is empty".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SyncError::Config(format!("unsupported relay url: {}", url)));
        }
        if self.timings.retry_delay_min > self.timings.retry_delay_max {
            return Err(SyncError::Config(format!(
                "retry window inverted: {:?} > {:?}",
                self.timings.retry_delay_min, self.timings.retry_delay_max
            )));
        }
        if self.event_buffer_size == 0 {
            return Err(SyncError::Config("event buffer size must be non-zero".to_string()));
        }
        Ok(())
    }
}

pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.server.url = url.into();
        self
    }

    pub fn server_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.server.name = name.into();
        self
    }

    pub fn default_secret_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.server.default_secret_key = Some(key.into());
        self
    }

    /// Secret key used when the local identity hash matches
    pub fn secret_key_for<I: Into<String>, S: Into<String>>(mut self, identity: I, key: S) -> Self {
        self.config.server.secret_keys.insert(identity.into(), key.into());
        self
    }

    pub fn full_pause(mut self, paused: bool) -> Self {
        self.config.server.full_pause = paused;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.timings.health_check_interval = interval;
        self
    }

    pub fn retry_delay(mut self, min: Duration, max: Duration) -> Self {
        self.config.timings.retry_delay_min = min;
        self.config.timings.retry_delay_max = max;
        self
    }

    pub fn transport_retry_delay(mut self, delay: Duration) -> Self {
        self.config.timings.transport_retry_delay = delay;
        self
    }

    pub fn secret_key_poll_interval(mut self, interval: Duration) -> Self {
        self.config.timings.secret_key_poll_interval = interval;
        self
    }

    pub fn player_present_poll_interval(mut self, interval: Duration) -> Self {
        self.config.timings.player_present_poll_interval = interval;
        self
    }

    pub fn palette_debounce(mut self, window: Duration) -> Self {
        self.config.resolver.palette_debounce = window;
        self
    }

    pub fn oracle_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolver.oracle_timeout = timeout;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client = config;
        self
    }

    pub fn expected_protocol_version(mut self, version: u32) -> Self {
        self.config.expected_protocol_version = version;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime view of the server section that can change while connected.
///
/// The relay controller polls it for a secret key and the full-pause switch.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    inner: Arc<RwLock<ServerConfig>>,
}

impl ServerSettings {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn url(&self) -> String {
        self.inner.read().url.clone()
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    pub fn is_full_pause(&self) -> bool {
        self.inner.read().full_pause
    }

    pub fn set_full_pause(&self, paused: bool) {
        self.inner.write().full_pause = paused;
    }

    /// Secret for `identity`, falling back to the default key.
    pub fn secret_key(&self, identity: &str) -> Option<String> {
        let server = self.inner.read();
        server
            .secret_keys
            .get(identity)
            .or(server.default_secret_key.as_ref())
            .filter(|key| !key.is_empty())
            .cloned()
    }

    pub fn set_secret_key(&self, identity: impl Into<String>, key: impl Into<String>) {
        self.inner.write().secret_keys.insert(identity.into(), key.into());
    }

    pub fn set_default_secret_key(&self, key: Option<String>) {
        self.inner.write().default_secret_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SyncConfig::builder()
            .server_url("wss://relay.test")
            .build()
            .unwrap();
        assert_eq!(config.timings.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.timings.retry_delay_min, Duration::from_secs(5));
        assert_eq!(config.timings.retry_delay_max, Duration::from_secs(20));
        assert_eq!(config.resolver.palette_debounce, Duration::from_secs(1));
        assert_eq!(config.expected_protocol_version, crate::version::PROTOCOL_VERSION);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SyncConfig::builder().server_url("").build().is_err());
        assert!(SyncConfig::builder().server_url("http://relay.test").build().is_err());
        assert!(SyncConfig::builder()
            .server_url("ws://relay.test")
            .retry_delay(Duration::from_secs(20), Duration::from_secs(5))
            .build()
            .is_err());
    }

    #[test]
    fn test_secret_key_lookup() {
        let config = SyncConfig::builder()
            .server_url("wss://relay.test")
            .default_secret_key("fallback")
            .secret_key_for("ABC", "specific")
            .build()
            .unwrap();
        let settings = ServerSettings::new(config.server);
        assert_eq!(settings.secret_key("ABC").as_deref(), Some("specific"));
        assert_eq!(settings.secret_key("XYZ").as_deref(), Some("fallback"));

        settings.set_default_secret_key(None);
        assert_eq!(settings.secret_key("XYZ"), None);
        settings.set_secret_key("XYZ", "late");
        assert_eq!(settings.secret_key("XYZ").as_deref(), Some("late"));
    }
}
