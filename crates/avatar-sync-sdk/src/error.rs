use thiserror::Error;

/// Errors surfaced by the sync core.
///
/// Transport and HTTP faults are retryable; `Unauthorized` and
/// `VersionMismatch` park the relay controller until an explicit reconnect.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The tracked entity disappeared while its snapshot was being read.
    #[error("entity unavailable: {0}")]
    EntityUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error [{status}]: {message}")]
    Http { status: u16, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("protocol version mismatch: expected {expected}, server speaks {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// Operation on a relationship or group the store does not know about.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not connected")]
    NotConnected,

    #[error("no secret key configured for {0}")]
    NoSecretKey(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => {
                SyncError::Unauthorized(error.to_string())
            }
            Some(status) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                SyncError::RateLimited(error.to_string())
            }
            Some(status) => SyncError::Http {
                status: status.as_u16(),
                message: error.to_string(),
            },
            None if error.is_timeout() => SyncError::Timeout(error.to_string()),
            None => SyncError::Transport(error.to_string()),
        }
    }
}

impl SyncError {
    /// Whether the relay controller should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Http { .. }
                | SyncError::RateLimited(_)
                | SyncError::Timeout(_)
                | SyncError::NotConnected
                | SyncError::Other(_)
        )
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        SyncError::InvalidState(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
