//! Relay connection state
//!
//! Holds everything the relay controller knows about the current session:
//! - protocol state (observable through a watch channel)
//! - connection descriptor returned by the relay
//! - latest system info push
//! - last authentication failure text, for the UI layer

use crate::protocol::{ConnectionDescriptor, SystemInfoDto};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Relay connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Offline,
    Connecting,
    Connected,
    Reconnecting,
    /// Deliberately disconnected (full pause or explicit stop)
    Disconnected,
    Unauthorized,
    VersionMismatch,
    RateLimited,
    NoSecretKey,
}

impl ServerState {
    /// States that end the connect loop until an explicit reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerState::Unauthorized | ServerState::VersionMismatch | ServerState::Disconnected
        )
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Offline => write!(f, "Offline"),
            ServerState::Connecting => write!(f, "Connecting"),
            ServerState::Connected => write!(f, "Connected"),
            ServerState::Reconnecting => write!(f, "Reconnecting"),
            ServerState::Disconnected => write!(f, "Disconnected"),
            ServerState::Unauthorized => write!(f, "Unauthorized"),
            ServerState::VersionMismatch => write!(f, "Version mismatch"),
            ServerState::RateLimited => write!(f, "Rate limited"),
            ServerState::NoSecretKey => write!(f, "No secret key"),
        }
    }
}

/// Session details that accompany the state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub descriptor: Option<ConnectionDescriptor>,
    pub system_info: SystemInfoDto,
    pub auth_failure_message: Option<String>,
    /// Connection established time (UTC millis)
    pub connected_at: Option<i64>,
}

/// Thread-safe connection state manager
#[derive(Debug, Clone)]
pub struct ConnectionStateManager {
    state: Arc<watch::Sender<ServerState>>,
    session: Arc<RwLock<SessionInfo>>,
}

impl ConnectionStateManager {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ServerState::Offline);
        Self {
            state: Arc::new(state),
            session: Arc::new(RwLock::new(SessionInfo::default())),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Stores `new_state` and returns the previous state if it changed.
    pub fn set_state(&self, new_state: ServerState) -> Option<ServerState> {
        let old_state = self.state.send_replace(new_state);
        if new_state == ServerState::Connected && old_state != ServerState::Connected {
            self.session.write().connected_at = Some(Utc::now().timestamp_millis());
        } else if new_state != ServerState::Connected {
            self.session.write().connected_at = None;
        }
        (old_state != new_state).then_some(old_state)
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Resolves once the state satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> ServerState
    where
        F: Fn(&ServerState) -> bool,
    {
        let mut receiver = self.state.subscribe();
        let reached = match receiver.wait_for(|state| predicate(state)).await {
            Ok(state) => *state,
            // the sender lives in self, so this branch is never taken
            Err(_) => self.state(),
        };
        reached
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ServerState::Connected
    }

    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.session.read().descriptor.clone()
    }

    pub fn set_descriptor(&self, descriptor: Option<ConnectionDescriptor>) {
        self.session.write().descriptor = descriptor;
    }

    /// Local user id as reported by the relay.
    pub fn uid(&self) -> Option<String> {
        self.session.read().descriptor.as_ref().map(|d| d.user.uid.clone())
    }

    pub fn system_info(&self) -> SystemInfoDto {
        self.session.read().system_info
    }

    pub fn set_system_info(&self, info: SystemInfoDto) {
        self.session.write().system_info = info;
    }

    pub fn auth_failure_message(&self) -> Option<String> {
        self.session.read().auth_failure_message.clone()
    }

    pub fn set_auth_failure_message(&self, message: Option<String>) {
        self.session.write().auth_failure_message = message;
    }

    pub fn session(&self) -> SessionInfo {
        self.session.read().clone()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let session = self.session.read();
        let server = session
            .descriptor
            .as_ref()
            .map(|d| format!("{} v{}", d.server_info.name, d.server_version))
            .unwrap_or_else(|| "-".to_string());
        let uptime = session
            .connected_at
            .map(|at| format!("{}s", (Utc::now().timestamp_millis() - at) / 1000))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "state={} server={} online_users={} uptime={}",
            self.state(),
            server,
            session.system_info.online_users,
            uptime
        )
    }
}

impl Default for ConnectionStateManager {
    fn default() -> Self {
        Self::new()
    }
}
