//! Event system
//!
//! Features:
//! - manifest published / applied events
//! - peer directory events (online, offline, visible, cleared)
//! - relay connection state changes and server pushes
//! - synchronous listeners, called in registration order, with explicit removal
//! - broadcast subscription for async consumers

use crate::connection_state::ServerState;
use crate::manifest::CharacterManifest;
use crate::protocol::MessageSeverity;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// SDK event
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The local manifest changed and was published
    ManifestUpdated {
        manifest: Arc<CharacterManifest>,
        hash: String,
        timestamp: i64,
    },
    /// A peer's manifest was handed to the applier
    PeerManifestApplied {
        uid: String,
        hash: String,
        forced: bool,
        timestamp: i64,
    },
    PeerOnline {
        uid: String,
        ident: String,
        timestamp: i64,
    },
    PeerOffline {
        uid: String,
        timestamp: i64,
    },
    /// A peer's avatar was found in the world and initialized
    PeerVisible {
        uid: String,
        player_name: String,
        timestamp: i64,
    },
    /// The peer directory was emptied (disconnect)
    PeersCleared {
        timestamp: i64,
    },
    ServerStateChanged {
        old_state: ServerState,
        new_state: ServerState,
        timestamp: i64,
    },
    SystemInfoUpdated {
        online_users: u32,
        timestamp: i64,
    },
    ServerMessage {
        severity: MessageSeverity,
        message: String,
        timestamp: i64,
    },
    DownloadReady {
        request_id: Uuid,
        timestamp: i64,
    },
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ManifestUpdated { .. } => "manifest_updated",
            SyncEvent::PeerManifestApplied { .. } => "peer_manifest_applied",
            SyncEvent::PeerOnline { .. } => "peer_online",
            SyncEvent::PeerOffline { .. } => "peer_offline",
            SyncEvent::PeerVisible { .. } => "peer_visible",
            SyncEvent::PeersCleared { .. } => "peers_cleared",
            SyncEvent::ServerStateChanged { .. } => "server_state_changed",
            SyncEvent::SystemInfoUpdated { .. } => "system_info_updated",
            SyncEvent::ServerMessage { .. } => "server_message",
            SyncEvent::DownloadReady { .. } => "download_ready",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            SyncEvent::ManifestUpdated { timestamp, .. }
            | SyncEvent::PeerManifestApplied { timestamp, .. }
            | SyncEvent::PeerOnline { timestamp, .. }
            | SyncEvent::PeerOffline { timestamp, .. }
            | SyncEvent::PeerVisible { timestamp, .. }
            | SyncEvent::PeersCleared { timestamp }
            | SyncEvent::ServerStateChanged { timestamp, .. }
            | SyncEvent::SystemInfoUpdated { timestamp, .. }
            | SyncEvent::ServerMessage { timestamp, .. }
            | SyncEvent::DownloadReady { timestamp, .. } => *timestamp,
        }
    }

    /// Peer uid for peer-scoped events
    pub fn uid(&self) -> Option<&str> {
        match self {
            SyncEvent::PeerManifestApplied { uid, .. }
            | SyncEvent::PeerOnline { uid, .. }
            | SyncEvent::PeerOffline { uid, .. }
            | SyncEvent::PeerVisible { uid, .. } => Some(uid),
            _ => None,
        }
    }
}

/// Listener handle returned by [`EventManager::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    event_type: String,
    listener: EventListener,
}

/// Event statistics
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<i64>,
}

/// Event manager
///
/// `emit` is synchronous: listeners run on the caller's thread, in the order
/// they were added, before `emit` returns. Listener `"*"` receives everything.
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    listeners: RwLock<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    stats: Mutex<EventStats>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            stats: Mutex::new(EventStats::default()),
        }
    }

    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.lock();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // no receivers is a normal situation (headless client), debug only
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // snapshot so listeners may add or remove listeners themselves
        let matching: Vec<EventListener> = self
            .listeners
            .read()
            .iter()
            .filter(|entry| entry.event_type == "*" || entry.event_type == event.event_type())
            .map(|entry| entry.listener.clone())
            .collect();

        for listener in matching {
            listener(&event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, event_types: Vec<String>) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), event_types)
    }

    pub fn add_listener<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut listeners = self.listeners.write();
            listeners.push(ListenerEntry {
                id,
                event_type: event_type.to_string(),
                listener: Arc::new(listener),
            });
            listeners.len()
        };
        self.stats.lock().listener_count = count;

        info!("Added listener for event type: {}", event_type);
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let (removed, count) = {
            let mut listeners = self.listeners.write();
            let before = listeners.len();
            listeners.retain(|entry| entry.id != id);
            (listeners.len() != before, listeners.len())
        };
        self.stats.lock().listener_count = count;
        removed
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.lock().listener_count = 0;

        info!("Cleared all event listeners");
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Broadcast receiver that skips events of other types
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SyncEvent>,
    event_types: Vec<String>,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SyncEvent>, event_types: Vec<String>) -> Self {
        Self { receiver, event_types }
    }

    fn matches(&self, event: &SyncEvent) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event.event_type())
    }

    pub async fn recv(&mut self) -> Result<SyncEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<SyncEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Event builders
pub mod event_builders {
    use super::*;
    use chrono::Utc;

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn manifest_updated(manifest: Arc<CharacterManifest>, hash: String) -> SyncEvent {
        SyncEvent::ManifestUpdated {
            manifest,
            hash,
            timestamp: now(),
        }
    }

    pub fn peer_manifest_applied(uid: &str, hash: &str, forced: bool) -> SyncEvent {
        SyncEvent::PeerManifestApplied {
            uid: uid.to_string(),
            hash: hash.to_string(),
            forced,
            timestamp: now(),
        }
    }

    pub fn peer_online(uid: &str, ident: &str) -> SyncEvent {
        SyncEvent::PeerOnline {
            uid: uid.to_string(),
            ident: ident.to_string(),
            timestamp: now(),
        }
    }

    pub fn peer_offline(uid: &str) -> SyncEvent {
        SyncEvent::PeerOffline {
            uid: uid.to_string(),
            timestamp: now(),
        }
    }

    pub fn peer_visible(uid: &str, player_name: &str) -> SyncEvent {
        SyncEvent::PeerVisible {
            uid: uid.to_string(),
            player_name: player_name.to_string(),
            timestamp: now(),
        }
    }

    pub fn peers_cleared() -> SyncEvent {
        SyncEvent::PeersCleared { timestamp: now() }
    }

    pub fn server_state_changed(old_state: ServerState, new_state: ServerState) -> SyncEvent {
        SyncEvent::ServerStateChanged {
            old_state,
            new_state,
            timestamp: now(),
        }
    }

    pub fn system_info_updated(online_users: u32) -> SyncEvent {
        SyncEvent::SystemInfoUpdated {
            online_users,
            timestamp: now(),
        }
    }

    pub fn server_message(severity: MessageSeverity, message: String) -> SyncEvent {
        SyncEvent::ServerMessage {
            severity,
            message,
            timestamp: now(),
        }
    }

    pub fn download_ready(request_id: Uuid) -> SyncEvent {
        SyncEvent::DownloadReady {
            request_id,
            timestamp: now(),
        }
    }
}
