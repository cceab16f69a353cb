//! Outbound manifest broadcasting
//!
//! Listens to the event stream and pushes the local manifest through the
//! relay controller:
//! - a newly published manifest goes to every visible peer, once per hash
//! - a peer that just became visible gets the current manifest
//! - a fresh connection pushes the current manifest to everyone visible

use crate::connection_state::ServerState;
use crate::error::Result;
use crate::events::{EventManager, SyncEvent};
use crate::manifest::CharacterManifest;
use crate::relay::RelayConnectionController;
use crate::store::PeerStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct BroadcasterInner {
    controller: RelayConnectionController,
    store: Arc<PeerStore>,
    current: Mutex<Option<(String, Arc<CharacterManifest>)>>,
    last_pushed_hash: Mutex<Option<String>>,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct ManifestBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl ManifestBroadcaster {
    pub fn new(controller: RelayConnectionController, store: Arc<PeerStore>) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                controller,
                store,
                current: Mutex::new(None),
                last_pushed_hash: Mutex::new(None),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Consumes `events` until [`ManifestBroadcaster::stop`].
    pub fn start(&self, events: &EventManager) -> JoinHandle<()> {
        let mut receiver = events.subscribe();
        let broadcaster = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = broadcaster.inner.token.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(event) => {
                        if let Err(e) = broadcaster.handle_event(&event).await {
                            warn!("failed to push manifest after {}: {}", event.event_type(), e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("manifest broadcaster lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("manifest broadcaster stopped");
        })
    }

    pub fn stop(&self) {
        self.inner.token.cancel();
    }

    pub fn last_pushed_hash(&self) -> Option<String> {
        self.inner.last_pushed_hash.lock().clone()
    }

    pub async fn handle_event(&self, event: &SyncEvent) -> Result<()> {
        match event {
            SyncEvent::ManifestUpdated { manifest, hash, .. } => {
                *self.inner.current.lock() = Some((hash.clone(), manifest.clone()));
                self.push_to_visible(false).await
            }
            SyncEvent::PeerVisible { uid, .. } => self.push_to_peer(uid).await,
            SyncEvent::ServerStateChanged {
                new_state: ServerState::Connected,
                ..
            } => self.push_to_visible(true).await,
            _ => Ok(()),
        }
    }

    fn current(&self) -> Option<(String, Arc<CharacterManifest>)> {
        self.inner.current.lock().clone()
    }

    async fn push_to_visible(&self, force: bool) -> Result<()> {
        let Some((hash, manifest)) = self.current() else {
            return Ok(());
        };
        if !force && self.inner.last_pushed_hash.lock().as_deref() == Some(hash.as_str()) {
            debug!("manifest {} already pushed", hash);
            return Ok(());
        }
        let recipients = self.inner.store.visible_users();
        if recipients.is_empty() || !self.inner.controller.is_connected() {
            return Ok(());
        }

        self.inner.controller.push_manifest(&manifest, &recipients).await?;
        *self.inner.last_pushed_hash.lock() = Some(hash.clone());
        info!("✅ manifest {} pushed to {} visible peers", hash, recipients.len());
        Ok(())
    }

    async fn push_to_peer(&self, uid: &str) -> Result<()> {
        let Some((hash, manifest)) = self.current() else {
            return Ok(());
        };
        let Some(peer) = self.inner.store.peer(uid) else {
            return Ok(());
        };
        if !self.inner.controller.is_connected() {
            return Ok(());
        }
        self.inner.controller.push_manifest(&manifest, &[peer.user]).await?;
        debug!("manifest {} pushed to newly visible {}", hash, uid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionTimings, ServerConfig, ServerSettings};
    use crate::connection_state::ConnectionStateManager;
    use crate::events::event_builders;
    use crate::manifest::{EntityKind, ResourceManifest};
    use crate::protocol::{OnlineUserIdentDto, UserData, UserPairDto, UserPermissions};
    use crate::relay::controller::ControllerDeps;
    use crate::test_helpers::{MockAuth, MockRelay, RecordingApplier, TestHost};
    use crate::version::PROTOCOL_VERSION;

    struct Harness {
        broadcaster: ManifestBroadcaster,
        relay: MockRelay,
        store: Arc<PeerStore>,
        events: Arc<EventManager>,
    }

    async fn connected_harness() -> Harness {
        let relay = MockRelay::new(PROTOCOL_VERSION);
        relay.add_pair(UserPairDto {
            user: UserData::new("UID1"),
            own_permissions: UserPermissions { paired: true, ..Default::default() },
            other_permissions: UserPermissions { paired: true, ..Default::default() },
        });
        relay.set_online(vec![OnlineUserIdentDto {
            user: UserData::new("UID1"),
            ident: "IDENT1".to_string(),
        }]);

        let events = Arc::new(EventManager::new(64));
        let store = Arc::new(PeerStore::new(Arc::new(RecordingApplier::default()), events.clone()));
        let controller = RelayConnectionController::new(
            ServerSettings::new(ServerConfig {
                default_secret_key: Some("secret".to_string()),
                ..Default::default()
            }),
            ConnectionTimings::default(),
            PROTOCOL_VERSION,
            ControllerDeps {
                connector: Arc::new(relay.clone()),
                auth: Arc::new(MockAuth::with_token("token")),
                host: Arc::new(TestHost::new("IDENT_SELF")),
                store: store.clone(),
                events: events.clone(),
                state: ConnectionStateManager::new(),
            },
        );
        controller.create_connections().await.unwrap();

        Harness {
            broadcaster: ManifestBroadcaster::new(controller, store.clone()),
            relay,
            store,
            events,
        }
    }

    fn manifest(path: &str) -> Arc<CharacterManifest> {
        let mut resources = ResourceManifest::new();
        resources.insert("c:/mods/a.tex", [path]);
        let mut manifest = CharacterManifest::new();
        manifest.set_manifest(EntityKind::Player, resources);
        Arc::new(manifest)
    }

    #[tokio::test]
    async fn test_push_is_hash_gated() {
        let h = connected_harness().await;
        h.store.initialize_peer("IDENT1", "Name");

        let first = manifest("chara/a.tex");
        let event = event_builders::manifest_updated(first.clone(), first.content_hash());
        h.broadcaster.handle_event(&event).await.unwrap();
        h.broadcaster.handle_event(&event).await.unwrap();
        assert_eq!(h.relay.pushes().len(), 1);
        assert_eq!(h.broadcaster.last_pushed_hash(), Some(first.content_hash()));

        let second = manifest("chara/b.tex");
        h.broadcaster
            .handle_event(&event_builders::manifest_updated(second.clone(), second.content_hash()))
            .await
            .unwrap();
        assert_eq!(h.relay.pushes().len(), 2);
    }

    #[tokio::test]
    async fn test_newly_visible_peer_receives_current_manifest() {
        let h = connected_harness().await;
        let current = manifest("chara/a.tex");
        h.broadcaster
            .handle_event(&event_builders::manifest_updated(current.clone(), current.content_hash()))
            .await
            .unwrap();
        // nobody visible yet
        assert!(h.relay.pushes().is_empty());

        let handle = h.broadcaster.start(&h.events);
        h.store.initialize_peer("IDENT1", "Name");
        crate::test_helpers::wait_until(|| h.relay.pushes().len() == 1).await;
        assert_eq!(h.relay.pushes()[0], (current.content_hash(), vec!["UID1".to_string()]));

        h.broadcaster.stop();
        handle.await.unwrap();
    }
}
