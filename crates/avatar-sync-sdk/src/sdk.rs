//! Top-level SDK
//!
//! Layered wiring:
//! - resolution: ResourceGraphResolver → ChangeScheduler
//! - relationships: PeerStore (applies through the host's ManifestApplier)
//! - transport: RelayConnectionController
//! - outbound: ManifestBroadcaster
//! - events: EventManager, lifecycle: LifecycleManager

use crate::broadcaster::ManifestBroadcaster;
use crate::config::{ServerSettings, SyncConfig};
use crate::connection_state::{ConnectionStateManager, ServerState};
use crate::error::Result;
use crate::events::{EventManager, SyncEvent};
use crate::lifecycle::LifecycleManager;
use crate::manifest::{CharacterManifest, EntityKind};
use crate::relay::controller::ControllerDeps;
use crate::relay::{AuthTokenSource, HttpAuthClient, RelayConnectionController, RelayConnector};
use crate::resolver::ResourceGraphResolver;
use crate::scheduler::ChangeScheduler;
use crate::snapshot::{AppearanceSnapshotSource, HostEnvironment, PathResolver};
use crate::store::{ManifestApplier, PeerStore};
use crate::transient::{InMemoryTransientStore, TransientResourceStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Host-supplied collaborators
pub struct HostServices {
    pub snapshot_source: Arc<dyn AppearanceSnapshotSource>,
    pub path_resolver: Arc<dyn PathResolver>,
    pub applier: Arc<dyn ManifestApplier>,
    pub host: Arc<dyn HostEnvironment>,
    pub connector: Arc<dyn RelayConnector>,
    /// Defaults to an in-memory store
    pub transient_store: Option<Arc<dyn TransientResourceStore>>,
    /// Defaults to the HTTP auth client
    pub auth: Option<Arc<dyn AuthTokenSource>>,
}

/// Avatar sync SDK
pub struct AvatarSyncSdk {
    config: SyncConfig,
    events: Arc<EventManager>,
    state: ConnectionStateManager,
    store: Arc<PeerStore>,
    transient: Arc<dyn TransientResourceStore>,
    scheduler: ChangeScheduler,
    controller: RelayConnectionController,
    broadcaster: ManifestBroadcaster,
    broadcaster_task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: tokio::sync::RwLock<LifecycleManager>,
}

impl AvatarSyncSdk {
    /// Validates the config and wires every component; does not connect.
    pub async fn initialize(config: SyncConfig, services: HostServices) -> Result<Arc<Self>> {
        crate::logging::init_tracing(config.debug_mode);
        info!("initializing avatar sync SDK {}", crate::version::SDK_VERSION);
        config.validate()?;

        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let state = ConnectionStateManager::new();

        let transient: Arc<dyn TransientResourceStore> = match services.transient_store {
            Some(store) => store,
            None => Arc::new(InMemoryTransientStore::new()),
        };
        let resolver = Arc::new(ResourceGraphResolver::new(
            services.path_resolver,
            transient.clone(),
            config.resolver.oracle_timeout,
        ));
        let scheduler = ChangeScheduler::new(
            resolver,
            services.snapshot_source,
            events.clone(),
            config.resolver.palette_debounce,
        );

        let store = Arc::new(PeerStore::new(services.applier, events.clone()));

        let auth: Arc<dyn AuthTokenSource> = match services.auth {
            Some(auth) => auth,
            None => Arc::new(HttpAuthClient::new(&config.http_client)?),
        };
        let controller = RelayConnectionController::new(
            ServerSettings::new(config.server.clone()),
            config.timings.clone(),
            config.expected_protocol_version,
            ControllerDeps {
                connector: services.connector,
                auth,
                host: services.host,
                store: store.clone(),
                events: events.clone(),
                state: state.clone(),
            },
        );

        let broadcaster = ManifestBroadcaster::new(controller.clone(), store.clone());
        let broadcaster_task = broadcaster.start(&events);

        let mut lifecycle = LifecycleManager::new();
        lifecycle.register_hook(Arc::new(controller.clone()));

        info!("✅ avatar sync SDK initialized for {}", config.server.name);
        Ok(Arc::new(Self {
            config,
            events,
            state,
            store,
            transient,
            scheduler,
            controller,
            broadcaster,
            broadcaster_task: Mutex::new(Some(broadcaster_task)),
            lifecycle: tokio::sync::RwLock::new(lifecycle),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<PeerStore> {
        &self.store
    }

    pub fn controller(&self) -> &RelayConnectionController {
        &self.controller
    }

    pub fn transient_store(&self) -> &Arc<dyn TransientResourceStore> {
        &self.transient
    }

    pub async fn lifecycle(&self) -> tokio::sync::RwLockWriteGuard<'_, LifecycleManager> {
        self.lifecycle.write().await
    }

    // ========== resolution ==========

    /// Called once per host frame; starts a resolution pass when one is due.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        self.scheduler.tick()
    }

    pub fn notify_changed(&self, kind: EntityKind) {
        self.scheduler.notify_changed(kind);
    }

    /// The entity of `kind` is gone.
    pub fn clear_kind(&self, kind: EntityKind) {
        self.scheduler.clear_kind(kind);
    }

    pub fn set_pose_offset(&self, offset: f32) {
        self.scheduler.set_pose_offset(offset);
    }

    pub fn set_scale(&self, scale: impl Into<String>) {
        self.scheduler.set_scale(scale.into());
    }

    pub fn set_palette(&self, palette: impl Into<String>) {
        self.scheduler.set_palette(palette.into());
    }

    pub fn current_manifest(&self) -> CharacterManifest {
        self.scheduler.current_manifest()
    }

    // ========== peers ==========

    /// The visibility scanner found the avatar with identity hash `ident`.
    pub fn player_visible(&self, ident: &str, player_name: &str) -> Option<String> {
        self.store.initialize_peer(ident, player_name)
    }

    pub fn reload_peer(&self, uid: &str) -> Result<()> {
        self.store.reload_peer(uid)
    }

    // ========== connection ==========

    pub async fn login(&self) -> Result<()> {
        self.lifecycle.read().await.notify_login().await
    }

    pub async fn logout(&self) -> Result<()> {
        self.lifecycle.read().await.notify_logout().await
    }

    pub fn reconnect(&self) -> JoinHandle<Result<()>> {
        self.controller.spawn_reconnect()
    }

    pub fn set_full_pause(&self, paused: bool) -> JoinHandle<Result<()>> {
        self.controller.set_full_pause(paused)
    }

    pub fn set_secret_key(&self, identity: impl Into<String>, key: impl Into<String>) {
        self.controller.settings().set_secret_key(identity, key);
    }

    pub fn server_state(&self) -> ServerState {
        self.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    pub fn online_users(&self) -> u32 {
        self.controller.online_users()
    }

    pub fn uid(&self) -> Option<String> {
        self.controller.uid()
    }

    pub async fn shutdown(&self) {
        info!("shutting down avatar sync SDK");
        self.scheduler.shutdown();
        self.broadcaster.stop();
        let task = self.broadcaster_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.controller.disconnect().await;
        info!("✅ avatar sync SDK shut down");
    }
}
