//! Relay connection controller
//!
//! Keeps one authenticated logical connection to the relay:
//! - token cache keyed by (endpoint, identity, secret)
//! - waits for a secret key and for the local player before connecting
//! - protocol version check against the connection descriptor
//! - full resync of pairs, groups, members and online peers on every connect
//! - periodic health check, full reconnect when it fails
//!
//! Reconnect requests cancel the running connect loop and are serialized
//! behind a connect lock.

use super::auth::{AuthTokenSource, TokenCache, TokenKey};
use super::callbacks::RelayCallbacks;
use super::retry::{random_reconnect_delay, ForeverRetryPolicy};
use super::{RelayConnection, RelayConnector, TransportEvent};
use crate::config::{ConnectionTimings, ServerSettings};
use crate::connection_state::{ConnectionStateManager, ServerState};
use crate::error::{Result, SyncError};
use crate::events::{event_builders, EventManager};
use crate::lifecycle::LifecycleHook;
use crate::manifest::CharacterManifest;
use crate::protocol::UserData;
use crate::snapshot::HostEnvironment;
use crate::store::PeerStore;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct ControllerInner {
    settings: ServerSettings,
    timings: ConnectionTimings,
    expected_version: u32,
    connector: Arc<dyn RelayConnector>,
    auth: Arc<dyn AuthTokenSource>,
    host: Arc<dyn HostEnvironment>,
    state: ConnectionStateManager,
    store: Arc<PeerStore>,
    events: Arc<EventManager>,
    callbacks: RelayCallbacks,
    tokens: TokenCache,
    connection: RwLock<Option<Arc<dyn RelayConnection>>>,
    connect_lock: tokio::sync::Mutex<()>,
    /// Connect loop
    loop_token: Mutex<CancellationToken>,
    /// Dispatch and health check of the current connection
    session_token: Mutex<CancellationToken>,
}

/// Relay connection controller
#[derive(Clone)]
pub struct RelayConnectionController {
    inner: Arc<ControllerInner>,
}

/// External collaborators of the controller
pub struct ControllerDeps {
    pub connector: Arc<dyn RelayConnector>,
    pub auth: Arc<dyn AuthTokenSource>,
    pub host: Arc<dyn HostEnvironment>,
    pub store: Arc<PeerStore>,
    pub events: Arc<EventManager>,
    pub state: ConnectionStateManager,
}

impl RelayConnectionController {
    pub fn new(
        settings: ServerSettings,
        timings: ConnectionTimings,
        expected_version: u32,
        deps: ControllerDeps,
    ) -> Self {
        let callbacks = RelayCallbacks::new(deps.store.clone(), deps.state.clone(), deps.events.clone());
        Self {
            inner: Arc::new(ControllerInner {
                settings,
                timings,
                expected_version,
                connector: deps.connector,
                auth: deps.auth,
                host: deps.host,
                state: deps.state,
                store: deps.store,
                events: deps.events,
                callbacks,
                tokens: TokenCache::new(),
                connection: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                loop_token: Mutex::new(CancellationToken::new()),
                session_token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.state.state()
    }

    pub fn state_manager(&self) -> &ConnectionStateManager {
        &self.inner.state
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    /// The relay answered on the last attempt, whatever it said.
    pub fn server_alive(&self) -> bool {
        matches!(
            self.state(),
            ServerState::Connected
                | ServerState::RateLimited
                | ServerState::Unauthorized
                | ServerState::Disconnected
        )
    }

    pub fn online_users(&self) -> u32 {
        self.inner.state.system_info().online_users
    }

    pub fn uid(&self) -> Option<String> {
        self.inner.state.uid()
    }

    pub fn auth_failure_message(&self) -> Option<String> {
        self.inner.state.auth_failure_message()
    }

    pub fn is_download_ready(&self, request_id: &Uuid) -> bool {
        self.inner.callbacks.is_download_ready(request_id)
    }

    pub fn clear_download(&self, request_id: &Uuid) -> bool {
        self.inner.callbacks.clear_download(request_id)
    }

    pub fn cached_token_count(&self) -> usize {
        self.inner.tokens.len()
    }

    /// Starts a full connect cycle in the background.
    pub fn spawn_reconnect(&self) -> JoinHandle<Result<()>> {
        let controller = self.clone();
        tokio::spawn(async move { controller.create_connections().await })
    }

    /// Tears down any current connection and connects again.
    ///
    /// Returns once connected, or with the error that parked the loop
    /// (`Unauthorized`, `VersionMismatch`, `Cancelled`). A full pause ends
    /// in `Disconnected` and returns `Ok`.
    pub async fn create_connections(&self) -> Result<()> {
        let token = self.replace_loop_token();
        let _guard = self.inner.connect_lock.lock().await;
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.teardown().await;
        self.connect_loop(&token).await
    }

    /// Stops the connection; resolves once the state is `Offline`.
    pub async fn stop_connection(&self) {
        self.replace_loop_token();
        let _guard = self.inner.connect_lock.lock().await;
        self.teardown().await;
        self.inner.state.wait_for(|s| *s == ServerState::Offline).await;
    }

    /// Stops and stays down until the next `create_connections`.
    pub async fn disconnect(&self) {
        self.stop_connection().await;
        self.set_state(ServerState::Disconnected);
    }

    pub fn set_full_pause(&self, paused: bool) -> JoinHandle<Result<()>> {
        self.inner.settings.set_full_pause(paused);
        self.spawn_reconnect()
    }

    pub async fn push_manifest(&self, manifest: &CharacterManifest, recipients: &[UserData]) -> Result<()> {
        if recipients.is_empty() {
            return Ok(());
        }
        let connection = self.current_connection().ok_or(SyncError::NotConnected)?;
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        debug!("pushing manifest to {} recipients", recipients.len());
        connection.push_manifest(manifest, recipients).await
    }

    fn current_connection(&self) -> Option<Arc<dyn RelayConnection>> {
        self.inner.connection.read().clone()
    }

    fn is_current(&self, connection: &Arc<dyn RelayConnection>) -> bool {
        self.inner
            .connection
            .read()
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(connection)))
    }

    /// Drops `connection` from the slot if it is still the active one.
    fn release_if_current(&self, connection: &Arc<dyn RelayConnection>) -> bool {
        let mut slot = self.inner.connection.write();
        let current = slot
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(connection)));
        if current {
            *slot = None;
        }
        current
    }

    fn replace_loop_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let old = std::mem::replace(&mut *self.inner.loop_token.lock(), token.clone());
        old.cancel();
        token
    }

    fn replace_session_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let old = std::mem::replace(&mut *self.inner.session_token.lock(), token.clone());
        old.cancel();
        token
    }

    fn set_state(&self, new_state: ServerState) {
        if let Some(old_state) = self.inner.state.set_state(new_state) {
            info!("relay state {} -> {}", old_state, new_state);
            self.inner
                .events
                .emit(event_builders::server_state_changed(old_state, new_state));
        }
    }

    /// Stops the transport, drops every peer and goes `Offline`.
    async fn teardown(&self) {
        self.replace_session_token().cancel();
        let connection = self.inner.connection.write().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.stop().await {
                warn!("failed to stop relay connection: {}", e);
            }
        }
        self.inner.store.clear();
        self.inner.callbacks.clear_downloads();
        self.inner.state.set_descriptor(None);
        self.set_state(ServerState::Offline);
    }

    /// Sleeps unless cancelled first; false when cancelled.
    async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn wait_before_retry(&self, token: &CancellationToken) -> Result<()> {
        let delay = random_reconnect_delay(self.inner.timings.retry_delay_min, self.inner.timings.retry_delay_max);
        debug!("retrying relay connection in {:?}", delay);
        if Self::sleep_or_cancel(token, delay).await {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    async fn connect_loop(&self, token: &CancellationToken) -> Result<()> {
        let url = self.inner.settings.url();
        loop {
            if token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if self.inner.settings.is_full_pause() {
                info!("full pause set, staying disconnected");
                self.set_state(ServerState::Disconnected);
                return Ok(());
            }

            let identity = self.inner.host.player_identity_hash();
            let secret = identity
                .as_deref()
                .and_then(|identity| self.inner.settings.secret_key(identity));
            let (Some(identity), Some(secret)) = (identity, secret) else {
                self.set_state(ServerState::NoSecretKey);
                if !Self::sleep_or_cancel(token, self.inner.timings.secret_key_poll_interval).await {
                    return Err(SyncError::Cancelled);
                }
                continue;
            };

            self.set_state(ServerState::Connecting);
            let key = TokenKey::new(url.clone(), identity, secret);
            match self.try_connect(token, &url, &key).await {
                Ok(()) => return Ok(()),
                Err(SyncError::Unauthorized(message)) => {
                    warn!("relay rejected authentication: {}", message);
                    self.teardown().await;
                    self.inner.tokens.remove(&key);
                    self.inner.state.set_auth_failure_message(Some(message.clone()));
                    self.set_state(ServerState::Unauthorized);
                    return Err(SyncError::Unauthorized(message));
                }
                Err(SyncError::VersionMismatch { expected, actual }) => {
                    error!("relay speaks protocol {}, expected {}", actual, expected);
                    self.set_state(ServerState::VersionMismatch);
                    return Err(SyncError::VersionMismatch { expected, actual });
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(SyncError::RateLimited(message)) => {
                    warn!("relay rate limited the connection: {}", message);
                    self.teardown().await;
                    self.set_state(ServerState::RateLimited);
                    self.wait_before_retry(token).await?;
                }
                Err(e) => {
                    warn!("relay connection failed: {}", e);
                    self.teardown().await;
                    self.wait_before_retry(token).await?;
                }
            }
        }
    }

    async fn get_token(&self, key: &TokenKey) -> Result<String> {
        if let Some(token) = self.inner.tokens.get(key) {
            return Ok(token);
        }
        let token = self.inner.auth.request_token(key).await?;
        self.inner.tokens.insert(key.clone(), token.clone());
        Ok(token)
    }

    async fn try_connect(&self, token: &CancellationToken, url: &str, key: &TokenKey) -> Result<()> {
        let auth_token = self.get_token(key).await?;

        while !self.inner.host.is_player_present() {
            debug!("waiting for the local player before connecting");
            if !Self::sleep_or_cancel(token, self.inner.timings.player_present_poll_interval).await {
                return Err(SyncError::Cancelled);
            }
        }

        let retry = ForeverRetryPolicy::new(self.inner.timings.transport_retry_delay);
        let (connection, transport_events) = self.inner.connector.connect(url, &auth_token, retry).await?;
        let connection: Arc<dyn RelayConnection> = Arc::from(connection);
        *self.inner.connection.write() = Some(connection.clone());

        let descriptor = connection.get_connection_descriptor().await?;
        if descriptor.server_version != self.inner.expected_version {
            self.teardown().await;
            return Err(SyncError::VersionMismatch {
                expected: self.inner.expected_version,
                actual: descriptor.server_version,
            });
        }
        if token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(
            "✅ connected to {} as {}",
            descriptor.server_info.name,
            descriptor.user.alias_or_uid()
        );
        self.inner.state.set_descriptor(Some(descriptor));
        self.inner.state.set_auth_failure_message(None);
        self.set_state(ServerState::Connected);

        let session = self.replace_session_token();
        self.spawn_dispatch(connection.clone(), transport_events, session.clone());
        self.load_initial_state(connection.as_ref()).await?;
        self.spawn_health_check(connection, session);
        Ok(())
    }

    /// Pairs, groups, members per group, then online peers.
    async fn load_initial_state(&self, connection: &dyn RelayConnection) -> Result<()> {
        let store = &self.inner.store;
        let own_uid = self.inner.state.uid();

        let pairs = connection.get_paired_users().await?;
        let pair_count = pairs.len();
        for pair in pairs {
            store.add_user_pair(pair, false);
        }

        let groups = connection.get_all_groups().await?;
        let group_count = groups.len();
        for group in groups {
            let data = group.group.clone();
            store.add_group(group);
            for member in connection.get_group_members(&data).await? {
                if own_uid.as_deref() == Some(member.user.uid.as_str()) {
                    continue;
                }
                store.add_group_pair(member)?;
            }
        }

        let online = connection.get_online_peers().await?;
        let online_count = online.len();
        for peer in online {
            if let Err(e) = store.mark_online(peer) {
                warn!("online peer without relationship: {}", e);
            }
        }

        info!(
            "✅ initial state loaded: {} pairs, {} groups, {} online",
            pair_count, group_count, online_count
        );
        Ok(())
    }

    /// Routes the transport events of `connection` until its session ends.
    ///
    /// Events that arrive after the session was replaced are dropped, so a
    /// closing predecessor never touches the state of its successor.
    fn spawn_dispatch(
        &self,
        connection: Arc<dyn RelayConnection>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        session: CancellationToken,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = session.cancelled() => break,
                    event = transport_events.recv() => event,
                };
                if session.is_cancelled() || !controller.is_current(&connection) {
                    debug!("dropping transport event of a replaced session");
                    break;
                }
                match event {
                    Some(TransportEvent::Push(event)) => controller.inner.callbacks.dispatch(event),
                    Some(TransportEvent::Reconnecting) => {
                        warn!("relay transport reconnecting");
                        controller.inner.store.clear();
                        controller.inner.state.set_descriptor(None);
                        controller.set_state(ServerState::Reconnecting);
                    }
                    Some(TransportEvent::Reconnected) => {
                        info!("relay transport reconnected, running a full reconnect");
                        controller.spawn_reconnect();
                        break;
                    }
                    Some(TransportEvent::Closed) | None => {
                        if controller.release_if_current(&connection) {
                            info!("relay transport closed");
                            session.cancel();
                            controller.inner.store.clear();
                            controller.inner.callbacks.clear_downloads();
                            controller.inner.state.set_descriptor(None);
                            controller.set_state(ServerState::Offline);
                        }
                        break;
                    }
                }
            }
            debug!("relay dispatch stopped");
        });
    }

    fn spawn_health_check(&self, connection: Arc<dyn RelayConnection>, session: CancellationToken) {
        let controller = self.clone();
        let interval = self.inner.timings.health_check_interval;
        tokio::spawn(async move {
            while Self::sleep_or_cancel(&session, interval).await {
                let healthy = match connection.health_check().await {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        warn!("relay health check failed: {}", e);
                        false
                    }
                };
                if session.is_cancelled() {
                    break;
                }
                if !healthy {
                    warn!("relay unhealthy, reconnecting");
                    controller.spawn_reconnect();
                    break;
                }
                debug!("relay health check ok");
            }
        });
    }
}

#[async_trait]
impl LifecycleHook for RelayConnectionController {
    async fn on_login(&self) -> Result<()> {
        self.spawn_reconnect();
        Ok(())
    }

    async fn on_logout(&self) -> Result<()> {
        self.disconnect().await;
        Ok(())
    }
}
