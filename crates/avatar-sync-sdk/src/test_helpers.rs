//! In-memory fakes for every external collaborator

use crate::error::{Result, SyncError};
use crate::manifest::{CharacterManifest, EntityKind};
use crate::protocol::{
    ConnectionDescriptor, GroupData, GroupFullInfoDto, GroupPairFullInfoDto, OnlineUserIdentDto,
    ServerInfoDto, UserData, UserPairDto,
};
use crate::relay::{AuthTokenSource, ForeverRetryPolicy, RelayConnection, RelayConnector, TokenKey, TransportEvent};
use crate::snapshot::{AppearanceSnapshot, AppearanceSnapshotSource, HostEnvironment, PathResolver, ResolvedPaths};
use crate::store::ManifestApplier;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Polls `condition` every few milliseconds; panics after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Path oracle backed by maps.
///
/// Unknown forward paths resolve to themselves, unknown reverse paths to nothing.
#[derive(Default)]
pub struct MapOracle {
    forward: HashMap<String, String>,
    reverse: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    failing: AtomicBool,
    forward_requests: Mutex<Vec<Vec<String>>>,
}

impl MapOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(mut self, logical: &str, resolved: &str) -> Self {
        self.forward.insert(logical.to_string(), resolved.to_string());
        self
    }

    pub fn reverse(mut self, resolved: &str, logical: &[&str]) -> Self {
        self.reverse
            .insert(resolved.to_string(), logical.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn forward_requests(&self) -> Vec<Vec<String>> {
        self.forward_requests.lock().clone()
    }
}

#[async_trait]
impl PathResolver for MapOracle {
    async fn resolve_paths(&self, forward: &[String], reverse: &[String]) -> Result<ResolvedPaths> {
        self.forward_requests.lock().push(forward.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Other("oracle unavailable".to_string()));
        }
        Ok(ResolvedPaths {
            forward: forward
                .iter()
                .map(|path| self.forward.get(path).cloned().unwrap_or_else(|| path.clone()))
                .collect(),
            reverse: reverse
                .iter()
                .map(|path| self.reverse.get(path).cloned().unwrap_or_default())
                .collect(),
        })
    }
}

/// Snapshot source with fixed snapshots; missing kinds are unavailable.
#[derive(Default)]
pub struct StaticSnapshotSource {
    snapshots: Mutex<HashMap<EntityKind, AppearanceSnapshot>>,
}

impl StaticSnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: EntityKind, snapshot: AppearanceSnapshot) -> Self {
        self.set(kind, snapshot);
        self
    }

    pub fn set(&self, kind: EntityKind, snapshot: AppearanceSnapshot) {
        self.snapshots.lock().insert(kind, snapshot);
    }

    pub fn remove(&self, kind: EntityKind) {
        self.snapshots.lock().remove(&kind);
    }
}

#[async_trait]
impl AppearanceSnapshotSource for StaticSnapshotSource {
    async fn snapshot(&self, kind: EntityKind) -> Result<AppearanceSnapshot> {
        self.snapshots
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| SyncError::EntityUnavailable(kind.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct AppliedManifest {
    pub uid: String,
    pub player_name: String,
    pub hash: String,
    pub entries: usize,
    pub forced: bool,
}

/// Records every apply and release
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<AppliedManifest>>,
    released: Mutex<Vec<String>>,
}

impl RecordingApplier {
    pub fn applied(&self) -> Vec<AppliedManifest> {
        self.applied.lock().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().len()
    }

    pub fn last_forced(&self) -> bool {
        self.applied.lock().last().map(|a| a.forced).unwrap_or(false)
    }

    pub fn last_entry_count(&self) -> usize {
        self.applied.lock().last().map(|a| a.entries).unwrap_or(0)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

impl ManifestApplier for RecordingApplier {
    fn apply(&self, user: &UserData, player_name: &str, manifest: &CharacterManifest, forced: bool) {
        self.applied.lock().push(AppliedManifest {
            uid: user.uid.clone(),
            player_name: player_name.to_string(),
            hash: manifest.content_hash(),
            entries: manifest.total_entries(),
            forced,
        });
    }

    fn release(&self, user: &UserData) {
        self.released.lock().push(user.uid.clone());
    }
}

enum AuthMode {
    Token(String),
    Unauthorized(String),
    RateLimited,
}

/// Token source with a switchable answer
pub struct MockAuth {
    mode: Mutex<AuthMode>,
    requests: AtomicUsize,
}

impl MockAuth {
    pub fn with_token(token: &str) -> Self {
        Self {
            mode: Mutex::new(AuthMode::Token(token.to_string())),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set_unauthorized(&self, message: &str) {
        *self.mode.lock() = AuthMode::Unauthorized(message.to_string());
    }

    pub fn set_token(&self, token: &str) {
        *self.mode.lock() = AuthMode::Token(token.to_string());
    }

    pub fn set_rate_limited(&self) {
        *self.mode.lock() = AuthMode::RateLimited;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthTokenSource for MockAuth {
    async fn request_token(&self, _key: &TokenKey) -> Result<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match &*self.mode.lock() {
            AuthMode::Token(token) => Ok(token.clone()),
            AuthMode::Unauthorized(message) => Err(SyncError::Unauthorized(message.clone())),
            AuthMode::RateLimited => Err(SyncError::RateLimited("slow down".to_string())),
        }
    }
}

/// Host whose player is logged in and present unless told otherwise
pub struct TestHost {
    logged_in: AtomicBool,
    present: AtomicBool,
    ident: Mutex<Option<String>>,
}

impl TestHost {
    pub fn new(ident: &str) -> Self {
        Self {
            logged_in: AtomicBool::new(true),
            present: AtomicBool::new(true),
            ident: Mutex::new(Some(ident.to_string())),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }
}

impl HostEnvironment for TestHost {
    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn is_player_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn player_identity_hash(&self) -> Option<String> {
        self.ident.lock().clone()
    }
}

struct MockRelayState {
    server_version: u32,
    pairs: Mutex<Vec<UserPairDto>>,
    groups: Mutex<Vec<(GroupFullInfoDto, Vec<GroupPairFullInfoDto>)>>,
    online: Mutex<Vec<OnlineUserIdentDto>>,
    healthy: AtomicBool,
    reject_connect: AtomicBool,
    reject_descriptor: AtomicBool,
    failing_connects: AtomicUsize,
    connects: AtomicUsize,
    stops: AtomicUsize,
    pushes: Mutex<Vec<(String, Vec<String>)>>,
    /// One slot per opened connection; `stop` closes the channel
    senders: Mutex<Vec<Option<mpsc::Sender<TransportEvent>>>>,
}

/// In-memory relay; every connect opens a new connection over the same data.
#[derive(Clone)]
pub struct MockRelay {
    state: Arc<MockRelayState>,
}

impl MockRelay {
    pub const SELF_UID: &'static str = "SELF";

    pub fn new(server_version: u32) -> Self {
        Self {
            state: Arc::new(MockRelayState {
                server_version,
                pairs: Mutex::new(Vec::new()),
                groups: Mutex::new(Vec::new()),
                online: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
                reject_connect: AtomicBool::new(false),
                reject_descriptor: AtomicBool::new(false),
                failing_connects: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                pushes: Mutex::new(Vec::new()),
                senders: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_pair(&self, pair: UserPairDto) {
        self.state.pairs.lock().push(pair);
    }

    pub fn add_group(&self, group: GroupFullInfoDto, members: Vec<GroupPairFullInfoDto>) {
        self.state.groups.lock().push((group, members));
    }

    pub fn set_online(&self, online: Vec<OnlineUserIdentDto>) {
        *self.state.online.lock() = online;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Next connects fail with `Unauthorized`.
    pub fn set_reject_connect(&self, reject: bool) {
        self.state.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Connects succeed but the descriptor request fails with `Unauthorized`.
    pub fn set_reject_descriptor(&self, reject: bool) {
        self.state.reject_descriptor.store(reject, Ordering::SeqCst);
    }

    /// The next `count` connects fail with a transport error.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// (manifest hash, recipient uids) per push
    pub fn pushes(&self) -> Vec<(String, Vec<String>)> {
        self.state.pushes.lock().clone()
    }

    /// Delivers a transport event on the latest connection.
    pub async fn send(&self, event: TransportEvent) {
        let sender = self.state.senders.lock().last().cloned().flatten();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Delivers a transport event on the `index`-th opened connection, if still open.
    pub async fn send_to(&self, index: usize, event: TransportEvent) {
        let sender = self.state.senders.lock().get(index).cloned().flatten();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl RelayConnector for MockRelay {
    async fn connect(
        &self,
        _url: &str,
        _token: &str,
        _retry: ForeverRetryPolicy,
    ) -> Result<(Box<dyn RelayConnection>, mpsc::Receiver<TransportEvent>)> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.reject_connect.load(Ordering::SeqCst) {
            return Err(SyncError::Unauthorized("token rejected".to_string()));
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(SyncError::Transport("connection refused".to_string()));
        }

        let (sender, receiver) = mpsc::channel(64);
        let index = {
            let mut senders = self.state.senders.lock();
            senders.push(Some(sender));
            senders.len() - 1
        };
        Ok((
            Box::new(MockConnection {
                state: self.state.clone(),
                index,
            }),
            receiver,
        ))
    }
}

struct MockConnection {
    state: Arc<MockRelayState>,
    index: usize,
}

#[async_trait]
impl RelayConnection for MockConnection {
    async fn get_connection_descriptor(&self) -> Result<ConnectionDescriptor> {
        if self.state.reject_descriptor.load(Ordering::SeqCst) {
            return Err(SyncError::Unauthorized("session expired".to_string()));
        }
        Ok(ConnectionDescriptor {
            user: UserData::new(MockRelay::SELF_UID),
            server_version: self.state.server_version,
            server_info: ServerInfoDto {
                name: "Mock relay".to_string(),
                short_name: "mock".to_string(),
                motd: None,
            },
            is_admin: false,
            is_moderator: false,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.state.healthy.load(Ordering::SeqCst))
    }

    async fn get_paired_users(&self) -> Result<Vec<UserPairDto>> {
        Ok(self.state.pairs.lock().clone())
    }

    async fn get_all_groups(&self) -> Result<Vec<GroupFullInfoDto>> {
        Ok(self.state.groups.lock().iter().map(|(group, _)| group.clone()).collect())
    }

    async fn get_group_members(&self, group: &GroupData) -> Result<Vec<GroupPairFullInfoDto>> {
        Ok(self
            .state
            .groups
            .lock()
            .iter()
            .find(|(g, _)| g.group.gid == group.gid)
            .map(|(_, members)| members.clone())
            .unwrap_or_default())
    }

    async fn get_online_peers(&self) -> Result<Vec<OnlineUserIdentDto>> {
        Ok(self.state.online.lock().clone())
    }

    async fn push_manifest(&self, manifest: &CharacterManifest, recipients: &[UserData]) -> Result<()> {
        self.state.pushes.lock().push((
            manifest.content_hash(),
            recipients.iter().map(|u| u.uid.clone()).collect(),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = self.state.senders.lock().get_mut(self.index) {
            sender.take();
        }
        Ok(())
    }
}
