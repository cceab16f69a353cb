//! Peer relationship store
//!
//! Authoritative directory of peers and groups. Membership is kept as two
//! index tables (peer → groups with membership data, group → peers); peers
//! hold no back references. Derived views are cached behind a dirty flag and
//! rebuilt on the first read after a mutation.
//!
//! Calls into the [`ManifestApplier`] and event emission happen after the
//! directory lock is released.

use crate::error::{Result, SyncError};
use crate::events::{event_builders, EventManager, SyncEvent};
use crate::manifest::CharacterManifest;
use crate::peer::{PendingApply, Peer, PeerState};
use crate::permissions::{self, DirectPair, FilterFlags, MembershipPermissions};
use crate::protocol::{
    GroupData, GroupFullInfoDto, GroupInfoDto, GroupPairDto, GroupPairFullInfoDto,
    GroupPairUserInfoDto, GroupPairUserPermissionDto, GroupPermissionDto, GroupUserInfo,
    GroupUserPermissions, OnlineUserIdentDto, OnlineUserManifestDto, UserData, UserPairDto,
    UserPermissionsDto,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies peer manifests to the local world
pub trait ManifestApplier: Send + Sync {
    fn apply(&self, user: &UserData, player_name: &str, manifest: &CharacterManifest, forced: bool);

    /// Reverts everything applied for `user`.
    fn release(&self, user: &UserData);
}

/// Cached derived value, recomputed on the first read after invalidation
#[derive(Debug)]
pub struct CachedView<T> {
    value: Option<T>,
}

impl<T: Clone> CachedView<T> {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }

    pub fn is_dirty(&self) -> bool {
        self.value.is_none()
    }

    pub fn get_or_compute<F>(&mut self, compute: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.value.get_or_insert_with(compute).clone()
    }
}

impl<T: Clone> Default for CachedView<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One membership of a peer in a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupMembership {
    pub permissions: GroupUserPermissions,
    pub info: GroupUserInfo,
}

/// Read-only view of a peer
#[derive(Debug, Clone)]
pub struct PeerSummary {
    pub user: UserData,
    pub state: PeerState,
    pub direct_pair: Option<DirectPair>,
    pub groups: Vec<String>,
    pub paused: bool,
    pub ident: Option<String>,
    pub player_name: Option<String>,
    pub last_received_hash: Option<String>,
}

#[derive(Default)]
struct DerivedViews {
    direct_pairs: CachedView<Vec<UserData>>,
    group_pairs: CachedView<BTreeMap<String, Vec<UserData>>>,
    online_pairs: CachedView<Vec<UserData>>,
    visible_users: CachedView<Vec<UserData>>,
}

impl DerivedViews {
    fn invalidate(&mut self) {
        self.direct_pairs.invalidate();
        self.group_pairs.invalidate();
        self.online_pairs.invalidate();
        self.visible_users.invalidate();
    }
}

#[derive(Default)]
struct StoreState {
    peers: HashMap<String, Peer>,
    groups: HashMap<String, GroupFullInfoDto>,
    /// uid → gid → membership
    peer_groups: HashMap<String, BTreeMap<String, GroupMembership>>,
    /// gid → uids
    group_peers: HashMap<String, BTreeSet<String>>,
    last_added_user: Option<UserData>,
    views: DerivedViews,
}

enum Effect {
    Apply(PendingApply),
    Release(UserData),
    Emit(SyncEvent),
}

impl StoreState {
    fn peer_mut(&mut self, uid: &str) -> Result<&mut Peer> {
        self.peers
            .get_mut(uid)
            .ok_or_else(|| SyncError::invalid_state(format!("no peer found for {}", uid)))
    }

    fn group_mut(&mut self, gid: &str) -> Result<&mut GroupFullInfoDto> {
        self.groups
            .get_mut(gid)
            .ok_or_else(|| SyncError::invalid_state(format!("no group found for {}", gid)))
    }

    fn memberships_of(&self, uid: &str) -> Vec<MembershipPermissions> {
        let Some(memberships) = self.peer_groups.get(uid) else {
            return Vec::new();
        };
        memberships
            .iter()
            .filter_map(|(gid, membership)| {
                self.groups.get(gid).map(|group| MembershipPermissions {
                    group: group.group_permissions,
                    own: group.group_user_permissions,
                    member: membership.permissions,
                })
            })
            .collect()
    }

    fn filter_flags(&self, uid: &str) -> FilterFlags {
        let memberships = self.memberships_of(uid);
        let direct = self.peers.get(uid).and_then(|p| p.direct_pair());
        permissions::filter_flags(direct, &memberships)
    }

    fn is_paused(&self, uid: &str) -> bool {
        let memberships = self.memberships_of(uid);
        let direct = self.peers.get(uid).and_then(|p| p.direct_pair());
        permissions::is_paused(direct, &memberships)
    }

    fn has_any_connection(&self, uid: &str) -> bool {
        let direct = self
            .peers
            .get(uid)
            .map(|p| p.direct_pair().is_some())
            .unwrap_or(false);
        let grouped = self
            .peer_groups
            .get(uid)
            .map(|g| !g.is_empty())
            .unwrap_or(false);
        direct || grouped
    }

    fn apply_last_received(&mut self, uid: &str, forced: bool, effects: &mut Vec<Effect>) {
        let flags = self.filter_flags(uid);
        if let Some(pending) = self.peers.get_mut(uid).and_then(|p| p.prepare_apply(flags, forced)) {
            effects.push(Effect::Emit(event_builders::peer_manifest_applied(
                &pending.user.uid,
                &pending.hash,
                forced,
            )));
            effects.push(Effect::Apply(pending));
        }
    }

    /// Removes `uid` when it has neither a direct pair nor a membership.
    fn remove_if_unconnected(&mut self, uid: &str, effects: &mut Vec<Effect>) -> bool {
        if self.has_any_connection(uid) {
            return false;
        }
        self.peer_groups.remove(uid);
        if let Some(mut peer) = self.peers.remove(uid) {
            debug!("removing peer {} without any connection", uid);
            if peer.mark_offline() {
                effects.push(Effect::Release(peer.user().clone()));
            }
        }
        if self.last_added_user.as_ref().map(|u| u.uid == uid).unwrap_or(false) {
            self.last_added_user = None;
        }
        true
    }

    fn remove_membership(&mut self, uid: &str, gid: &str) {
        if let Some(groups) = self.peer_groups.get_mut(uid) {
            groups.remove(gid);
            if groups.is_empty() {
                self.peer_groups.remove(uid);
            }
        }
        if let Some(members) = self.group_peers.get_mut(gid) {
            members.remove(uid);
        }
    }
}

/// Peer relationship store
pub struct PeerStore {
    state: Mutex<StoreState>,
    applier: Arc<dyn ManifestApplier>,
    events: Arc<EventManager>,
}

impl PeerStore {
    pub fn new(applier: Arc<dyn ManifestApplier>, events: Arc<EventManager>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            applier,
            events,
        }
    }

    /// Runs a mutation, invalidates the views, then performs side effects unlocked.
    fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreState, &mut Vec<Effect>) -> Result<T>,
    {
        let mut effects = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let result = f(&mut state, &mut effects);
            state.views.invalidate();
            result
        };

        for effect in effects {
            match effect {
                Effect::Apply(pending) => {
                    self.applier.apply(&pending.user, &pending.player_name, &pending.manifest, pending.forced)
                }
                Effect::Release(user) => self.applier.release(&user),
                Effect::Emit(event) => self.events.emit(event),
            }
        }
        result
    }

    pub fn add_user_pair(&self, dto: UserPairDto, add_to_last_added: bool) {
        let _ = self.mutate(|state, effects| {
            let uid = dto.user.uid.clone();
            let is_new = !state.peers.contains_key(&uid);
            let peer = state
                .peers
                .entry(uid.clone())
                .or_insert_with(|| Peer::new(dto.user.clone()));
            peer.set_user(dto.user.clone());
            peer.set_direct_pair(Some(DirectPair {
                own: dto.own_permissions,
                other: dto.other_permissions,
            }));
            if is_new && add_to_last_added {
                state.last_added_user = Some(dto.user.clone());
            }
            state.apply_last_received(&uid, false, effects);
            Ok(())
        });
    }

    pub fn remove_user_pair(&self, user: &UserData) {
        let _ = self.mutate(|state, effects| {
            let Some(peer) = state.peers.get_mut(&user.uid) else {
                return Ok(());
            };
            peer.set_direct_pair(None);
            if !state.remove_if_unconnected(&user.uid, effects) {
                state.apply_last_received(&user.uid, false, effects);
            }
            Ok(())
        });
    }

    pub fn add_group(&self, dto: GroupFullInfoDto) {
        let _ = self.mutate(|state, _| {
            let gid = dto.group.gid.clone();
            state.group_peers.entry(gid.clone()).or_default();
            state.groups.insert(gid, dto);
            Ok(())
        });
    }

    pub fn remove_group(&self, group: &GroupData) {
        let _ = self.mutate(|state, effects| {
            state.groups.remove(&group.gid);
            let members = state.group_peers.remove(&group.gid).unwrap_or_default();
            for uid in members {
                state.remove_membership(&uid, &group.gid);
                if !state.remove_if_unconnected(&uid, effects) {
                    state.apply_last_received(&uid, false, effects);
                }
            }
            info!("group {} removed", group.alias_or_gid());
            Ok(())
        });
    }

    pub fn set_group_info(&self, dto: GroupInfoDto) -> Result<()> {
        self.mutate(|state, _| {
            let group = state.group_mut(&dto.group.gid)?;
            group.group = dto.group;
            group.owner = dto.owner;
            group.group_permissions = dto.group_permissions;
            Ok(())
        })
    }

    pub fn add_group_pair(&self, dto: GroupPairFullInfoDto) -> Result<()> {
        self.mutate(|state, effects| {
            let gid = dto.group.gid.clone();
            let uid = dto.user.uid.clone();
            if !state.groups.contains_key(&gid) {
                return Err(SyncError::invalid_state(format!("no group found for {}", gid)));
            }
            state
                .peers
                .entry(uid.clone())
                .or_insert_with(|| Peer::new(dto.user.clone()));
            state.peer_groups.entry(uid.clone()).or_default().insert(
                gid.clone(),
                GroupMembership {
                    permissions: dto.permissions,
                    info: dto.info,
                },
            );
            state.group_peers.entry(gid).or_default().insert(uid.clone());
            state.apply_last_received(&uid, false, effects);
            Ok(())
        })
    }

    pub fn remove_group_pair(&self, dto: &GroupPairDto) -> Result<()> {
        self.mutate(|state, effects| {
            if !state.groups.contains_key(&dto.group.gid) {
                return Err(SyncError::invalid_state(format!("no group found for {}", dto.group.gid)));
            }
            if !state.peers.contains_key(&dto.user.uid) {
                return Ok(());
            }
            state.remove_membership(&dto.user.uid, &dto.group.gid);
            if !state.remove_if_unconnected(&dto.user.uid, effects) {
                state.apply_last_received(&dto.user.uid, false, effects);
            }
            Ok(())
        })
    }

    /// The peer changed what it grants us.
    pub fn update_other_permissions(&self, dto: UserPermissionsDto) -> Result<()> {
        self.mutate(|state, effects| {
            let peer = state.peer_mut(&dto.user.uid)?;
            let pair = peer
                .direct_pair_mut()
                .ok_or_else(|| SyncError::invalid_state(format!("no direct pair for {}", dto.user.uid)))?;
            pair.other = dto.permissions;
            state.apply_last_received(&dto.user.uid, false, effects);
            Ok(())
        })
    }

    pub fn update_own_permissions(&self, dto: UserPermissionsDto) -> Result<()> {
        self.mutate(|state, _| {
            let peer = state.peer_mut(&dto.user.uid)?;
            let pair = peer
                .direct_pair_mut()
                .ok_or_else(|| SyncError::invalid_state(format!("no direct pair for {}", dto.user.uid)))?;
            pair.own = dto.permissions;
            Ok(())
        })
    }

    pub fn set_group_permissions(&self, dto: GroupPermissionDto) -> Result<()> {
        self.mutate(|state, effects| {
            let group = state.group_mut(&dto.group.gid)?;
            let previous = group.group_permissions;
            group.group_permissions = dto.permissions;
            if previous.disable_animations != dto.permissions.disable_animations
                || previous.disable_sounds != dto.permissions.disable_sounds
            {
                reapply_group(state, &dto.group.gid, effects);
            }
            Ok(())
        })
    }

    /// Local user's own permissions within a group.
    pub fn set_group_user_permissions(&self, dto: GroupPairUserPermissionDto) -> Result<()> {
        self.mutate(|state, effects| {
            let group = state.group_mut(&dto.group.gid)?;
            let previous = group.group_user_permissions;
            group.group_user_permissions = dto.permissions;
            if previous.disable_animations != dto.permissions.disable_animations
                || previous.disable_sounds != dto.permissions.disable_sounds
            {
                reapply_group(state, &dto.group.gid, effects);
            }
            Ok(())
        })
    }

    /// A member's permissions within a group.
    pub fn set_group_pair_user_permissions(&self, dto: GroupPairUserPermissionDto) -> Result<()> {
        self.mutate(|state, effects| {
            let membership = membership_mut(state, &dto.user.uid, &dto.group.gid)?;
            let previous = membership.permissions;
            membership.permissions = dto.permissions;
            if previous.disable_animations != dto.permissions.disable_animations
                || previous.disable_sounds != dto.permissions.disable_sounds
            {
                state.apply_last_received(&dto.user.uid, false, effects);
            }
            Ok(())
        })
    }

    pub fn set_group_status_info(&self, dto: GroupPairUserInfoDto) -> Result<()> {
        self.mutate(|state, _| {
            state.group_mut(&dto.group.gid)?.group_user_info = dto.info;
            Ok(())
        })
    }

    pub fn set_group_pair_status_info(&self, dto: GroupPairUserInfoDto) -> Result<()> {
        self.mutate(|state, _| {
            membership_mut(state, &dto.user.uid, &dto.group.gid)?.info = dto.info;
            Ok(())
        })
    }

    /// Creates the live connection handle. Already-online peers are left alone.
    pub fn mark_online(&self, dto: OnlineUserIdentDto) -> Result<()> {
        self.mutate(|state, effects| {
            let peer = state.peer_mut(&dto.user.uid)?;
            if peer.mark_online(dto.ident.clone()) {
                debug!("peer {} online", dto.user.alias_or_uid());
                effects.push(Effect::Emit(event_builders::peer_online(&dto.user.uid, &dto.ident)));
            }
            Ok(())
        })
    }

    pub fn mark_offline(&self, user: &UserData) {
        let _ = self.mutate(|state, effects| {
            if let Some(peer) = state.peers.get_mut(&user.uid) {
                if peer.mark_offline() {
                    debug!("peer {} offline", user.alias_or_uid());
                    effects.push(Effect::Release(peer.user().clone()));
                    effects.push(Effect::Emit(event_builders::peer_offline(&user.uid)));
                }
            }
            Ok(())
        });
    }

    /// Stashes the manifest until the peer is initialized, else applies it on change.
    pub fn receive_manifest(&self, dto: OnlineUserManifestDto) -> Result<()> {
        self.mutate(|state, effects| {
            let peer = state.peer_mut(&dto.user.uid)?;
            if peer.receive_manifest(dto.manifest) && peer.is_visible() {
                state.apply_last_received(&dto.user.uid, false, effects);
            }
            Ok(())
        })
    }

    /// Binds the online peer with identity hash `ident` to a visible avatar.
    ///
    /// Returns the peer's uid when this call initialized it.
    pub fn initialize_peer(&self, ident: &str, player_name: &str) -> Option<String> {
        self.mutate(|state, effects| {
            let uid = state
                .peers
                .values()
                .find(|p| p.ident() == Some(ident))
                .map(|p| p.uid().to_string());
            let Some(uid) = uid else {
                return Ok(None);
            };
            let peer = state.peer_mut(&uid)?;
            if !peer.initialize(player_name.to_string()) {
                return Ok(None);
            }
            info!("✅ peer {} visible as {}", uid, player_name);
            effects.push(Effect::Emit(event_builders::peer_visible(&uid, player_name)));
            state.apply_last_received(&uid, false, effects);
            Ok(Some(uid))
        })
        .ok()
        .flatten()
    }

    /// Re-applies the last received manifest regardless of its hash.
    pub fn reload_peer(&self, uid: &str) -> Result<()> {
        self.mutate(|state, effects| {
            state.peer_mut(uid)?;
            state.apply_last_received(uid, true, effects);
            Ok(())
        })
    }

    /// Drops every peer and group (disconnect).
    pub fn clear(&self) {
        let _ = self.mutate(|state, effects| {
            debug!("clearing all peers");
            for peer in state.peers.values_mut() {
                if peer.mark_offline() {
                    effects.push(Effect::Release(peer.user().clone()));
                }
            }
            state.peers.clear();
            state.groups.clear();
            state.peer_groups.clear();
            state.group_peers.clear();
            state.last_added_user = None;
            effects.push(Effect::Emit(event_builders::peers_cleared()));
            Ok(())
        });
    }

    pub fn direct_pairs(&self) -> Vec<UserData> {
        let mut state = self.state.lock();
        let StoreState { peers, views, .. } = &mut *state;
        views.direct_pairs.get_or_compute(|| {
            let mut users: Vec<UserData> = peers
                .values()
                .filter(|p| p.direct_pair().is_some())
                .map(|p| p.user().clone())
                .collect();
            users.sort_by(|a, b| a.uid.cmp(&b.uid));
            users
        })
    }

    /// gid → members
    pub fn group_pairs(&self) -> BTreeMap<String, Vec<UserData>> {
        let mut state = self.state.lock();
        let StoreState {
            peers,
            groups,
            group_peers,
            views,
            ..
        } = &mut *state;
        views.group_pairs.get_or_compute(|| {
            groups
                .keys()
                .map(|gid| {
                    let members = group_peers
                        .get(gid)
                        .map(|uids| {
                            uids.iter()
                                .filter_map(|uid| peers.get(uid).map(|p| p.user().clone()))
                                .collect()
                        })
                        .unwrap_or_default();
                    (gid.clone(), members)
                })
                .collect()
        })
    }

    pub fn online_pairs(&self) -> Vec<UserData> {
        let mut state = self.state.lock();
        let StoreState { peers, views, .. } = &mut *state;
        views.online_pairs.get_or_compute(|| {
            let mut users: Vec<UserData> = peers
                .values()
                .filter(|p| p.is_online())
                .map(|p| p.user().clone())
                .collect();
            users.sort_by(|a, b| a.uid.cmp(&b.uid));
            users
        })
    }

    /// Online peers whose avatar is present locally.
    pub fn visible_users(&self) -> Vec<UserData> {
        let mut state = self.state.lock();
        let StoreState { peers, views, .. } = &mut *state;
        views.visible_users.get_or_compute(|| {
            let mut users: Vec<UserData> = peers
                .values()
                .filter(|p| p.is_visible())
                .map(|p| p.user().clone())
                .collect();
            users.sort_by(|a, b| a.uid.cmp(&b.uid));
            users
        })
    }

    pub fn views_dirty(&self) -> bool {
        let state = self.state.lock();
        state.views.direct_pairs.is_dirty()
            || state.views.group_pairs.is_dirty()
            || state.views.online_pairs.is_dirty()
            || state.views.visible_users.is_dirty()
    }

    pub fn peer(&self, uid: &str) -> Option<PeerSummary> {
        let state = self.state.lock();
        let peer = state.peers.get(uid)?;
        Some(PeerSummary {
            user: peer.user().clone(),
            state: peer.state(),
            direct_pair: peer.direct_pair().copied(),
            groups: state
                .peer_groups
                .get(uid)
                .map(|g| g.keys().cloned().collect())
                .unwrap_or_default(),
            paused: state.is_paused(uid),
            ident: peer.ident().map(str::to_string),
            player_name: peer.player_name().map(str::to_string),
            last_received_hash: peer.last_received_hash().map(str::to_string),
        })
    }

    pub fn contains_peer(&self, uid: &str) -> bool {
        self.state.lock().peers.contains_key(uid)
    }

    pub fn is_paused(&self, uid: &str) -> Option<bool> {
        let state = self.state.lock();
        state.peers.contains_key(uid).then(|| state.is_paused(uid))
    }

    pub fn group(&self, gid: &str) -> Option<GroupFullInfoDto> {
        self.state.lock().groups.get(gid).cloned()
    }

    pub fn groups(&self) -> Vec<GroupFullInfoDto> {
        let mut groups: Vec<_> = self.state.lock().groups.values().cloned().collect();
        groups.sort_by(|a, b| a.group.gid.cmp(&b.group.gid));
        groups
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    /// Uids of every known peer, sorted
    pub fn peer_uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.state.lock().peers.keys().cloned().collect();
        uids.sort();
        uids
    }

    pub fn last_added_user(&self) -> Option<UserData> {
        self.state.lock().last_added_user.clone()
    }

    pub fn clear_last_added_user(&self) {
        self.state.lock().last_added_user = None;
    }
}

fn membership_mut<'a>(state: &'a mut StoreState, uid: &str, gid: &str) -> Result<&'a mut GroupMembership> {
    if !state.groups.contains_key(gid) {
        return Err(SyncError::invalid_state(format!("no group found for {}", gid)));
    }
    state
        .peer_groups
        .get_mut(uid)
        .and_then(|groups| groups.get_mut(gid))
        .ok_or_else(|| SyncError::invalid_state(format!("{} is not a member of {}", uid, gid)))
}

fn reapply_group(state: &mut StoreState, gid: &str, effects: &mut Vec<Effect>) {
    let members: Vec<String> = state
        .group_peers
        .get(gid)
        .map(|m| m.iter().cloned().collect())
        .unwrap_or_default();
    for uid in members {
        state.apply_last_received(&uid, false, effects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EntityKind, ResourceManifest};
    use crate::protocol::{GroupPermissions, UserPermissions};
    use crate::test_helpers::RecordingApplier;

    fn store() -> (PeerStore, Arc<RecordingApplier>) {
        let applier = Arc::new(RecordingApplier::default());
        let store = PeerStore::new(applier.clone(), Arc::new(EventManager::new(64)));
        (store, applier)
    }

    fn user_pair(uid: &str, established: bool) -> UserPairDto {
        UserPairDto {
            user: UserData::new(uid),
            own_permissions: UserPermissions { paired: true, ..Default::default() },
            other_permissions: UserPermissions { paired: established, ..Default::default() },
        }
    }

    fn group(gid: &str) -> GroupFullInfoDto {
        GroupFullInfoDto {
            group: GroupData::new(gid),
            owner: UserData::new("OWNER"),
            group_permissions: GroupPermissions::default(),
            group_user_permissions: GroupUserPermissions::default(),
            group_user_info: GroupUserInfo::default(),
        }
    }

    fn member(gid: &str, uid: &str) -> GroupPairFullInfoDto {
        GroupPairFullInfoDto {
            group: GroupData::new(gid),
            user: UserData::new(uid),
            permissions: GroupUserPermissions::default(),
            info: GroupUserInfo::default(),
        }
    }

    fn manifest_with(paths: &[&str]) -> CharacterManifest {
        let mut resources = ResourceManifest::new();
        for path in paths {
            resources.insert(&format!("c:/mods/{}", path), [*path]);
        }
        let mut manifest = CharacterManifest::new();
        manifest.set_manifest(EntityKind::Player, resources);
        manifest
    }

    fn online(uid: &str, ident: &str) -> OnlineUserIdentDto {
        OnlineUserIdentDto {
            user: UserData::new(uid),
            ident: ident.to_string(),
        }
    }

    #[test]
    fn test_removal_rule() {
        let (store, applier) = store();
        store.add_user_pair(user_pair("UID1", true), true);
        store.add_group(group("G1"));
        store.add_group_pair(member("G1", "UID1")).unwrap();
        store.mark_online(online("UID1", "IDENT1")).unwrap();

        store.remove_user_pair(&UserData::new("UID1"));
        assert!(store.contains_peer("UID1"));

        store
            .remove_group_pair(&GroupPairDto {
                group: GroupData::new("G1"),
                user: UserData::new("UID1"),
            })
            .unwrap();
        assert!(!store.contains_peer("UID1"));
        assert_eq!(applier.released(), vec!["UID1".to_string()]);
        assert!(store.group_pairs()["G1"].is_empty());
    }

    #[test]
    fn test_remove_group_drops_orphans() {
        let (store, _) = store();
        store.add_group(group("G1"));
        store.add_group_pair(member("G1", "UID1")).unwrap();
        store.add_group_pair(member("G1", "UID2")).unwrap();
        store.add_user_pair(user_pair("UID2", true), false);

        store.remove_group(&GroupData::new("G1"));
        assert_eq!(store.peer_uids(), vec!["UID2".to_string()]);
        assert!(store.group("G1").is_none());
    }

    #[test]
    fn test_unknown_entities_fail_loudly() {
        let (store, _) = store();
        assert!(matches!(
            store.add_group_pair(member("MISSING", "UID1")),
            Err(SyncError::InvalidState(_))
        ));
        assert!(matches!(
            store.mark_online(online("NOBODY", "X")),
            Err(SyncError::InvalidState(_))
        ));

        store.add_group(group("G1"));
        store.add_group_pair(member("G1", "UID1")).unwrap();
        // group-only peer has no direct pair to update
        assert!(store
            .update_other_permissions(UserPermissionsDto {
                user: UserData::new("UID1"),
                permissions: UserPermissions::default(),
            })
            .is_err());
    }

    #[test]
    fn test_online_is_idempotent_and_views_cache() {
        let (store, _) = store();
        store.add_user_pair(user_pair("UID1", true), true);
        assert!(store.views_dirty());
        assert!(store.online_pairs().is_empty());
        assert!(store.views_dirty());
        assert_eq!(store.direct_pairs().len(), 1);
        assert!(store.group_pairs().is_empty());
        assert!(store.visible_users().is_empty());
        assert!(!store.views_dirty());

        store.mark_online(online("UID1", "IDENT1")).unwrap();
        assert!(store.views_dirty());
        store.mark_online(online("UID1", "IDENT2")).unwrap();
        assert_eq!(store.online_pairs().len(), 1);
        assert_eq!(store.peer("UID1").unwrap().ident.as_deref(), Some("IDENT1"));
        assert_eq!(store.direct_pairs().len(), 1);
        assert_eq!(store.last_added_user().unwrap().uid, "UID1");
    }

    #[test]
    fn test_manifest_stashed_until_initialized() {
        let (store, applier) = store();
        store.add_user_pair(user_pair("UID1", true), true);
        store.mark_online(online("UID1", "IDENT1")).unwrap();
        store
            .receive_manifest(OnlineUserManifestDto {
                user: UserData::new("UID1"),
                manifest: manifest_with(&["chara/a.tex"]),
            })
            .unwrap();
        assert_eq!(applier.apply_count(), 0);
        assert!(store.visible_users().is_empty());

        assert_eq!(store.initialize_peer("IDENT1", "Some Name").as_deref(), Some("UID1"));
        assert_eq!(applier.apply_count(), 1);
        assert_eq!(store.visible_users().len(), 1);
        assert!(store.initialize_peer("IDENT1", "Some Name").is_none());

        // same manifest again is a no-op, reload forces
        store
            .receive_manifest(OnlineUserManifestDto {
                user: UserData::new("UID1"),
                manifest: manifest_with(&["chara/a.tex"]),
            })
            .unwrap();
        assert_eq!(applier.apply_count(), 1);
        store.reload_peer("UID1").unwrap();
        assert_eq!(applier.apply_count(), 2);
        assert!(applier.last_forced());
    }

    #[test]
    fn test_group_permission_change_reapplies_members() {
        let (store, applier) = store();
        store.add_group(group("G1"));
        store.add_group_pair(member("G1", "UID1")).unwrap();
        store.mark_online(online("UID1", "IDENT1")).unwrap();
        store.initialize_peer("IDENT1", "Name");
        store
            .receive_manifest(OnlineUserManifestDto {
                user: UserData::new("UID1"),
                manifest: manifest_with(&["chara/a.tex", "sound/b.scd"]),
            })
            .unwrap();
        assert_eq!(applier.last_entry_count(), 2);

        store
            .set_group_permissions(GroupPermissionDto {
                group: GroupData::new("G1"),
                permissions: GroupPermissions { disable_sounds: true, ..Default::default() },
            })
            .unwrap();
        assert_eq!(applier.apply_count(), 2);
        assert_eq!(applier.last_entry_count(), 1);

        // unrelated permission change does not re-apply
        store
            .set_group_permissions(GroupPermissionDto {
                group: GroupData::new("G1"),
                permissions: GroupPermissions {
                    disable_sounds: true,
                    disable_invites: true,
                    ..Default::default()
                },
            })
            .unwrap();
        assert_eq!(applier.apply_count(), 2);
    }

    #[test]
    fn test_direct_pause_or_semantics() {
        let (store, _) = store();
        store.add_user_pair(user_pair("UID1", true), true);
        assert_eq!(store.is_paused("UID1"), Some(false));

        store
            .update_own_permissions(UserPermissionsDto {
                user: UserData::new("UID1"),
                permissions: UserPermissions { paired: true, paused: true, ..Default::default() },
            })
            .unwrap();
        assert_eq!(store.is_paused("UID1"), Some(true));
        assert_eq!(store.is_paused("NOBODY"), None);
    }

    #[test]
    fn test_clear_releases_everything() {
        let (store, applier) = store();
        store.add_user_pair(user_pair("UID1", true), true);
        store.add_user_pair(user_pair("UID2", true), true);
        store.mark_online(online("UID1", "IDENT1")).unwrap();

        store.clear();
        assert_eq!(store.peer_count(), 0);
        assert!(store.groups().is_empty());
        assert_eq!(applier.released(), vec!["UID1".to_string()]);
        assert!(store.last_added_user().is_none());
    }
}
