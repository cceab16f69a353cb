//! Inbound relay event dispatch
//!
//! Every push is routed into the peer store or the session state. Handlers
//! run safely: a failure is logged and the dispatch loop keeps going.

use crate::connection_state::ConnectionStateManager;
use crate::error::Result;
use crate::events::{event_builders, EventManager};
use crate::protocol::{GroupPairUserInfoDto, GroupPairUserPermissionDto, MessageSeverity, RelayEvent};
use crate::store::PeerStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a relay push can touch
#[derive(Clone)]
pub struct RelayCallbacks {
    store: Arc<PeerStore>,
    state: ConnectionStateManager,
    events: Arc<EventManager>,
    downloads_ready: Arc<Mutex<HashSet<Uuid>>>,
}

impl RelayCallbacks {
    pub fn new(store: Arc<PeerStore>, state: ConnectionStateManager, events: Arc<EventManager>) -> Self {
        Self {
            store,
            state,
            events,
            downloads_ready: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_download_ready(&self, request_id: &Uuid) -> bool {
        self.downloads_ready.lock().contains(request_id)
    }

    /// Forgets a download once the transfer layer consumed it.
    pub fn clear_download(&self, request_id: &Uuid) -> bool {
        self.downloads_ready.lock().remove(request_id)
    }

    /// Forgets every recorded download; the relay session they belong to is gone.
    pub fn clear_downloads(&self) {
        self.downloads_ready.lock().clear();
    }

    /// Handles one push; errors are logged, never propagated.
    pub fn dispatch(&self, event: RelayEvent) {
        let event_type = event.event_type();
        debug!("relay push: {}", event_type);
        if let Err(e) = self.handle(event) {
            error!("failed to handle relay push {}: {}", event_type, e);
        }
    }

    fn is_self(&self, uid: &str) -> bool {
        self.state.uid().as_deref() == Some(uid)
    }

    fn handle(&self, event: RelayEvent) -> Result<()> {
        match event {
            RelayEvent::UserPairAdded(dto) => {
                self.store.add_user_pair(dto, true);
                Ok(())
            }
            RelayEvent::UserPairRemoved(user) => {
                self.store.remove_user_pair(&user);
                Ok(())
            }
            RelayEvent::UserOnline(dto) => self.store.mark_online(dto),
            RelayEvent::UserOffline(user) => {
                self.store.mark_offline(&user);
                Ok(())
            }
            RelayEvent::UserManifestReceived(dto) => self.store.receive_manifest(dto),
            RelayEvent::OtherPermissionsUpdated(dto) => self.store.update_other_permissions(dto),
            RelayEvent::OwnPermissionsUpdated(dto) => self.store.update_own_permissions(dto),
            RelayEvent::GroupFullInfo(dto) => {
                self.store.add_group(dto);
                Ok(())
            }
            RelayEvent::GroupInfoChanged(dto) => self.store.set_group_info(dto),
            RelayEvent::GroupDeleted(group) => {
                self.store.remove_group(&group);
                Ok(())
            }
            RelayEvent::GroupPermissionsChanged(dto) => self.store.set_group_permissions(dto),
            RelayEvent::GroupMemberJoined(dto) => {
                if self.is_self(&dto.user.uid) {
                    return Ok(());
                }
                self.store.add_group_pair(dto)
            }
            RelayEvent::GroupMemberLeft(dto) => self.store.remove_group_pair(&dto),
            RelayEvent::GroupMemberPermissionsChanged(dto) => self.member_permissions_changed(dto),
            RelayEvent::GroupMemberStatusChanged(dto) => self.member_status_changed(dto),
            RelayEvent::SystemInfoUpdated(info) => {
                self.state.set_system_info(info);
                self.events.emit(event_builders::system_info_updated(info.online_users));
                Ok(())
            }
            RelayEvent::ServerMessage { severity, message } => {
                match severity {
                    MessageSeverity::Information => info!("relay message: {}", message),
                    MessageSeverity::Warning => warn!("relay message: {}", message),
                    MessageSeverity::Error => error!("relay message: {}", message),
                }
                self.events.emit(event_builders::server_message(severity, message));
                Ok(())
            }
            RelayEvent::DownloadReady(request_id) => {
                self.downloads_ready.lock().insert(request_id);
                self.events.emit(event_builders::download_ready(request_id));
                Ok(())
            }
        }
    }

    /// Our own entry updates the group-level record, anyone else's the membership.
    fn member_permissions_changed(&self, dto: GroupPairUserPermissionDto) -> Result<()> {
        if self.is_self(&dto.user.uid) {
            self.store.set_group_user_permissions(dto)
        } else {
            self.store.set_group_pair_user_permissions(dto)
        }
    }

    fn member_status_changed(&self, dto: GroupPairUserInfoDto) -> Result<()> {
        if self.is_self(&dto.user.uid) {
            self.store.set_group_status_info(dto)
        } else {
            self.store.set_group_pair_status_info(dto)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ConnectionDescriptor, GroupData, GroupFullInfoDto, GroupPermissions, GroupUserInfo,
        GroupUserPermissions, OnlineUserIdentDto, ServerInfoDto, SystemInfoDto, UserData,
    };
    use crate::test_helpers::RecordingApplier;

    fn callbacks() -> RelayCallbacks {
        let events = Arc::new(EventManager::new(64));
        let store = Arc::new(PeerStore::new(Arc::new(RecordingApplier::default()), events.clone()));
        let state = ConnectionStateManager::new();
        state.set_descriptor(Some(ConnectionDescriptor {
            user: UserData::new("SELF"),
            server_version: crate::version::PROTOCOL_VERSION,
            server_info: ServerInfoDto::default(),
            is_admin: false,
            is_moderator: false,
        }));
        RelayCallbacks::new(store, state, events)
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

    #[test]
    fn test_failed_handler_does_not_panic() {
        let callbacks = callbacks();
        callbacks.dispatch(RelayEvent::UserOnline(OnlineUserIdentDto {
            user: UserData::new("UNKNOWN"),
            ident: "IDENT".to_string(),
        }));
        callbacks.dispatch(RelayEvent::SystemInfoUpdated(SystemInfoDto { online_users: 42 }));
        assert_eq!(callbacks.state.system_info().online_users, 42);
    }

    #[test]
    fn test_own_permission_change_targets_group_record() {
        let callbacks = callbacks();
        callbacks.dispatch(RelayEvent::GroupFullInfo(group("G1")));
        callbacks.dispatch(RelayEvent::GroupMemberPermissionsChanged(GroupPairUserPermissionDto {
            group: GroupData::new("G1"),
            user: UserData::new("SELF"),
            permissions: GroupUserPermissions { paused: true, ..Default::default() },
        }));
        let group = callbacks.store.group("G1").unwrap();
        assert!(group.group_user_permissions.paused);
    }

    #[test]
    fn test_download_ready_recorded() {
        let callbacks = callbacks();
        let request_id = Uuid::new_v4();
        assert!(!callbacks.is_download_ready(&request_id));
        callbacks.dispatch(RelayEvent::DownloadReady(request_id));
        assert!(callbacks.is_download_ready(&request_id));
        assert!(callbacks.clear_download(&request_id));
        assert!(!callbacks.clear_download(&request_id));
    }

    #[test]
    fn test_clear_downloads_forgets_all() {
        let callbacks = callbacks();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        callbacks.dispatch(RelayEvent::DownloadReady(first));
        callbacks.dispatch(RelayEvent::DownloadReady(second));

        callbacks.clear_downloads();
        assert!(!callbacks.is_download_ready(&first));
        assert!(!callbacks.is_download_ready(&second));
    }
}
