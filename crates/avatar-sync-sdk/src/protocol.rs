//! Relay data transfer objects
//!
//! Shapes exchanged with the relay: directory entries, permission sets, the
//! connection descriptor and every push event the relay can send.

use crate::manifest::CharacterManifest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote user identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserData {
    pub uid: String,
    pub alias: Option<String>,
}

impl UserData {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            alias: None,
        }
    }

    pub fn alias_or_uid(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|alias| !alias.is_empty())
            .unwrap_or(&self.uid)
    }
}

/// One side of a direct pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    /// This side has added the other
    pub paired: bool,
    pub paused: bool,
    pub disable_animations: bool,
    pub disable_sounds: bool,
}

/// Group-wide permissions set by the owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermissions {
    pub disable_animations: bool,
    pub disable_sounds: bool,
    pub disable_invites: bool,
}

/// A member's own permissions within a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUserPermissions {
    pub paused: bool,
    pub disable_animations: bool,
    pub disable_sounds: bool,
}

/// Member status within a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUserInfo {
    pub moderator: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupData {
    pub gid: String,
    pub alias: Option<String>,
}

impl GroupData {
    pub fn new(gid: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            alias: None,
        }
    }

    pub fn alias_or_gid(&self) -> &str {
        self.alias
            .as_deref()
            .filter(|alias| !alias.is_empty())
            .unwrap_or(&self.gid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPairDto {
    pub user: UserData,
    pub own_permissions: UserPermissions,
    pub other_permissions: UserPermissions,
}

/// Full group entry as seen by the local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFullInfoDto {
    pub group: GroupData,
    pub owner: UserData,
    pub group_permissions: GroupPermissions,
    /// Local user's own permissions in this group
    pub group_user_permissions: GroupUserPermissions,
    /// Local user's status in this group
    pub group_user_info: GroupUserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfoDto {
    pub group: GroupData,
    pub owner: UserData,
    pub group_permissions: GroupPermissions,
}

/// A member of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPairFullInfoDto {
    pub group: GroupData,
    pub user: UserData,
    pub permissions: GroupUserPermissions,
    pub info: GroupUserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPairDto {
    pub group: GroupData,
    pub user: UserData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPermissionDto {
    pub group: GroupData,
    pub permissions: GroupPermissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPairUserPermissionDto {
    pub group: GroupData,
    pub user: UserData,
    pub permissions: GroupUserPermissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPairUserInfoDto {
    pub group: GroupData,
    pub user: UserData,
    pub info: GroupUserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPermissionsDto {
    pub user: UserData,
    pub permissions: UserPermissions,
}

/// An online peer and the identity hash of its avatar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUserIdentDto {
    pub user: UserData,
    pub ident: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUserManifestDto {
    pub user: UserData,
    pub manifest: CharacterManifest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfoDto {
    pub online_users: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoDto {
    pub name: String,
    pub short_name: String,
    pub motd: Option<String>,
}

/// Returned by the relay right after the transport opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub user: UserData,
    pub server_version: u32,
    pub server_info: ServerInfoDto,
    pub is_admin: bool,
    pub is_moderator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSeverity {
    Information,
    Warning,
    Error,
}

/// Push events sent by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayEvent {
    UserPairAdded(UserPairDto),
    UserPairRemoved(UserData),
    UserOnline(OnlineUserIdentDto),
    UserOffline(UserData),
    UserManifestReceived(OnlineUserManifestDto),
    /// The other side changed what it grants us
    OtherPermissionsUpdated(UserPermissionsDto),
    /// Our own permissions for a pair, echoed back
    OwnPermissionsUpdated(UserPermissionsDto),
    GroupFullInfo(GroupFullInfoDto),
    GroupInfoChanged(GroupInfoDto),
    GroupDeleted(GroupData),
    GroupPermissionsChanged(GroupPermissionDto),
    GroupMemberJoined(GroupPairFullInfoDto),
    GroupMemberLeft(GroupPairDto),
    GroupMemberPermissionsChanged(GroupPairUserPermissionDto),
    GroupMemberStatusChanged(GroupPairUserInfoDto),
    SystemInfoUpdated(SystemInfoDto),
    ServerMessage {
        severity: MessageSeverity,
        message: String,
    },
    DownloadReady(Uuid),
}

impl RelayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RelayEvent::UserPairAdded(_) => "user_pair_added",
            RelayEvent::UserPairRemoved(_) => "user_pair_removed",
            RelayEvent::UserOnline(_) => "user_online",
            RelayEvent::UserOffline(_) => "user_offline",
            RelayEvent::UserManifestReceived(_) => "user_manifest_received",
            RelayEvent::OtherPermissionsUpdated(_) => "other_permissions_updated",
            RelayEvent::OwnPermissionsUpdated(_) => "own_permissions_updated",
            RelayEvent::GroupFullInfo(_) => "group_full_info",
            RelayEvent::GroupInfoChanged(_) => "group_info_changed",
            RelayEvent::GroupDeleted(_) => "group_deleted",
            RelayEvent::GroupPermissionsChanged(_) => "group_permissions_changed",
            RelayEvent::GroupMemberJoined(_) => "group_member_joined",
            RelayEvent::GroupMemberLeft(_) => "group_member_left",
            RelayEvent::GroupMemberPermissionsChanged(_) => "group_member_permissions_changed",
            RelayEvent::GroupMemberStatusChanged(_) => "group_member_status_changed",
            RelayEvent::SystemInfoUpdated(_) => "system_info_updated",
            RelayEvent::ServerMessage { .. } => "server_message",
            RelayEvent::DownloadReady(_) => "download_ready",
        }
    }
}
