//! Host collaborators
//!
//! The core never reads game memory. The host hands it immutable
//! [`AppearanceSnapshot`]s, resolves paths through a [`PathResolver`] and
//! answers presence questions through [`HostEnvironment`].

use crate::error::Result;
use crate::manifest::EntityKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resource category of a model slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceCategory {
    Character,
    Weapon,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRef {
    /// Raw handle name, possibly decorated as `|prefix|path|`. `None` when unreadable.
    pub name: Option<String>,
    /// Texture slots; `None` for unreadable or empty slots
    pub textures: Vec<Option<String>>,
    pub shader_package: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub category: ResourceCategory,
    /// Resolved model file. `None` when unreadable.
    pub path: Option<String>,
    pub materials: Vec<MaterialRef>,
}

/// Weapon or offhand object attached to the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub object_id: u64,
    pub models: Vec<ModelRef>,
}

/// Optional texture that may fail to read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SubResource {
    Present(String),
    #[default]
    Absent,
    Unreadable(String),
}

/// Read-only view of one entity's render graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceSnapshot {
    pub object_id: u64,
    pub models: Vec<ModelRef>,
    pub weapon: Option<AttachmentRef>,
    pub offhand: Option<AttachmentRef>,
    /// Numeric race/sex code used to build the skeleton path
    pub skeleton_id: Option<u16>,
    pub face_decal: SubResource,
    pub legacy_body_decal: SubResource,
    /// Opaque appearance-state blob from the host
    pub appearance_state: Option<String>,
    pub meta_manipulations: Option<String>,
}

impl AppearanceSnapshot {
    pub fn new(object_id: u64) -> Self {
        Self {
            object_id,
            models: Vec::new(),
            weapon: None,
            offhand: None,
            skeleton_id: None,
            face_decal: SubResource::Absent,
            legacy_body_decal: SubResource::Absent,
            appearance_state: None,
            meta_manipulations: None,
        }
    }
}

/// Supplies snapshots of tracked entities.
#[async_trait]
pub trait AppearanceSnapshotSource: Send + Sync {
    /// Fails with `SyncError::EntityUnavailable` when the entity is gone.
    async fn snapshot(&self, kind: EntityKind) -> Result<AppearanceSnapshot>;
}

/// Oracle answer, index-aligned with the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Resolved identity per forward path
    pub forward: Vec<String>,
    /// Logical paths per reverse path
    pub reverse: Vec<Vec<String>>,
}

/// External path-resolution oracle
#[async_trait]
pub trait PathResolver: Send + Sync {
    async fn resolve_paths(&self, forward: &[String], reverse: &[String]) -> Result<ResolvedPaths>;
}

/// Presence questions answered by the host
pub trait HostEnvironment: Send + Sync {
    fn is_logged_in(&self) -> bool;

    fn is_player_present(&self) -> bool;

    /// Hashed identity of the local player, once known
    fn player_identity_hash(&self) -> Option<String>;
}
