//! Pause and filter rules derived from pair and group permissions

use crate::manifest::CharacterManifest;
use crate::protocol::{GroupPermissions, GroupUserPermissions, UserPermissions};
use serde::{Deserialize, Serialize};

const SOUND_EXTENSIONS: &[&str] = &["scd"];
const ANIMATION_EXTENSIONS: &[&str] = &["tmb", "pap"];

/// Both directions of a direct pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPair {
    /// What we grant the peer
    pub own: UserPermissions,
    /// What the peer grants us
    pub other: UserPermissions,
}

impl DirectPair {
    /// Both sides added each other.
    pub fn is_established(&self) -> bool {
        self.other.paired
    }
}

/// Permissions that apply to one group membership of a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipPermissions {
    pub group: GroupPermissions,
    /// Local user's own permissions in the group
    pub own: GroupUserPermissions,
    /// The peer's permissions in the group
    pub member: GroupUserPermissions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterFlags {
    pub disable_animations: bool,
    pub disable_sounds: bool,
}

impl FilterFlags {
    pub fn any(&self) -> bool {
        self.disable_animations || self.disable_sounds
    }
}

/// Direct pair: OR of both pause flags. Otherwise every membership must be paused.
pub fn is_paused(direct: Option<&DirectPair>, memberships: &[MembershipPermissions]) -> bool {
    match direct {
        Some(pair) if pair.is_established() => pair.other.paused || pair.own.paused,
        _ => memberships.iter().all(|m| m.own.paused || m.member.paused),
    }
}

/// Nothing is filtered for an established direct pair.
pub fn filter_flags(direct: Option<&DirectPair>, memberships: &[MembershipPermissions]) -> FilterFlags {
    if direct.map(DirectPair::is_established).unwrap_or(false) {
        return FilterFlags::default();
    }
    FilterFlags {
        disable_animations: memberships
            .iter()
            .all(|m| m.group.disable_animations || m.own.disable_animations || m.member.disable_animations),
        disable_sounds: memberships
            .iter()
            .all(|m| m.group.disable_sounds || m.own.disable_sounds || m.member.disable_sounds),
    }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let path = path.to_ascii_lowercase();
    extensions.iter().any(|ext| path.ends_with(ext))
}

/// Drops entries whose every logical path is a disabled file class.
pub fn strip_disabled(manifest: &mut CharacterManifest, flags: FilterFlags) {
    if !flags.any() {
        return;
    }
    for resources in manifest.file_replacements.values_mut() {
        resources.retain(|_, paths| {
            let sound = flags.disable_sounds && paths.iter().all(|p| has_extension(p, SOUND_EXTENSIONS));
            let animation =
                flags.disable_animations && paths.iter().all(|p| has_extension(p, ANIMATION_EXTENSIONS));
            !(sound || animation)
        });
    }
    manifest.file_replacements.retain(|_, resources| !resources.is_empty());
}
