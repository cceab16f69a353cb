//! Resource manifests
//!
//! A [`ResourceManifest`] maps a resolved file identity to the in-game logical
//! paths that reference it. A [`CharacterManifest`] bundles one manifest per
//! [`EntityKind`] together with the auxiliary appearance fields and is the
//! unit that gets published and pushed to peers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Category of tracked appearance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// The local player's own body
    Player,
    MinionOrMount,
    Pet,
    Companion,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Player,
        EntityKind::MinionOrMount,
        EntityKind::Pet,
        EntityKind::Companion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::MinionOrMount => "minion_or_mount",
            EntityKind::Pet => "pet",
            EntityKind::Companion => "companion",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved identity → sorted, lower-cased logical paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    entries: BTreeMap<String, Vec<String>>,
}

impl ResourceManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds logical paths for a resolved identity.
    ///
    /// Both sides are lower-cased; empty identities and empty paths are dropped.
    pub fn insert<I, S>(&mut self, resolved: &str, logical_paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = resolved.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        let incoming: Vec<String> = logical_paths
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if incoming.is_empty() {
            return;
        }

        let paths = self.entries.entry(key).or_default();
        let merged: BTreeSet<String> = paths.drain(..).chain(incoming).collect();
        *paths = merged.into_iter().collect();
    }

    pub fn get(&self, resolved: &str) -> Option<&Vec<String>> {
        self.entries.get(&resolved.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every logical path in the manifest.
    pub fn logical_paths(&self) -> BTreeSet<String> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn contains_logical_path(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.entries.values().any(|paths| paths.contains(&path))
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &[String]) -> bool,
    {
        self.entries.retain(|resolved, paths| keep(resolved, paths));
    }

    /// Entries ordered by first logical path, case-insensitive. Used for logging.
    pub fn sorted_for_display(&self) -> Vec<(&String, &Vec<String>)> {
        let mut rows: Vec<_> = self.entries.iter().collect();
        rows.sort_by_key(|(_, paths)| paths.first().map(|p| p.to_lowercase()).unwrap_or_default());
        rows
    }
}

/// Published appearance of the local player and its companions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterManifest {
    pub file_replacements: BTreeMap<EntityKind, ResourceManifest>,
    /// Opaque appearance-state blob per kind
    pub appearance_state: BTreeMap<EntityKind, String>,
    pub meta_manipulations: String,
    pub pose_offset: f32,
    pub scale: String,
    pub palette: String,
}

impl CharacterManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// SHA-256 hex over the canonical JSON form.
    ///
    /// All maps are ordered, so equal manifests always hash equal.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode_upper(hasher.finalize())
    }

    pub fn manifest(&self, kind: EntityKind) -> Option<&ResourceManifest> {
        self.file_replacements.get(&kind)
    }

    /// Replaces the manifest for `kind`; an empty manifest removes the kind.
    pub fn set_manifest(&mut self, kind: EntityKind, manifest: ResourceManifest) {
        if manifest.is_empty() {
            self.file_replacements.remove(&kind);
        } else {
            self.file_replacements.insert(kind, manifest);
        }
    }

    pub fn set_appearance_state(&mut self, kind: EntityKind, state: Option<String>) {
        match state.filter(|s| !s.is_empty()) {
            Some(state) => {
                self.appearance_state.insert(kind, state);
            }
            None => {
                self.appearance_state.remove(&kind);
            }
        }
    }

    pub fn clear_kind(&mut self, kind: EntityKind) {
        self.file_replacements.remove(&kind);
        self.appearance_state.remove(&kind);
    }

    pub fn total_entries(&self) -> usize {
        self.file_replacements.values().map(|m| m.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_normalizes_and_dedups() {
        let mut manifest = ResourceManifest::new();
        manifest.insert("C:/Mods/Body.TEX", ["chara/b.tex", "CHARA/A.tex", "chara/b.tex"]);
        manifest.insert("c:/mods/body.tex", ["chara/c.tex"]);
        manifest.insert("", ["chara/x.tex"]);
        manifest.insert("c:/mods/none.tex", Vec::<String>::new());

        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.get("c:/mods/body.tex").unwrap(),
            &vec!["chara/a.tex".to_string(), "chara/b.tex".to_string(), "chara/c.tex".to_string()]
        );
    }

    #[test]
    fn test_display_order_is_by_first_logical_path() {
        let mut manifest = ResourceManifest::new();
        manifest.insert("a_resolved", ["zzz/last.tex"]);
        manifest.insert("z_resolved", ["aaa/first.tex"]);
        let rows = manifest.sorted_for_display();
        assert_eq!(rows[0].0, "z_resolved");
        assert_eq!(rows[1].0, "a_resolved");
    }

    #[test]
    fn test_content_hash_tracks_every_field() {
        let mut manifest = CharacterManifest::new();
        let base = manifest.content_hash();
        assert_eq!(base, CharacterManifest::new().content_hash());

        manifest.palette = "palette".to_string();
        let with_palette = manifest.content_hash();
        assert_ne!(base, with_palette);

        manifest.pose_offset = 0.5;
        assert_ne!(with_palette, manifest.content_hash());

        let mut resources = ResourceManifest::new();
        resources.insert("r", ["chara/a.tex"]);
        let before = manifest.content_hash();
        manifest.set_manifest(EntityKind::Pet, resources);
        assert_ne!(before, manifest.content_hash());

        manifest.set_manifest(EntityKind::Pet, ResourceManifest::new());
        assert_eq!(before, manifest.content_hash());
    }
}
