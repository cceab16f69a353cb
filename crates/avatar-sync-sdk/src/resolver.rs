//! Resource graph resolver
//!
//! Turns an [`AppearanceSnapshot`] into a deduplicated [`ResourceManifest`]:
//! - walks character models, their materials, textures and shader packages
//! - for the player: weapon/offhand attachments, skeleton, decals
//! - resolves the collected paths through the [`PathResolver`] oracle
//! - merges semi-transient paths recorded by the [`TransientResourceStore`]

use crate::error::{Result, SyncError};
use crate::manifest::{EntityKind, ResourceManifest};
use crate::snapshot::{
    AppearanceSnapshot, AppearanceSnapshotSource, ModelRef, MaterialRef, PathResolver,
    ResolvedPaths, ResourceCategory, SubResource,
};
use crate::transient::TransientResourceStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SHADER_PACKAGE_PREFIX: &str = "shader/sm5/shpk/";
const VARIANT_MARKER: &str = "--";

/// Paths collected by the static walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSets {
    /// Logical paths to resolve to a file
    pub forward: BTreeSet<String>,
    /// Resolved files to map back to every logical path
    pub reverse: BTreeSet<String>,
}

/// Result of resolving one entity kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedEntity {
    pub manifest: ResourceManifest,
    pub appearance_state: Option<String>,
    pub meta_manipulations: Option<String>,
    /// The entity was gone; `manifest` is the previous one
    pub stale: bool,
}

pub struct ResourceGraphResolver {
    oracle: Arc<dyn PathResolver>,
    transient: Arc<dyn TransientResourceStore>,
    oracle_timeout: Duration,
}

impl ResourceGraphResolver {
    pub fn new(
        oracle: Arc<dyn PathResolver>,
        transient: Arc<dyn TransientResourceStore>,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            transient,
            oracle_timeout,
        }
    }

    /// Drops semi-transient paths pinned for `kind`.
    pub fn forget_kind(&self, kind: EntityKind) {
        self.transient.clear_kind(kind);
    }

    /// Resolves the current appearance of `kind`.
    ///
    /// A vanished entity yields `previous` unchanged (marked stale); any other
    /// failure is returned and the caller keeps its previous manifest.
    pub async fn resolve(
        &self,
        source: &dyn AppearanceSnapshotSource,
        previous: Option<&ResourceManifest>,
        kind: EntityKind,
    ) -> Result<ResolvedEntity> {
        let snapshot = match source.snapshot(kind).await {
            Ok(snapshot) => snapshot,
            Err(SyncError::EntityUnavailable(reason)) => {
                debug!("[{}] entity unavailable ({}), keeping previous manifest", kind, reason);
                return Ok(ResolvedEntity {
                    manifest: previous.cloned().unwrap_or_default(),
                    stale: true,
                    ..Default::default()
                });
            }
            Err(e) => return Err(e),
        };

        let manifest = self.resolve_snapshot(&snapshot, kind).await?;
        Ok(ResolvedEntity {
            manifest,
            appearance_state: snapshot.appearance_state.clone(),
            meta_manipulations: snapshot.meta_manipulations.clone(),
            stale: false,
        })
    }

    pub async fn resolve_snapshot(
        &self,
        snapshot: &AppearanceSnapshot,
        kind: EntityKind,
    ) -> Result<ResourceManifest> {
        let paths = self.collect_paths(snapshot, kind);
        let forward: Vec<String> = paths.forward.into_iter().collect();
        let reverse: Vec<String> = paths.reverse.into_iter().collect();
        debug!(
            "[{}] resolving {} forward / {} reverse paths",
            kind,
            forward.len(),
            reverse.len()
        );

        let resolved = self.call_oracle(&forward, &reverse).await?;
        let mut manifest = merge_resolved(&forward, &reverse, &resolved);

        let static_paths = manifest.logical_paths();
        if kind == EntityKind::Pet {
            // pets are redrawn on any change, keep their files pinned
            self.transient.add_semi_transient(kind, &static_paths);
        }

        self.merge_transient(snapshot.object_id, kind, &mut manifest, &static_paths)
            .await?;

        log_manifest(kind, &manifest, &static_paths);
        Ok(manifest)
    }

    /// Static walk of the snapshot; paths are lower-cased.
    pub fn collect_paths(&self, snapshot: &AppearanceSnapshot, kind: EntityKind) -> PathSets {
        let mut paths = PathSets::default();

        for model in snapshot
            .models
            .iter()
            .filter(|m| m.category == ResourceCategory::Character)
        {
            walk_model(model, &mut paths);
        }

        if kind != EntityKind::Player {
            return paths;
        }

        for attachment in [&snapshot.weapon, &snapshot.offhand].into_iter().flatten() {
            for model in &attachment.models {
                walk_model(model, &mut paths);
            }
            paths
                .forward
                .extend(self.transient.transient_paths(attachment.object_id));
        }

        if let Some(id) = snapshot.skeleton_id {
            paths.forward.insert(skeleton_path(id));
        }

        for (label, decal) in [
            ("face decal", &snapshot.face_decal),
            ("legacy body decal", &snapshot.legacy_body_decal),
        ] {
            match decal {
                SubResource::Present(path) if !path.trim().is_empty() => {
                    let path = normalize(path);
                    if let Some(variant) = platform_variant(&path) {
                        paths.reverse.insert(variant);
                    }
                    paths.reverse.insert(path);
                }
                SubResource::Unreadable(reason) => {
                    warn!("[{}] could not read {}: {}", kind, label, reason);
                }
                _ => {}
            }
        }

        paths
    }

    async fn call_oracle(&self, forward: &[String], reverse: &[String]) -> Result<ResolvedPaths> {
        if forward.is_empty() && reverse.is_empty() {
            return Ok(ResolvedPaths::default());
        }

        let resolved = tokio::time::timeout(
            self.oracle_timeout,
            self.oracle.resolve_paths(forward, reverse),
        )
        .await
        .map_err(|_| {
            SyncError::Timeout(format!(
                "path resolution did not answer within {:?}",
                self.oracle_timeout
            ))
        })??;

        if resolved.forward.len() != forward.len() || resolved.reverse.len() != reverse.len() {
            return Err(SyncError::Other(format!(
                "path resolution returned {}/{} results for {}/{} paths",
                resolved.forward.len(),
                resolved.reverse.len(),
                forward.len(),
                reverse.len()
            )));
        }
        Ok(resolved)
    }

    async fn merge_transient(
        &self,
        object_id: u64,
        kind: EntityKind,
        manifest: &mut ResourceManifest,
        static_paths: &BTreeSet<String>,
    ) -> Result<()> {
        self.transient.clear_transient_paths(object_id, static_paths);
        self.transient.persist_transient_resources(object_id, kind);

        let pending: Vec<String> = self
            .transient
            .semi_transient_paths(kind)
            .into_iter()
            .filter(|p| !static_paths.contains(p))
            .collect();

        if !pending.is_empty() {
            let resolved = self.call_oracle(&pending, &[]).await?;
            let mut added = ResourceManifest::new();
            for (path, target) in pending.iter().zip(&resolved.forward) {
                if !target.trim().is_empty() && !target.eq_ignore_ascii_case(path) {
                    added.insert(target, [path]);
                }
            }
            for (resolved_identity, paths) in added.sorted_for_display() {
                debug!("[{}] transient {} => {}", kind, paths.join(", "), resolved_identity);
                manifest.insert(resolved_identity, paths);
            }
        }

        self.transient
            .retain_semi_transient(kind, &manifest.logical_paths());
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    path.trim().replace('\\', "/").to_lowercase()
}

fn walk_model(model: &ModelRef, paths: &mut PathSets) {
    let Some(model_path) = model.path.as_deref().filter(|p| !p.trim().is_empty()) else {
        warn!("skipping model with unreadable path");
        return;
    };
    paths.reverse.insert(normalize(model_path));

    for material in &model.materials {
        walk_material(material, paths);
    }
}

fn walk_material(material: &MaterialRef, paths: &mut PathSets) {
    let Some(raw_name) = material.name.as_deref().filter(|n| !n.trim().is_empty()) else {
        warn!("skipping material with unreadable name");
        return;
    };
    paths.reverse.insert(normalize(&material_logical_path(raw_name)));

    for texture in material.textures.iter().flatten() {
        if texture.trim().is_empty() {
            continue;
        }
        let texture = normalize(texture);
        if let Some(variant) = platform_variant(&texture) {
            paths.forward.insert(variant);
        }
        paths.forward.insert(texture);
    }

    if let Some(shader) = material.shader_package.as_deref().filter(|s| !s.trim().is_empty()) {
        paths
            .forward
            .insert(normalize(&format!("{}{}", SHADER_PACKAGE_PREFIX, shader)));
    }
}

/// Third `|`-separated segment of a decorated handle name, else the raw name.
pub fn material_logical_path(raw_name: &str) -> String {
    let segments: Vec<&str> = raw_name.split('|').collect();
    if segments.len() >= 3 {
        segments[2].to_string()
    } else {
        raw_name.to_string()
    }
}

/// Texture variant with the marker after the last `/`; `None` for variants.
pub fn platform_variant(path: &str) -> Option<String> {
    if path.contains("/--") {
        return None;
    }
    let insert_at = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let mut variant = String::with_capacity(path.len() + VARIANT_MARKER.len());
    variant.push_str(&path[..insert_at]);
    variant.push_str(VARIANT_MARKER);
    variant.push_str(&path[insert_at..]);
    Some(variant)
}

pub fn skeleton_path(race_sex_id: u16) -> String {
    format!(
        "chara/human/c{:04}/skeleton/base/b0001/skl_c{:04}b0001.sklb",
        race_sex_id, race_sex_id
    )
}

/// Folds oracle answers into a manifest keyed by resolved identity.
///
/// Entries whose only logical path is the identity itself (unmodified files)
/// are dropped.
fn merge_resolved(forward: &[String], reverse: &[String], resolved: &ResolvedPaths) -> ResourceManifest {
    let mut manifest = ResourceManifest::new();

    for (path, target) in forward.iter().zip(&resolved.forward) {
        manifest.insert(target, [path]);
    }
    for (file, logical_paths) in reverse.iter().zip(&resolved.reverse) {
        manifest.insert(file, logical_paths);
    }

    manifest.retain(|resolved_identity, paths| {
        paths.iter().any(|p| p.as_str() != resolved_identity)
    });
    manifest
}

fn log_manifest(kind: EntityKind, manifest: &ResourceManifest, static_paths: &BTreeSet<String>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    for (resolved_identity, paths) in manifest.sorted_for_display() {
        let origin = if paths.iter().all(|p| static_paths.contains(p)) {
            "static"
        } else {
            "transient"
        };
        debug!("[{}] {} {} => {}", kind, origin, paths.join(", "), resolved_identity);
    }
}
