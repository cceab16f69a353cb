//! Change scheduler
//!
//! Coalesces change notifications per entity kind and drives at most one
//! resolution pass at a time. Publishes `ManifestUpdated` only when the
//! content hash differs from the last publish.
//!
//! Auxiliary fields:
//! - pose offset and scale publish immediately when they change
//! - palette changes are debounced, each new change restarts the window

use crate::events::{event_builders, EventManager};
use crate::manifest::{CharacterManifest, EntityKind};
use crate::resolver::{ResolvedEntity, ResourceGraphResolver};
use crate::snapshot::AppearanceSnapshotSource;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct SchedulerInner {
    resolver: Arc<ResourceGraphResolver>,
    source: Arc<dyn AppearanceSnapshotSource>,
    events: Arc<EventManager>,
    pending: Mutex<BTreeSet<EntityKind>>,
    in_flight: AtomicBool,
    current: RwLock<CharacterManifest>,
    last_published_hash: Mutex<Option<String>>,
    /// Held from reading `current` until the event is emitted
    publish_lock: Mutex<()>,
    palette_debounce: Duration,
    palette_token: Mutex<CancellationToken>,
}

#[derive(Clone)]
pub struct ChangeScheduler {
    inner: Arc<SchedulerInner>,
}

impl ChangeScheduler {
    pub fn new(
        resolver: Arc<ResourceGraphResolver>,
        source: Arc<dyn AppearanceSnapshotSource>,
        events: Arc<EventManager>,
        palette_debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                resolver,
                source,
                events,
                pending: Mutex::new(BTreeSet::new()),
                in_flight: AtomicBool::new(false),
                current: RwLock::new(CharacterManifest::new()),
                last_published_hash: Mutex::new(None),
                publish_lock: Mutex::new(()),
                palette_debounce,
                palette_token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Queues `kind` for the next pass. Queuing twice is a no-op.
    pub fn notify_changed(&self, kind: EntityKind) {
        if self.inner.pending.lock().insert(kind) {
            debug!("[{}] queued for resolution", kind);
        }
    }

    /// Starts a pass over every queued kind unless one is already running.
    ///
    /// Called once per host frame. Returns the handle of the started pass.
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let kinds: Vec<EntityKind> = std::mem::take(&mut *self.inner.pending.lock())
            .into_iter()
            .collect();
        if kinds.is_empty() {
            self.inner.in_flight.store(false, Ordering::Release);
            return None;
        }

        let mut guard = PassGuard {
            inner: self.inner.clone(),
            finished: false,
        };
        Some(tokio::spawn(async move {
            guard.inner.run_pass(kinds).await;
            guard.finished = true;
        }))
    }

    /// Drops everything known about `kind` (entity despawned).
    pub fn clear_kind(&self, kind: EntityKind) {
        self.inner.pending.lock().remove(&kind);
        self.inner.resolver.forget_kind(kind);
        self.inner.current.write().clear_kind(kind);
        self.inner.publish_if_changed();
    }

    pub fn set_pose_offset(&self, offset: f32) {
        {
            let mut current = self.inner.current.write();
            if current.pose_offset == offset {
                return;
            }
            current.pose_offset = offset;
        }
        self.inner.publish_if_changed();
    }

    pub fn set_scale(&self, scale: String) {
        {
            let mut current = self.inner.current.write();
            if current.scale == scale {
                return;
            }
            current.scale = scale;
        }
        self.inner.publish_if_changed();
    }

    /// Debounced: only the last value within the window is published.
    pub fn set_palette(&self, palette: String) {
        let token = {
            let mut slot = self.inner.palette_token.lock();
            slot.cancel();
            *slot = CancellationToken::new();
            slot.clone()
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(inner.palette_debounce) => {
                    let changed = {
                        let mut current = inner.current.write();
                        let changed = current.palette != palette;
                        current.palette = palette;
                        changed
                    };
                    if changed {
                        inner.publish_if_changed();
                    }
                }
            }
        });
    }

    pub fn current_manifest(&self) -> CharacterManifest {
        self.inner.current.read().clone()
    }

    pub fn last_published_hash(&self) -> Option<String> {
        self.inner.last_published_hash.lock().clone()
    }

    pub fn is_resolving(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn pending_kinds(&self) -> Vec<EntityKind> {
        self.inner.pending.lock().iter().copied().collect()
    }

    pub fn shutdown(&self) {
        self.inner.palette_token.lock().cancel();
        self.inner.pending.lock().clear();
    }
}

/// Clears the in-flight flag when the pass ends, including by panic or abort.
struct PassGuard {
    inner: Arc<SchedulerInner>,
    finished: bool,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        if !self.finished {
            error!("critical: resolution pass aborted, keeping previous manifest");
        }
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl SchedulerInner {
    async fn run_pass(&self, kinds: Vec<EntityKind>) {
        debug!("resolution pass over {:?}", kinds);
        let mut results: Vec<(EntityKind, ResolvedEntity)> = Vec::with_capacity(kinds.len());

        for kind in kinds {
            let previous = self.current.read().manifest(kind).cloned();
            match self
                .resolver
                .resolve(self.source.as_ref(), previous.as_ref(), kind)
                .await
            {
                Ok(entity) => results.push((kind, entity)),
                Err(e) => {
                    error!("[{}] critical: resolution pass failed, keeping previous manifest: {}", kind, e);
                    return;
                }
            }
        }

        {
            let mut current = self.current.write();
            for (kind, entity) in results {
                if entity.stale {
                    continue;
                }
                current.set_manifest(kind, entity.manifest);
                current.set_appearance_state(kind, entity.appearance_state);
                if kind == EntityKind::Player {
                    current.meta_manipulations = entity.meta_manipulations.unwrap_or_default();
                }
            }
        }

        self.publish_if_changed();
    }

    /// Listeners run under the publish lock and must not call back into the scheduler.
    fn publish_if_changed(&self) {
        let _publishing = self.publish_lock.lock();
        let manifest = self.current.read().clone();
        let hash = manifest.content_hash();

        {
            let mut last = self.last_published_hash.lock();
            if last.as_deref() == Some(hash.as_str()) {
                debug!("manifest unchanged ({}), not publishing", hash);
                return;
            }
            *last = Some(hash.clone());
        }

        info!(
            "✅ manifest published: {} entries across {} kinds, hash {}",
            manifest.total_entries(),
            manifest.file_replacements.len(),
            hash
        );
        self.events
            .emit(event_builders::manifest_updated(Arc::new(manifest), hash));
    }
}
