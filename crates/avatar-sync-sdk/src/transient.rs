//! Transient resource bookkeeping
//!
//! Transient paths are observed at runtime per game object; persisting them
//! moves them into the semi-transient set of an entity kind, where they stay
//! until a resolution pass no longer finds them.

use crate::manifest::EntityKind;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

pub trait TransientResourceStore: Send + Sync {
    fn record_transient(&self, object_id: u64, path: &str);

    fn transient_paths(&self, object_id: u64) -> BTreeSet<String>;

    /// Drops transient paths already covered by the static walk.
    fn clear_transient_paths(&self, object_id: u64, paths: &BTreeSet<String>);

    /// Moves the object's transient paths into the semi-transient set of `kind`.
    fn persist_transient_resources(&self, object_id: u64, kind: EntityKind);

    fn add_semi_transient(&self, kind: EntityKind, paths: &BTreeSet<String>);

    fn semi_transient_paths(&self, kind: EntityKind) -> BTreeSet<String>;

    /// Keeps only the semi-transient paths of `kind` found in `keep`.
    fn retain_semi_transient(&self, kind: EntityKind, keep: &BTreeSet<String>);

    fn clear_kind(&self, kind: EntityKind);
}

#[derive(Debug, Default)]
struct TransientState {
    transient: HashMap<u64, BTreeSet<String>>,
    semi_transient: HashMap<EntityKind, BTreeSet<String>>,
}

/// In-memory store, keyed by lower-cased path
#[derive(Debug, Default)]
pub struct InMemoryTransientStore {
    state: Mutex<TransientState>,
}

impl InMemoryTransientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransientResourceStore for InMemoryTransientStore {
    fn record_transient(&self, object_id: u64, path: &str) {
        let path = path.trim().to_lowercase();
        if path.is_empty() {
            return;
        }
        self.state.lock().transient.entry(object_id).or_default().insert(path);
    }

    fn transient_paths(&self, object_id: u64) -> BTreeSet<String> {
        self.state
            .lock()
            .transient
            .get(&object_id)
            .cloned()
            .unwrap_or_default()
    }

    fn clear_transient_paths(&self, object_id: u64, paths: &BTreeSet<String>) {
        let mut state = self.state.lock();
        if let Some(set) = state.transient.get_mut(&object_id) {
            set.retain(|p| !paths.contains(p));
            if set.is_empty() {
                state.transient.remove(&object_id);
            }
        }
    }

    fn persist_transient_resources(&self, object_id: u64, kind: EntityKind) {
        let mut state = self.state.lock();
        if let Some(paths) = state.transient.remove(&object_id) {
            state.semi_transient.entry(kind).or_default().extend(paths);
        }
    }

    fn add_semi_transient(&self, kind: EntityKind, paths: &BTreeSet<String>) {
        let mut state = self.state.lock();
        let set = state.semi_transient.entry(kind).or_default();
        set.extend(paths.iter().map(|p| p.to_lowercase()));
    }

    fn semi_transient_paths(&self, kind: EntityKind) -> BTreeSet<String> {
        self.state
            .lock()
            .semi_transient
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn retain_semi_transient(&self, kind: EntityKind, keep: &BTreeSet<String>) {
        let mut state = self.state.lock();
        if let Some(set) = state.semi_transient.get_mut(&kind) {
            set.retain(|p| keep.contains(p));
        }
    }

    fn clear_kind(&self, kind: EntityKind) {
        self.state.lock().semi_transient.remove(&kind);
    }
}
