//! Lock-free holder of the current [`Snapshot`].

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::monitoring::{Snapshot, StatusSummary};

/// Shared, atomically replaced snapshot.
///
/// The poll scheduler is the only writer. Readers get an `Arc` to a
/// complete snapshot and never block the writer or each other.
#[derive(Clone)]
pub struct SnapshotStore {
    current: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotStore {
    /// A store holding the empty, disconnected snapshot.
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(Snapshot::empty())),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn status(&self) -> StatusSummary {
        self.current.load().status()
    }

    /// Replace the current snapshot and return it.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        snapshot
    }

    /// Go back to the empty, disconnected snapshot.
    pub fn reset(&self) {
        self.current.store(Arc::new(Snapshot::empty()));
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
