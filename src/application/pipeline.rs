// Pipeline context - Owns the store and hands it to every component that needs it
use crate::application::accessor::Accessor;
use crate::application::fetch_scheduler::{FetchScheduler, SnapshotSink};
use crate::application::reconciler::ReconcileLoop;
use crate::application::snapshot_source::SnapshotSource;
use crate::application::snapshot_store::{MergePolicy, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;

/// Explicitly owned pipeline state: one store, one accessor over it.
///
/// Cloning shares the same store.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<SnapshotStore>,
    accessor: Accessor,
}

impl Pipeline {
    pub fn new(policy: MergePolicy) -> Self {
        let store = Arc::new(SnapshotStore::new(policy));
        let accessor = Accessor::new(store.clone());
        Self { store, accessor }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    /// Consumer for fetched bodies: parses and applies each one to the store.
    /// Rejected payloads are logged by the store and leave it unchanged.
    pub fn ingestor(&self) -> SnapshotSink {
        let store = self.store.clone();
        Arc::new(move |body: String| {
            let _ = store.apply_snapshot_text(&body);
        })
    }

    pub fn fetch_scheduler(
        &self,
        source: Arc<dyn SnapshotSource>,
        period: Duration,
        timeout: Duration,
    ) -> FetchScheduler {
        FetchScheduler::new(source, period, timeout, self.ingestor())
    }

    /// Build a scheduler for `source` and start polling right away.
    pub fn start(&self, source: Arc<dyn SnapshotSource>, period: Duration, timeout: Duration) -> FetchScheduler {
        let scheduler = self.fetch_scheduler(source, period, timeout);
        scheduler.start();
        scheduler
    }

    pub fn reconcile_loop(&self, name: impl Into<String>, frame: Duration) -> ReconcileLoop {
        ReconcileLoop::new(name, self.accessor.clone(), frame)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}
