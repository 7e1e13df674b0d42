use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking replay, visibility hashing and write-queue activity.
///
/// Implementations must be cheap; every hook sits on a hot path.
pub trait CoreMetrics: Send + Sync {
    /// Records a replay of one element's mutation log.
    ///
    /// # Parameters
    /// * `mutations` - Number of mutations folded into the snapshot.
    fn replay_performed(&self, mutations: usize);

    /// Records the first assignment of a visibility hash.
    fn hash_assigned(&self);

    /// Records a visibility hash lookup.
    ///
    /// # Parameters
    /// * `cached` - Whether the lookup was served from the in-process cache.
    fn hash_lookup(&self, cached: bool);

    /// Records a write submitted to the write queue.
    fn write_submitted(&self);

    /// Records a queued write that completed with an error.
    fn write_failed(&self);

    /// Records a document-missing failure that was resubmitted.
    fn document_missing_recovered(&self);
}

/// A no-op implementation of [`CoreMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl CoreMetrics for NoopMetrics {
    fn replay_performed(&self, _mutations: usize) {}
    fn hash_assigned(&self) {}
    fn hash_lookup(&self, _cached: bool) {}
    fn write_submitted(&self) {}
    fn write_failed(&self) {}
    fn document_missing_recovered(&self) {}
}

/// A thread-safe counter-based implementation of [`CoreMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of replays performed.
    pub replays: AtomicU64,

    /// Total mutations folded across all replays.
    pub replayed_mutations: AtomicU64,

    /// Number of visibility hashes assigned.
    pub hashes_assigned: AtomicU64,

    /// Hash lookups served from cache.
    pub hash_cache_hits: AtomicU64,

    /// Hash lookups that went to the metadata store.
    pub hash_cache_misses: AtomicU64,

    /// Writes submitted to the queue.
    pub writes_submitted: AtomicU64,

    /// Writes that failed.
    pub writes_failed: AtomicU64,

    /// Document-missing failures that were resubmitted.
    pub documents_recovered: AtomicU64,
}

impl CoreMetrics for CounterMetrics {
    fn replay_performed(&self, mutations: usize) {
        self.replays.fetch_add(1, Ordering::Relaxed);
        self.replayed_mutations
            .fetch_add(mutations as u64, Ordering::Relaxed);
    }

    fn hash_assigned(&self) {
        self.hashes_assigned.fetch_add(1, Ordering::Relaxed);
    }

    fn hash_lookup(&self, cached: bool) {
        if cached {
            self.hash_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hash_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write_submitted(&self) {
        self.writes_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn document_missing_recovered(&self) {
        self.documents_recovered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn CoreMetrics> {
    Arc::new(NoopMetrics)
}
