//! Per-element write ordering and failure aggregation.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::options::CoreOptions;
use crate::storage::{default_metrics, CoreMetrics};
use crate::types::{ElementKey, GraphError, Result};

mod flush;

use flush::CompletionGuard;
pub use flush::{FlushHandle, FlushObject, WriteFuture};

/// Decides what happens to a write that failed with
/// [`GraphError::DocumentMissing`].
pub trait DocumentMissingHandler: Send + Sync {
    /// Returns a replacement write (for example one rebuilt from the mutation
    /// log), or `None` to drop the write.
    fn on_document_missing(&self, key: &ElementKey, error: &GraphError) -> Option<WriteFuture>;
}

/// Default policy: log the race and drop the write.
#[derive(Default)]
pub struct LogAndDrop;

impl DocumentMissingHandler for LogAndDrop {
    fn on_document_missing(&self, key: &ElementKey, error: &GraphError) -> Option<WriteFuture> {
        warn!(element = %key, %error, "write_queue.document_missing.dropped");
        None
    }
}

type Pending = FxHashMap<ElementKey, VecDeque<Arc<FlushObject>>>;

pub(crate) struct Inner {
    shards: Vec<Mutex<Pending>>,
    next_seq: AtomicU64,
    runtime: Handle,
    missing: Arc<dyn DocumentMissingHandler>,
    retries: u32,
    metrics: Arc<dyn CoreMetrics>,
}

/// Serializes writes per element and surfaces asynchronous failures.
///
/// Each write submitted for a key starts only after every write previously
/// submitted for the same key has completed, so per-key effects land in
/// submission order even when the underlying I/O completes out of order.
/// Writes to different keys run concurrently. The pending set is sharded by
/// key.
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<Inner>,
}

impl WriteQueue {
    /// Creates a queue bound to the current tokio runtime.
    pub fn new(opts: &CoreOptions) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| GraphError::Invalid("write queue requires a tokio runtime".into()))?;
        Ok(Self::with_parts(
            opts,
            runtime,
            Arc::new(LogAndDrop),
            default_metrics(),
        ))
    }

    /// Creates a queue from explicit collaborators.
    pub fn with_parts(
        opts: &CoreOptions,
        runtime: Handle,
        missing: Arc<dyn DocumentMissingHandler>,
        metrics: Arc<dyn CoreMetrics>,
    ) -> Self {
        let shards = (0..opts.write_queue_shards.max(1))
            .map(|_| Mutex::new(Pending::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                shards,
                next_seq: AtomicU64::new(1),
                runtime,
                missing,
                retries: opts.document_missing_retries,
                metrics,
            }),
        }
    }

    /// Registers `write` for `key` and schedules it behind any write already
    /// pending for the same key.
    pub fn submit<F>(&self, key: ElementKey, write: F) -> FlushHandle
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let object = Arc::new(FlushObject::new(key.clone(), seq));
        let predecessor = {
            let mut shard = self.inner.shard_for(&key).lock();
            let queue = shard.entry(key).or_default();
            let prev = queue.back().cloned();
            queue.push_back(Arc::clone(&object));
            prev
        };
        self.inner.metrics.write_submitted();
        debug!(
            element = %object.key(),
            seq,
            waits_on = predecessor.as_ref().map(|p| p.seq()),
            "write_queue.submit"
        );
        let inner = Arc::clone(&self.inner);
        let guard = CompletionGuard::new(Arc::clone(&object));
        let write: WriteFuture = Box::pin(write);
        self.inner.runtime.spawn(async move {
            if let Some(prev) = predecessor {
                prev.wait_done().await;
            }
            let task_object = guard.object();
            let result = inner.run_write(task_object.key(), write).await;
            if let Err(err) = &result {
                inner.metrics.write_failed();
                warn!(element = %task_object.key(), seq = task_object.seq(), error = %err, "write_queue.write_failed");
            }
            guard.finish(result);
        });
        FlushHandle {
            object,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Waits until no write is pending for `key`, returning every failure
    /// observed along the way.
    pub async fn await_any(&self, key: &ElementKey) -> Result<()> {
        let mut failures = Vec::new();
        loop {
            let pending: Vec<Arc<FlushObject>> = {
                let shard = self.inner.shard_for(key).lock();
                shard
                    .get(key)
                    .map(|queue| queue.iter().cloned().collect())
                    .unwrap_or_default()
            };
            if pending.is_empty() {
                break;
            }
            for object in &pending {
                object.wait_done().await;
            }
            collect_failures(&pending, &mut failures);
            self.inner.forget(&pending);
        }
        aggregate(failures)
    }

    /// Waits for every write pending at call time across all keys.
    ///
    /// Fails with [`GraphError::AggregatedFlushFailure`] carrying every failed
    /// write.
    pub async fn flush(&self) -> Result<()> {
        let pending: Vec<Arc<FlushObject>> = self
            .inner
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .values()
                    .flat_map(|queue| queue.iter().cloned())
                    .collect::<Vec<_>>()
            })
            .collect();
        for object in &pending {
            object.wait_done().await;
        }
        let mut failures = Vec::new();
        collect_failures(&pending, &mut failures);
        self.inner.forget(&pending);
        info!(
            writes = pending.len(),
            failures = failures.len(),
            "write_queue.flush"
        );
        aggregate(failures)
    }

    /// Number of writes not yet observed, across all keys.
    pub fn pending_len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.lock().values().map(VecDeque::len).sum::<usize>())
            .sum()
    }

    /// Returns `true` if a write for `key` has not been observed yet.
    pub fn has_pending(&self, key: &ElementKey) -> bool {
        self.inner
            .shard_for(key)
            .lock()
            .get(key)
            .is_some_and(|queue| !queue.is_empty())
    }
}

impl Inner {
    fn shard_for(&self, key: &ElementKey) -> &Mutex<Pending> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    async fn run_write(&self, key: &ElementKey, write: WriteFuture) -> Result<()> {
        let mut result = write.await;
        let mut attempts = 0u32;
        loop {
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_document_missing() => err,
                Err(err) => return Err(err),
            };
            let Some(retry) = self.missing.on_document_missing(key, &err) else {
                return Ok(());
            };
            if attempts >= self.retries {
                warn!(element = %key, attempts, "write_queue.document_missing.exhausted");
                return Err(err);
            }
            attempts += 1;
            self.metrics.document_missing_recovered();
            debug!(element = %key, attempt = attempts, "write_queue.document_missing.resubmit");
            result = retry.await;
        }
    }

    pub(crate) fn forget(&self, observed: &[Arc<FlushObject>]) {
        for object in observed {
            let mut shard = self.shard_for(object.key()).lock();
            if let Some(queue) = shard.get_mut(object.key()) {
                queue.retain(|pending| !Arc::ptr_eq(pending, object));
                if queue.is_empty() {
                    shard.remove(object.key());
                }
            }
        }
    }
}

fn collect_failures(objects: &[Arc<FlushObject>], failures: &mut Vec<GraphError>) {
    failures.extend(objects.iter().filter_map(|object| object.take_failure()));
}

fn aggregate(failures: Vec<GraphError>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(GraphError::AggregatedFlushFailure(failures))
    }
}
