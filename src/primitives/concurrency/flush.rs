use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use super::Inner;
use crate::types::{ElementKey, GraphError, Result};

/// A write handed to the queue. Rust futures are lazy, so the queue decides
/// when it starts.
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// One pending asynchronous write, tagged with the element it targets.
///
/// Stays registered in the queue until an observer (`FlushHandle::wait`,
/// `WriteQueue::await_any` or `WriteQueue::flush`) collects its outcome.
pub struct FlushObject {
    key: ElementKey,
    seq: u64,
    done: watch::Sender<bool>,
    failure: Mutex<Option<GraphError>>,
}

impl FlushObject {
    pub(super) fn new(key: ElementKey, seq: u64) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            key,
            seq,
            done,
            failure: Mutex::new(None),
        }
    }

    /// Element the write targets.
    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    /// Submission sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns `true` once the write has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    pub(super) async fn wait_done(&self) {
        let mut rx = self.done.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub(super) fn complete(&self, result: Result<()>) {
        *self.failure.lock() = result.err();
        self.done.send_replace(true);
    }

    pub(super) fn take_failure(&self) -> Option<GraphError> {
        self.failure.lock().take()
    }
}

/// Completes a [`FlushObject`] with an error if the task driving it unwinds
/// or is cancelled before reporting an outcome.
pub(super) struct CompletionGuard {
    object: Arc<FlushObject>,
}

impl CompletionGuard {
    pub(super) fn new(object: Arc<FlushObject>) -> Self {
        Self { object }
    }

    pub(super) fn object(&self) -> &FlushObject {
        &self.object
    }

    pub(super) fn finish(self, result: Result<()>) {
        self.object.complete(result);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.object.is_complete() {
            return;
        }
        warn!(element = %self.object.key(), seq = self.object.seq(), "write_queue.write_aborted");
        self.object.complete(Err(GraphError::Storage(format!(
            "write {} for {} aborted before completing",
            self.object.seq(),
            self.object.key()
        ))));
    }
}

/// Caller-side handle to a submitted write.
#[derive(Clone)]
pub struct FlushHandle {
    pub(super) object: Arc<FlushObject>,
    pub(super) inner: Arc<Inner>,
}

impl FlushHandle {
    /// Element the write targets.
    pub fn key(&self) -> &ElementKey {
        self.object.key()
    }

    /// Submission sequence number.
    pub fn seq(&self) -> u64 {
        self.object.seq()
    }

    /// Returns `true` once the write has finished.
    pub fn is_complete(&self) -> bool {
        self.object.is_complete()
    }

    /// Waits for this write and returns its outcome.
    ///
    /// A failure is reported to exactly one observer: if a flush already
    /// collected it, this returns `Ok(())`.
    pub async fn wait(self) -> Result<()> {
        self.object.wait_done().await;
        let failure = self.object.take_failure();
        self.inner.forget(std::slice::from_ref(&self.object));
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
