use std::sync::Arc;

use tracing::debug;

use super::log::{all_time, up_to, IncreasingClock, MutationLog, TimeBounds};
use super::metrics::{default_metrics, CoreMetrics};
use super::mutation::{LoggedMutation, Mutation, MutationOp};
use super::replay::{replay, ElementState};
use super::snapshot::{ElementSnapshot, FetchHints};
use crate::primitives::concurrency::{FlushHandle, WriteQueue};
use crate::types::{ElementKey, GraphError, Result, Timestamp, Value};
use crate::visibility::Authorizations;

/// One entry of an element's history as seen by a reader.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoricalEvent {
    /// Element the event belongs to.
    pub key: ElementKey,
    /// Log sequence number.
    pub seq: u64,
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// The recorded change.
    pub op: MutationOp,
}

impl HistoricalEvent {
    fn from_logged(key: &ElementKey, logged: LoggedMutation) -> Self {
        Self {
            key: key.clone(),
            seq: logged.seq,
            timestamp: logged.mutation.timestamp,
            op: logged.mutation.op,
        }
    }

    /// Stable name of the change.
    pub fn kind(&self) -> &'static str {
        self.op.kind()
    }

    /// Opaque payload attached by the writer.
    pub fn event_data(&self) -> Option<&Value> {
        self.op.event_data()
    }
}

/// Point-in-time reads over a [`MutationLog`].
pub struct ElementHistory {
    log: Arc<dyn MutationLog>,
    metrics: Arc<dyn CoreMetrics>,
}

impl ElementHistory {
    /// Creates a reader without metrics.
    pub fn new(log: Arc<dyn MutationLog>) -> Self {
        Self::with_metrics(log, default_metrics())
    }

    /// Creates a reader reporting to `metrics`.
    pub fn with_metrics(log: Arc<dyn MutationLog>, metrics: Arc<dyn CoreMetrics>) -> Self {
        Self { log, metrics }
    }

    /// Replays `key` up to `cutoff` (inclusive); `None` replays everything.
    pub fn state_at(&self, key: &ElementKey, cutoff: Option<Timestamp>) -> Result<ElementState> {
        let bounds = cutoff.map(up_to).unwrap_or_else(all_time);
        let entries = self.log.read(key, bounds)?;
        let state = replay(&entries, cutoff.unwrap_or(Timestamp::MAX));
        self.metrics.replay_performed(entries.len());
        debug!(
            element = %key,
            mutations = entries.len(),
            exists = state.exists,
            "replay.complete"
        );
        Ok(state)
    }

    /// Unredacted snapshot of `key` at `cutoff`.
    pub fn snapshot_at(&self, key: &ElementKey, cutoff: Option<Timestamp>) -> Result<Option<ElementSnapshot>> {
        Ok(self.state_at(key, cutoff)?.into_snapshot(key))
    }

    /// Snapshot of `key` at `cutoff` as `auths` may see it.
    pub fn get(
        &self,
        key: &ElementKey,
        cutoff: Option<Timestamp>,
        auths: &Authorizations,
        hints: FetchHints,
    ) -> Result<Option<ElementSnapshot>> {
        match self.snapshot_at(key, cutoff)? {
            Some(snapshot) => snapshot.redact(auths, hints),
            None => Ok(None),
        }
    }

    /// Like [`ElementHistory::get`], failing with
    /// [`GraphError::ElementNotFound`] when nothing is visible.
    pub fn require(
        &self,
        key: &ElementKey,
        cutoff: Option<Timestamp>,
        auths: &Authorizations,
        hints: FetchHints,
    ) -> Result<ElementSnapshot> {
        self.get(key, cutoff, auths, hints)?
            .ok_or_else(|| GraphError::ElementNotFound(key.to_string()))
    }

    /// Every element in the log visible to `auths` at `cutoff`, ordered by key.
    pub fn scan(
        &self,
        cutoff: Option<Timestamp>,
        auths: &Authorizations,
        hints: FetchHints,
    ) -> Result<Vec<ElementSnapshot>> {
        let mut out = Vec::new();
        for key in self.log.keys()? {
            if let Some(snapshot) = self.get(&key, cutoff, auths, hints)? {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    /// Mutations of `key` inside `bounds`, in replay order, restricted to
    /// events `auths` can read.
    pub fn history(
        &self,
        key: &ElementKey,
        auths: &Authorizations,
        bounds: TimeBounds,
    ) -> Result<Vec<HistoricalEvent>> {
        let mut entries = self.log.read(key, bounds)?;
        entries.sort_by_key(LoggedMutation::order_key);
        let mut events = Vec::with_capacity(entries.len());
        for logged in entries {
            if logged.mutation.op.readable_by(auths)? {
                events.push(HistoricalEvent::from_logged(key, logged));
            }
        }
        Ok(events)
    }
}

/// Appends mutations stamped by an [`IncreasingClock`].
#[derive(Clone)]
pub struct MutationWriter {
    log: Arc<dyn MutationLog>,
    clock: Arc<IncreasingClock>,
}

impl MutationWriter {
    /// Creates a writer sharing `clock` with any other writer of the same log.
    pub fn new(log: Arc<dyn MutationLog>, clock: Arc<IncreasingClock>) -> Self {
        Self { log, clock }
    }

    /// Clock used to stamp mutations.
    pub fn clock(&self) -> &IncreasingClock {
        &self.clock
    }

    /// Stamps `op` and appends it synchronously.
    pub fn append(&self, key: &ElementKey, op: MutationOp) -> Result<LoggedMutation> {
        let mutation = Mutation::new(self.clock.now(), op);
        let seq = self.log.append(key, mutation.clone())?;
        Ok(LoggedMutation { seq, mutation })
    }

    /// Stamps `op` now and appends it through `queue`, behind any write
    /// already pending for `key`.
    pub fn append_queued(&self, queue: &WriteQueue, key: ElementKey, op: MutationOp) -> FlushHandle {
        let mutation = Mutation::new(self.clock.now(), op);
        let log = Arc::clone(&self.log);
        let target = key.clone();
        queue.submit(key, async move { log.append(&target, mutation).map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::log::MemoryMutationLog;
    use crate::storage::metrics::CounterMetrics;
    use crate::visibility::VisibilityExpr;
    use std::sync::atomic::Ordering;

    fn vis(text: &str) -> VisibilityExpr {
        VisibilityExpr::parse(text).unwrap()
    }

    #[test]
    fn history_hides_events_the_reader_cannot_see() {
        let log: Arc<dyn MutationLog> = Arc::new(MemoryMutationLog::default());
        let key = ElementKey::vertex("v");
        log.append(&key, Mutation::new(1, MutationOp::UpdateVertex { visibility: vis("a") }))
            .unwrap();
        log.append(
            &key,
            Mutation::new(
                2,
                MutationOp::MarkElementHidden {
                    visibility: vis("secret"),
                    event_data: None,
                },
            ),
        )
        .unwrap();
        log.append(&key, Mutation::new(3, MutationOp::Delete)).unwrap();
        let history = ElementHistory::new(log);
        let kinds: Vec<_> = history
            .history(&key, &Authorizations::new(["a"]), all_time())
            .unwrap()
            .iter()
            .map(HistoricalEvent::kind)
            .collect();
        assert_eq!(kinds, vec!["update_vertex", "delete"]);
    }

    #[test]
    fn state_at_reports_replays() {
        let log: Arc<dyn MutationLog> = Arc::new(MemoryMutationLog::default());
        let metrics = Arc::new(CounterMetrics::default());
        let key = ElementKey::vertex("v");
        let writer = MutationWriter::new(Arc::clone(&log), Arc::new(IncreasingClock::new()));
        let first = writer
            .append(&key, MutationOp::UpdateVertex { visibility: vis("") })
            .unwrap();
        writer.append(&key, MutationOp::Delete).unwrap();
        let history = ElementHistory::with_metrics(log, metrics.clone());
        assert!(history.state_at(&key, Some(first.mutation.timestamp)).unwrap().exists);
        assert!(!history.state_at(&key, None).unwrap().exists);
        assert!(matches!(
            history.require(&key, None, &Authorizations::none(), FetchHints::DEFAULT),
            Err(GraphError::ElementNotFound(_))
        ));
        assert_eq!(metrics.replays.load(Ordering::Relaxed), 3);
    }
}
