use std::hash::{Hash, Hasher};
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use super::mutation::{LoggedMutation, Mutation};
use crate::options::CoreOptions;
use crate::types::{ElementKey, Result, Timestamp};

/// Inclusive/exclusive bounds on mutation timestamps.
pub type TimeBounds = (Bound<Timestamp>, Bound<Timestamp>);

/// Every mutation with `timestamp <= cutoff`.
pub fn up_to(cutoff: Timestamp) -> TimeBounds {
    (Bound::Unbounded, Bound::Included(cutoff))
}

/// Every mutation with `after < timestamp <= until`.
pub fn between(after: Timestamp, until: Timestamp) -> TimeBounds {
    (Bound::Excluded(after), Bound::Included(until))
}

/// Every mutation.
pub fn all_time() -> TimeBounds {
    (Bound::Unbounded, Bound::Unbounded)
}

/// Append-only, per-element ordered event store.
pub trait MutationLog: Send + Sync {
    /// Appends `mutation` to the log of `key` and returns its sequence number.
    fn append(&self, key: &ElementKey, mutation: Mutation) -> Result<u64>;

    /// Returns the mutations of `key` inside `bounds`, ordered by
    /// `(timestamp, seq)`.
    fn read(&self, key: &ElementKey, bounds: TimeBounds) -> Result<Vec<LoggedMutation>>;

    /// Every key that has at least one mutation.
    fn keys(&self) -> Result<Vec<ElementKey>>;
}

type Shard = RwLock<FxHashMap<ElementKey, Vec<LoggedMutation>>>;

/// In-memory [`MutationLog`] partitioned by key so unrelated elements never
/// contend on one lock.
pub struct MemoryMutationLog {
    shards: Vec<Shard>,
    next_seq: AtomicU64,
}

impl MemoryMutationLog {
    /// Creates a log with `shards` partitions.
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect();
        Self {
            shards,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Creates a log partitioned per `opts.log_shards`.
    pub fn with_options(opts: &CoreOptions) -> Self {
        Self::new(opts.log_shards)
    }

    /// Total number of mutations across all keys.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Returns `true` when nothing was ever appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_for(&self, key: &ElementKey) -> &Shard {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }
}

impl Default for MemoryMutationLog {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MutationLog for MemoryMutationLog {
    fn append(&self, key: &ElementKey, mutation: Mutation) -> Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = LoggedMutation { seq, mutation };
        let mut shard = self.shard_for(key).write();
        let entries = shard.entry(key.clone()).or_default();
        let order = entry.order_key();
        let pos = entries.partition_point(|e| e.order_key() <= order);
        entries.insert(pos, entry);
        Ok(seq)
    }

    fn read(&self, key: &ElementKey, bounds: TimeBounds) -> Result<Vec<LoggedMutation>> {
        let shard = self.shard_for(key).read();
        Ok(shard
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| bounds.contains(&e.timestamp()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn keys(&self) -> Result<Vec<ElementKey>> {
        let mut keys: Vec<ElementKey> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Millisecond clock that never repeats or goes backwards, even when wall
/// time stalls or is adjusted.
#[derive(Debug, Default)]
pub struct IncreasingClock {
    last: AtomicU64,
}

impl IncreasingClock {
    /// Creates a clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock whose next value is strictly greater than `floor`.
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Returns `max(wall clock, previous + 1)`.
    pub fn now(&self) -> Timestamp {
        let wall = wall_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Last value handed out, or the starting floor.
    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
