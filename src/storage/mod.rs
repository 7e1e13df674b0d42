//! Element storage: mutation logs, point-in-time replay and the durable
//! collaborators behind them.
//!
//! Every element is stored as an append-only log of [`Mutation`]s. Reads fold
//! the log up to a cutoff timestamp into an [`ElementState`] and redact the
//! resulting [`ElementSnapshot`] for the caller's authorizations.

mod adjacency;
mod history;
mod meta;
mod metrics;
mod mutation;
mod replay;
mod snapshot;
mod sqlite;

/// Mutation log trait, in-memory implementation and time range helpers.
pub mod log;

/// Batched adjacency lookups used by path finding.
pub use adjacency::{Adjacency, EdgeRef, LabelFilter, MemoryAdjacency};

/// Point-in-time reads and clock-stamped writes.
pub use history::{ElementHistory, HistoricalEvent, MutationWriter};

pub use log::{IncreasingClock, MemoryMutationLog, MutationLog, TimeBounds};

/// Durable key/value store used by the visibility field encoder.
pub use meta::{MemoryMetadataStore, MetadataStore};

/// Metrics hooks.
pub use metrics::{default_metrics, CoreMetrics, CounterMetrics, NoopMetrics};

pub use mutation::{LoggedMutation, MetadataEntry, Mutation, MutationOp, PropertyFilter};
pub use replay::{replay, ElementState};
pub use snapshot::{EdgeEndpoints, ElementSnapshot, FetchHints, Property};

/// SQLite-backed collaborators.
pub use sqlite::{SqliteMetadataStore, SqliteMutationLog};
