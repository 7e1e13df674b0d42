//! Low-level primitives shared by the storage and query layers.

/// Concurrency primitives and synchronization.
///
/// Per-element ordering of asynchronous writes and failure aggregation.
pub mod concurrency;
