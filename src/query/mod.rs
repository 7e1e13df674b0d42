#![forbid(unsafe_code)]

//! Graph queries layered over the storage collaborators.

/// Bounded path search between two vertices.
///
/// Batched adjacency lookups with a two-hop fast path and a bidirectional
/// frontier expansion for longer budgets.
pub mod paths;

pub use paths::{FindPathOptions, GraphPath, NoProgress, PathFinder, ProgressCallback};
