//! Graph element storage with point-in-time history and cell-level access
//! control.
//!
//! - [`visibility`] parses, normalizes and evaluates visibility expressions
//!   and maps `(field, visibility)` pairs onto physical field names.
//! - [`storage`] keeps an append-only mutation log per element and replays it
//!   into redacted snapshots.
//! - [`primitives::concurrency`] orders asynchronous writes per element.
//! - [`query`] finds bounded paths between vertices.

#![warn(missing_docs)]

pub mod logging;
pub mod options;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod types;
pub mod visibility;

pub use options::CoreOptions;
pub use types::{ElementId, ElementKey, GraphError, Result, Timestamp, Value};
pub use visibility::{Authorizations, VisibilityExpr, VisibilityFieldEncoder};
