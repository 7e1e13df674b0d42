use thiserror::Error;

/// Error type shared by every component of the crate.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A visibility expression failed to parse.
    #[error("malformed visibility expression {expression:?} at byte {position}: {reason}")]
    MalformedExpression {
        /// Source text that was rejected.
        expression: String,
        /// Byte offset where parsing stopped.
        position: usize,
        /// Human readable cause.
        reason: &'static str,
    },
    /// The evaluator met a tree it cannot interpret.
    #[error("visibility evaluation failed: {0}")]
    Evaluation(&'static str),
    /// A physical field hash has no registered visibility.
    #[error("unknown visibility hash: {0}")]
    UnknownVisibilityHash(String),
    /// A caller required an element that does not exist at the requested time.
    #[error("element not found: {0}")]
    ElementNotFound(String),
    /// A write targeted a document removed by a concurrent delete.
    #[error("document missing: {0}")]
    DocumentMissing(String),
    /// One or more queued writes failed.
    #[error("{} queued write(s) failed", .0.len())]
    AggregatedFlushFailure(Vec<GraphError>),
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// Failure reported by a storage collaborator.
    #[error("storage: {0}")]
    Storage(String),
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON (de)serialization failure.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration could not be loaded or is invalid.
    #[error("config: {0}")]
    Config(String),
    /// I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    pub(crate) fn malformed(expression: &str, position: usize, reason: &'static str) -> Self {
        GraphError::MalformedExpression {
            expression: expression.to_string(),
            position,
            reason,
        }
    }

    /// Returns `true` for the write-time race that a reload can recover from.
    pub fn is_document_missing(&self) -> bool {
        matches!(self, GraphError::DocumentMissing(_))
    }

    /// Failures carried by an aggregated flush error, or `self` alone.
    pub fn causes(&self) -> Vec<&GraphError> {
        match self {
            GraphError::AggregatedFlushFailure(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }
}
