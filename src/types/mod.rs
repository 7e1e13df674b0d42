//! Shared identifiers, values and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

mod error;

pub use error::{GraphError, Result};

/// Logical timestamp in milliseconds.
///
/// Timestamps only need to be monotonically increasing per writer; see
/// [`crate::storage::IncreasingClock`].
pub type Timestamp = u64;

/// Identifier of a vertex or edge.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    /// Creates an identifier from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        ElementId(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        ElementId(value)
    }
}

/// Addresses one mutation log: a vertex, an edge, or a side-table row
/// attached to an element.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum ElementKey {
    /// A vertex.
    Vertex(ElementId),
    /// An edge.
    Edge(ElementId),
    /// A row of an extended-data table owned by `element`.
    Row {
        /// Owning element.
        element: ElementId,
        /// Table name.
        table: String,
        /// Row identifier within the table.
        row: String,
    },
}

impl ElementKey {
    /// Convenience constructor for a vertex key.
    pub fn vertex(id: impl Into<String>) -> Self {
        ElementKey::Vertex(ElementId::new(id))
    }

    /// Convenience constructor for an edge key.
    pub fn edge(id: impl Into<String>) -> Self {
        ElementKey::Edge(ElementId::new(id))
    }

    /// Convenience constructor for a side-table row key.
    pub fn row(element: impl Into<String>, table: impl Into<String>, row: impl Into<String>) -> Self {
        ElementKey::Row {
            element: ElementId::new(element),
            table: table.into(),
            row: row.into(),
        }
    }

    /// Returns the owning element id.
    pub fn element_id(&self) -> &ElementId {
        match self {
            ElementKey::Vertex(id) | ElementKey::Edge(id) => id,
            ElementKey::Row { element, .. } => element,
        }
    }

    /// Returns `(table, row)` for side-table rows.
    pub fn row_ref(&self) -> Option<(&str, &str)> {
        match self {
            ElementKey::Row { table, row, .. } => Some((table.as_str(), row.as_str())),
            _ => None,
        }
    }

    /// Short tag used in logs and storage keys.
    pub fn kind(&self) -> &'static str {
        match self {
            ElementKey::Vertex(_) => "vertex",
            ElementKey::Edge(_) => "edge",
            ElementKey::Row { .. } => "row",
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKey::Vertex(id) => write!(f, "vertex:{id}"),
            ElementKey::Edge(id) => write!(f, "edge:{id}"),
            ElementKey::Row {
                element,
                table,
                row,
            } => write!(f, "row:{element}/{table}/{row}"),
        }
    }
}

/// Property or metadata value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Owned byte vector.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            Value::DateTime(v) => write!(f, "datetime({v})"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
