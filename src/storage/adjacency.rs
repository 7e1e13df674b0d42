use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use super::snapshot::ElementSnapshot;
use crate::types::{ElementId, ElementKey, Result};

/// An edge as returned by an adjacency query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    /// Edge id.
    pub id: ElementId,
    /// Source vertex.
    pub out_id: ElementId,
    /// Destination vertex.
    pub in_id: ElementId,
    /// Edge label.
    pub label: String,
}

impl EdgeRef {
    /// Creates an edge reference.
    pub fn new(
        id: impl Into<ElementId>,
        out_id: impl Into<ElementId>,
        in_id: impl Into<ElementId>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            out_id: out_id.into(),
            in_id: in_id.into(),
            label: label.into(),
        }
    }

    /// The endpoint opposite `vertex`, or `None` if the edge does not touch it.
    pub fn other_end(&self, vertex: &ElementId) -> Option<&ElementId> {
        if &self.out_id == vertex {
            Some(&self.in_id)
        } else if &self.in_id == vertex {
            Some(&self.out_id)
        } else {
            None
        }
    }
}

/// Allow/deny filter on edge labels.
///
/// An empty allow list admits every label; the deny list always wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelFilter {
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
}

impl LabelFilter {
    /// Filter admitting every label.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restricts traversal to `labels`.
    pub fn allow<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Excludes `labels` from traversal.
    pub fn deny<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if an edge labelled `label` may be traversed.
    pub fn accepts(&self, label: &str) -> bool {
        !self.deny.contains(label) && (self.allow.is_empty() || self.allow.contains(label))
    }
}

/// Batched adjacency lookup used by path finding.
pub trait Adjacency: Send + Sync {
    /// Every edge accepted by `labels` with at least one endpoint in `ids`.
    /// Each edge appears once.
    fn edges_touching(&self, ids: &BTreeSet<ElementId>, labels: &LabelFilter) -> Result<Vec<EdgeRef>>;
}

/// In-memory [`Adjacency`] index.
#[derive(Clone, Debug, Default)]
pub struct MemoryAdjacency {
    edges: Vec<EdgeRef>,
    by_vertex: FxHashMap<ElementId, Vec<usize>>,
}

impl MemoryAdjacency {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over `edges`.
    pub fn from_edges<I: IntoIterator<Item = EdgeRef>>(edges: I) -> Self {
        let mut index = Self::new();
        for edge in edges {
            index.insert(edge);
        }
        index
    }

    /// Builds an index from replayed edge snapshots; non-edge snapshots are
    /// skipped.
    pub fn from_snapshots<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a ElementSnapshot>,
    {
        Self::from_edges(snapshots.into_iter().filter_map(|snapshot| {
            match (&snapshot.key, &snapshot.edge) {
                (ElementKey::Edge(id), Some(endpoints)) => Some(EdgeRef {
                    id: id.clone(),
                    out_id: endpoints.out_id.clone(),
                    in_id: endpoints.in_id.clone(),
                    label: endpoints.label.clone(),
                }),
                _ => None,
            }
        }))
    }

    /// Adds one edge.
    pub fn insert(&mut self, edge: EdgeRef) {
        let idx = self.edges.len();
        self.by_vertex.entry(edge.out_id.clone()).or_default().push(idx);
        if edge.in_id != edge.out_id {
            self.by_vertex.entry(edge.in_id.clone()).or_default().push(idx);
        }
        self.edges.push(edge);
    }

    /// Number of indexed edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` when no edge is indexed.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Adjacency for MemoryAdjacency {
    fn edges_touching(&self, ids: &BTreeSet<ElementId>, labels: &LabelFilter) -> Result<Vec<EdgeRef>> {
        let mut hits: BTreeSet<usize> = BTreeSet::new();
        for id in ids {
            if let Some(indices) = self.by_vertex.get(id) {
                hits.extend(indices.iter().copied());
            }
        }
        Ok(hits
            .into_iter()
            .map(|idx| &self.edges[idx])
            .filter(|edge| labels.accepts(&edge.label))
            .cloned()
            .collect())
    }
}
