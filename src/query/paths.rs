use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::storage::{Adjacency, LabelFilter};
use crate::types::{ElementId, GraphError, Result};

/// Receives advisory progress updates during a search.
pub trait ProgressCallback {
    /// Called with a completion estimate in `[0, 100]` and the current phase.
    fn progress(&self, percent: f64, phase: &str);
}

impl<F> ProgressCallback for F
where
    F: Fn(f64, &str),
{
    fn progress(&self, percent: f64, phase: &str) {
        self(percent, phase)
    }
}

/// Progress sink that ignores every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn progress(&self, _percent: f64, _phase: &str) {}
}

/// Options for [`PathFinder::find_paths`].
#[derive(Clone, Debug)]
pub struct FindPathOptions {
    /// Vertex the paths start at.
    pub source: ElementId,
    /// Vertex the paths end at.
    pub dest: ElementId,
    /// Maximum number of edges in a path (at least 1).
    pub max_hops: u32,
    /// Edge labels that may be traversed.
    pub labels: LabelFilter,
    /// Stop at the first path found.
    pub any_path_only: bool,
}

impl FindPathOptions {
    /// Searches every path of at most `max_hops` edges over any label.
    pub fn new(source: impl Into<ElementId>, dest: impl Into<ElementId>, max_hops: u32) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            max_hops,
            labels: LabelFilter::any(),
            any_path_only: false,
        }
    }

    /// Restricts traversal with `labels`.
    pub fn labels(mut self, labels: LabelFilter) -> Self {
        self.labels = labels;
        self
    }

    /// Stops at the first path found when `any` is set.
    pub fn any_path_only(mut self, any: bool) -> Self {
        self.any_path_only = any;
        self
    }
}

/// A simple path, listed as vertex ids from source to destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphPath {
    vertices: Vec<ElementId>,
}

impl GraphPath {
    fn new(vertices: Vec<ElementId>) -> Self {
        Self { vertices }
    }

    /// Vertices along the path.
    pub fn vertices(&self) -> &[ElementId] {
        &self.vertices
    }

    /// Number of edges.
    pub fn hops(&self) -> usize {
        self.vertices.len().saturating_sub(1)
    }
}

impl fmt::Display for GraphPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, vertex) in self.vertices.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{vertex}")?;
        }
        Ok(())
    }
}

type AdjacencyMap = FxHashMap<ElementId, BTreeSet<ElementId>>;

/// Bounded simple-path search between two vertices.
///
/// Edges are traversed in both directions. Neighbors are expanded in id
/// order, so results are deterministic for a given adjacency.
pub struct PathFinder {
    adjacency: Arc<dyn Adjacency>,
}

impl PathFinder {
    /// Creates a finder over `adjacency`.
    pub fn new(adjacency: Arc<dyn Adjacency>) -> Self {
        Self { adjacency }
    }

    /// Finds simple paths from `opts.source` to `opts.dest` with at most
    /// `opts.max_hops` edges.
    pub fn find_paths(&self, opts: &FindPathOptions, progress: &dyn ProgressCallback) -> Result<Vec<GraphPath>> {
        if opts.max_hops == 0 {
            return Err(GraphError::Invalid("max_hops must be at least 1".into()));
        }
        if opts.source == opts.dest {
            return Err(GraphError::Invalid(
                "source and destination must differ".into(),
            ));
        }
        progress.progress(0.0, "searching");
        let paths = match opts.max_hops {
            1 => self.direct(opts)?,
            2 => self.two_hops(opts)?,
            _ => self.bounded_search(opts, progress)?,
        };
        progress.progress(100.0, "complete");
        info!(
            source = %opts.source,
            dest = %opts.dest,
            max_hops = opts.max_hops,
            paths = paths.len(),
            "paths.search.complete"
        );
        Ok(paths)
    }

    fn neighbors_of(&self, ids: BTreeSet<ElementId>, labels: &LabelFilter) -> Result<AdjacencyMap> {
        let edges = self.adjacency.edges_touching(&ids, labels)?;
        let mut map = AdjacencyMap::default();
        for edge in edges {
            map.entry(edge.out_id.clone())
                .or_default()
                .insert(edge.in_id.clone());
            map.entry(edge.in_id).or_default().insert(edge.out_id);
        }
        Ok(map)
    }

    fn direct(&self, opts: &FindPathOptions) -> Result<Vec<GraphPath>> {
        let map = self.neighbors_of(BTreeSet::from([opts.source.clone()]), &opts.labels)?;
        let linked = map
            .get(&opts.source)
            .is_some_and(|neighbors| neighbors.contains(&opts.dest));
        Ok(if linked {
            vec![GraphPath::new(vec![opts.source.clone(), opts.dest.clone()])]
        } else {
            Vec::new()
        })
    }

    fn two_hops(&self, opts: &FindPathOptions) -> Result<Vec<GraphPath>> {
        let map = self.neighbors_of(
            BTreeSet::from([opts.source.clone(), opts.dest.clone()]),
            &opts.labels,
        )?;
        let empty = BTreeSet::new();
        let from_source = map.get(&opts.source).unwrap_or(&empty);
        let from_dest = map.get(&opts.dest).unwrap_or(&empty);

        let mut paths = Vec::new();
        if from_source.contains(&opts.dest) {
            paths.push(GraphPath::new(vec![opts.source.clone(), opts.dest.clone()]));
            if opts.any_path_only {
                return Ok(paths);
            }
        }
        for middle in from_source.intersection(from_dest) {
            if middle == &opts.source || middle == &opts.dest {
                continue;
            }
            paths.push(GraphPath::new(vec![
                opts.source.clone(),
                middle.clone(),
                opts.dest.clone(),
            ]));
            if opts.any_path_only {
                break;
            }
        }
        Ok(paths)
    }

    fn bounded_search(&self, opts: &FindPathOptions, progress: &dyn ProgressCallback) -> Result<Vec<GraphPath>> {
        let mut map = AdjacencyMap::default();
        let mut visited: FxHashSet<ElementId> = FxHashSet::default();
        let mut frontier: BTreeSet<ElementId> = BTreeSet::from([opts.source.clone(), opts.dest.clone()]);
        visited.extend(frontier.iter().cloned());

        for level in 0..opts.max_hops {
            if frontier.is_empty() {
                break;
            }
            let expanded = self.neighbors_of(std::mem::take(&mut frontier), &opts.labels)?;
            for (vertex, neighbors) in expanded {
                for neighbor in &neighbors {
                    if visited.insert(neighbor.clone()) {
                        frontier.insert(neighbor.clone());
                    }
                }
                map.entry(vertex).or_default().extend(neighbors);
            }
            let percent = 50.0 * f64::from(level + 1) / f64::from(opts.max_hops);
            progress.progress(percent, "expanding");
            debug!(level, vertices = map.len(), frontier = frontier.len(), "paths.expand.level");
        }

        progress.progress(50.0, "enumerating");
        let search = PathSearch {
            map: &map,
            dest: &opts.dest,
            max_hops: opts.max_hops as usize,
            any_path_only: opts.any_path_only,
        };
        Ok(search.run(&opts.source))
    }
}

struct PathSearch<'a> {
    map: &'a AdjacencyMap,
    dest: &'a ElementId,
    max_hops: usize,
    any_path_only: bool,
}

impl<'a> PathSearch<'a> {
    /// Enumerates simple paths from `source` depth first.
    ///
    /// `stack[i]` iterates the unexplored neighbors of `path[i]`.
    fn run(&self, source: &'a ElementId) -> Vec<GraphPath> {
        let mut found = Vec::new();
        let Some(first) = self.map.get(source) else {
            return found;
        };
        let mut path: Vec<&'a ElementId> = vec![source];
        let mut on_path: FxHashSet<&'a ElementId> = FxHashSet::from_iter([source]);
        let mut stack = vec![first.iter()];

        while let Some(neighbors) = stack.last_mut() {
            let Some(next) = neighbors.next() else {
                stack.pop();
                if let Some(vertex) = path.pop() {
                    on_path.remove(vertex);
                }
                continue;
            };
            if on_path.contains(next) {
                continue;
            }
            if next == self.dest {
                let mut vertices: Vec<ElementId> = path.iter().map(|v| (*v).clone()).collect();
                vertices.push(next.clone());
                found.push(GraphPath::new(vertices));
                if self.any_path_only {
                    break;
                }
                continue;
            }
            // One more edge is still needed to reach the destination.
            if path.len() + 1 > self.max_hops {
                continue;
            }
            let Some(onward) = self.map.get(next) else {
                continue;
            };
            path.push(next);
            on_path.insert(next);
            stack.push(onward.iter());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EdgeRef, MemoryAdjacency};
    use std::cell::RefCell;

    fn finder(edges: &[(&str, &str, &str)]) -> PathFinder {
        let adjacency = MemoryAdjacency::from_edges(
            edges
                .iter()
                .enumerate()
                .map(|(i, (a, b, label))| EdgeRef::new(format!("e{i}"), *a, *b, *label)),
        );
        PathFinder::new(Arc::new(adjacency))
    }

    fn render(paths: &[GraphPath]) -> Vec<String> {
        paths.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn hop_budget_is_respected() {
        let finder = finder(&[("a", "b", "x"), ("b", "c", "x"), ("c", "d", "x")]);
        let three = finder
            .find_paths(&FindPathOptions::new("a", "d", 3), &NoProgress)
            .unwrap();
        assert_eq!(render(&three), vec!["a -> b -> c -> d"]);
        assert_eq!(three[0].hops(), 3);
        let two = finder
            .find_paths(&FindPathOptions::new("a", "d", 2), &NoProgress)
            .unwrap();
        assert!(two.is_empty());
    }

    #[test]
    fn two_hop_includes_direct_edge_first() {
        let finder = finder(&[("a", "c", "x"), ("a", "b", "x"), ("b", "c", "x")]);
        let paths = finder
            .find_paths(&FindPathOptions::new("a", "c", 2), &NoProgress)
            .unwrap();
        assert_eq!(render(&paths), vec!["a -> c", "a -> b -> c"]);
    }

    #[test]
    fn progress_is_reported_and_bounded() {
        let finder = finder(&[("a", "b", "x"), ("b", "c", "x"), ("c", "d", "x")]);
        let seen = RefCell::new(Vec::new());
        let callback = |percent: f64, phase: &str| seen.borrow_mut().push((percent, phase.to_string()));
        finder
            .find_paths(&FindPathOptions::new("a", "d", 4), &callback)
            .unwrap();
        let seen = seen.into_inner();
        assert!(seen.iter().all(|(p, _)| (0.0..=100.0).contains(p)));
        assert_eq!(seen.last().map(|(_, phase)| phase.as_str()), Some("complete"));
    }

    #[test]
    fn long_chains_do_not_exhaust_the_stack() {
        const LEN: usize = 100_000;
        let adjacency = MemoryAdjacency::from_edges(
            (0..LEN).map(|i| EdgeRef::new(format!("e{i}"), format!("v{i}"), format!("v{}", i + 1), "x")),
        );
        let finder = PathFinder::new(Arc::new(adjacency));
        let paths = finder
            .find_paths(
                &FindPathOptions::new("v0", format!("v{LEN}"), LEN as u32 + 1),
                &NoProgress,
            )
            .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].hops(), LEN);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let finder = finder(&[]);
        assert!(finder
            .find_paths(&FindPathOptions::new("a", "b", 0), &NoProgress)
            .is_err());
        assert!(finder
            .find_paths(&FindPathOptions::new("a", "a", 2), &NoProgress)
            .is_err());
    }
}
