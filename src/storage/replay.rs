use std::collections::BTreeSet;

use super::mutation::{LoggedMutation, MetadataEntry, Mutation, MutationOp, PropertyFilter};
use super::snapshot::{EdgeEndpoints, ElementSnapshot, Property};
use crate::types::{ElementId, ElementKey, Timestamp};
use crate::visibility::VisibilityExpr;

/// Accumulator folded over a mutation log.
///
/// Owned and threaded by value through [`ElementState::apply`]; replaying a
/// prefix and then applying the remaining mutations gives the same state as
/// replaying everything at once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementState {
    /// Whether the element exists after the last applied mutation.
    pub exists: bool,
    /// Element visibility.
    pub visibility: VisibilityExpr,
    /// Live properties in insertion order.
    pub properties: Vec<Property>,
    /// Normalized element hidden-visibilities.
    pub element_hidden: BTreeSet<VisibilityExpr>,
    /// Normalized additional visibilities.
    pub additional_visibilities: BTreeSet<VisibilityExpr>,
    /// Edge label.
    pub label: Option<String>,
    /// Edge source vertex.
    pub out_id: Option<ElementId>,
    /// Edge destination vertex.
    pub in_id: Option<ElementId>,
    /// Timestamp of the last applied mutation.
    pub last_timestamp: Option<Timestamp>,
}

impl ElementState {
    /// Folds one mutation into the state.
    pub fn apply(mut self, mutation: &Mutation) -> Self {
        let ts = mutation.timestamp;
        match &mutation.op {
            MutationOp::UpdateVertex { visibility } => {
                self.exists = true;
                self.visibility = visibility.clone();
            }
            MutationOp::UpdateEdge {
                visibility,
                label,
                out_id,
                in_id,
            } => {
                self.exists = true;
                self.visibility = visibility.clone();
                self.label = Some(label.clone());
                self.out_id = Some(out_id.clone());
                self.in_id = Some(in_id.clone());
            }
            MutationOp::Delete | MutationOp::SoftDelete { .. } => {
                self.exists = false;
            }
            MutationOp::AlterElementVisibility { visibility } => {
                self.visibility = visibility.clone();
            }
            MutationOp::MarkElementHidden { visibility, .. } => {
                self.element_hidden.insert(visibility.normalize());
            }
            MutationOp::MarkElementVisible { visibility, .. } => {
                self.element_hidden.remove(&visibility.normalize());
            }
            MutationOp::AdditionalVisibilityAdd { visibility, .. } => {
                self.additional_visibilities.insert(visibility.normalize());
            }
            MutationOp::AdditionalVisibilityDelete { visibility, .. } => {
                self.additional_visibilities.remove(&visibility.normalize());
            }
            MutationOp::SetProperty {
                key,
                name,
                value,
                metadata,
                visibility,
            } => {
                self.properties.push(Property {
                    key: key.clone(),
                    name: name.clone(),
                    value: value.clone(),
                    metadata: metadata.clone(),
                    hidden_visibilities: BTreeSet::new(),
                    timestamp: ts,
                    visibility: visibility.clone(),
                });
            }
            MutationOp::PropertyDelete { filter } | MutationOp::PropertySoftDelete { filter, .. } => {
                self.properties.retain(|p| !selects(filter, p));
            }
            MutationOp::MarkPropertyHidden {
                filter, visibility, ..
            } => {
                let hidden = visibility.normalize();
                for p in self.properties.iter_mut().filter(|p| selects(filter, p)) {
                    p.hidden_visibilities.insert(hidden.clone());
                }
            }
            MutationOp::MarkPropertyVisible {
                filter, visibility, ..
            } => {
                let hidden = visibility.normalize();
                for p in self.properties.iter_mut().filter(|p| selects(filter, p)) {
                    p.hidden_visibilities.remove(&hidden);
                }
            }
            MutationOp::AlterEdgeLabel { label } => {
                self.label = Some(label.clone());
            }
            MutationOp::SetPropertyMetadata { filter, entry } => {
                for p in self.properties.iter_mut().filter(|p| selects(filter, p)) {
                    upsert_metadata(&mut p.metadata, entry);
                }
            }
            MutationOp::AlterPropertyVisibility { filter, visibility } => {
                for p in self.properties.iter_mut().filter(|p| selects(filter, p)) {
                    p.visibility = visibility.clone();
                }
            }
        }
        self.last_timestamp = Some(ts);
        self
    }

    /// Folds every mutation yielded by `mutations`, in iteration order.
    pub fn apply_all<'a, I>(self, mutations: I) -> Self
    where
        I: IntoIterator<Item = &'a Mutation>,
    {
        mutations.into_iter().fold(self, ElementState::apply)
    }

    /// Converts the state into a snapshot, or `None` when the element does
    /// not exist at this point.
    pub fn into_snapshot(self, key: &ElementKey) -> Option<ElementSnapshot> {
        if !self.exists {
            return None;
        }
        let edge = match (key, self.label, self.out_id, self.in_id) {
            (ElementKey::Edge(_), Some(label), Some(out_id), Some(in_id)) => Some(EdgeEndpoints {
                label,
                out_id,
                in_id,
            }),
            _ => None,
        };
        Some(ElementSnapshot {
            key: key.clone(),
            timestamp: self.last_timestamp.unwrap_or_default(),
            visibility: self.visibility,
            properties: self.properties,
            hidden_visibilities: self.element_hidden,
            additional_visibilities: self.additional_visibilities,
            edge,
        })
    }
}

/// Replays every mutation of `log` with `timestamp <= cutoff`, in
/// `(timestamp, seq)` order, from an empty state.
pub fn replay(log: &[LoggedMutation], cutoff: Timestamp) -> ElementState {
    let mut prefix: Vec<&LoggedMutation> = log.iter().filter(|m| m.timestamp() <= cutoff).collect();
    prefix.sort_by_key(|m| m.order_key());
    ElementState::default().apply_all(prefix.into_iter().map(|m| &m.mutation))
}

fn selects(filter: &PropertyFilter, property: &Property) -> bool {
    filter.matches(&property.key, &property.name, &property.visibility)
}

fn upsert_metadata(metadata: &mut Vec<MetadataEntry>, entry: &MetadataEntry) {
    metadata.retain(|m| !(m.key == entry.key && m.visibility.equivalent(&entry.visibility)));
    metadata.push(entry.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn vis(text: &str) -> VisibilityExpr {
        VisibilityExpr::parse(text).unwrap()
    }

    fn logged(seq: u64, ts: Timestamp, op: MutationOp) -> LoggedMutation {
        LoggedMutation {
            seq,
            mutation: Mutation::new(ts, op),
        }
    }

    fn set(name: &str, value: i64, visibility: &str) -> MutationOp {
        MutationOp::SetProperty {
            key: "k".into(),
            name: name.into(),
            value: Value::Int(value),
            metadata: Vec::new(),
            visibility: vis(visibility),
        }
    }

    fn update() -> MutationOp {
        MutationOp::UpdateVertex {
            visibility: VisibilityExpr::empty(),
        }
    }

    #[test]
    fn multivalued_properties_coexist_until_deleted() {
        let log = vec![
            logged(1, 1, update()),
            logged(2, 2, set("age", 30, "a")),
            logged(3, 3, set("age", 31, "b")),
            logged(
                4,
                4,
                MutationOp::PropertyDelete {
                    filter: PropertyFilter::exact("k", "age", vis("a")),
                },
            ),
        ];
        assert_eq!(replay(&log, 3).properties.len(), 2);
        let state = replay(&log, 4);
        assert_eq!(state.properties.len(), 1);
        assert_eq!(state.properties[0].value, Value::Int(31));
        assert_eq!(state.properties[0].timestamp, 3);
    }

    #[test]
    fn ties_are_broken_by_sequence() {
        let log = vec![
            logged(
                2,
                5,
                MutationOp::AlterElementVisibility {
                    visibility: vis("second"),
                },
            ),
            logged(
                1,
                5,
                MutationOp::AlterElementVisibility {
                    visibility: vis("first"),
                },
            ),
            logged(0, 1, update()),
        ];
        assert_eq!(replay(&log, 5).visibility, vis("second"));
    }

    #[test]
    fn hidden_marks_toggle() {
        let log = vec![
            logged(1, 1, update()),
            logged(2, 2, set("name", 1, "")),
            logged(
                3,
                3,
                MutationOp::MarkPropertyHidden {
                    filter: PropertyFilter::named("name"),
                    visibility: vis("b&a"),
                    event_data: None,
                },
            ),
            logged(
                4,
                4,
                MutationOp::MarkElementHidden {
                    visibility: vis("x"),
                    event_data: None,
                },
            ),
            logged(
                5,
                5,
                MutationOp::MarkPropertyVisible {
                    filter: PropertyFilter::named("name"),
                    visibility: vis("a&b"),
                    event_data: None,
                },
            ),
            logged(
                6,
                6,
                MutationOp::MarkElementVisible {
                    visibility: vis("x"),
                    event_data: None,
                },
            ),
        ];
        let mid = replay(&log, 4);
        assert_eq!(mid.properties[0].hidden_visibilities.len(), 1);
        assert_eq!(mid.element_hidden.len(), 1);
        let end = replay(&log, 6);
        assert!(end.properties[0].hidden_visibilities.is_empty());
        assert!(end.element_hidden.is_empty());
    }

    #[test]
    fn edges_keep_endpoints_and_relabel() {
        let key = ElementKey::edge("e1");
        let log = vec![
            logged(
                1,
                1,
                MutationOp::UpdateEdge {
                    visibility: VisibilityExpr::empty(),
                    label: "knows".into(),
                    out_id: "a".into(),
                    in_id: "b".into(),
                },
            ),
            logged(
                2,
                2,
                MutationOp::AlterEdgeLabel {
                    label: "likes".into(),
                },
            ),
        ];
        let snapshot = replay(&log, 2).into_snapshot(&key).unwrap();
        let edge = snapshot.edge.unwrap();
        assert_eq!(edge.label, "likes");
        assert_eq!(edge.out_id, ElementId::new("a"));
        assert_eq!(edge.in_id, ElementId::new("b"));
        assert_eq!(snapshot.timestamp, 2);
    }

    #[test]
    fn metadata_and_visibility_updates_in_place() {
        let log = vec![
            logged(1, 1, update()),
            logged(2, 2, set("name", 1, "a")),
            logged(
                3,
                3,
                MutationOp::SetPropertyMetadata {
                    filter: PropertyFilter::named("name"),
                    entry: MetadataEntry::new("source", "crawler", VisibilityExpr::empty()),
                },
            ),
            logged(
                4,
                4,
                MutationOp::SetPropertyMetadata {
                    filter: PropertyFilter::named("name"),
                    entry: MetadataEntry::new("source", "import", VisibilityExpr::empty()),
                },
            ),
            logged(
                5,
                5,
                MutationOp::AlterPropertyVisibility {
                    filter: PropertyFilter::exact("k", "name", vis("a")),
                    visibility: vis("b"),
                },
            ),
        ];
        let state = replay(&log, 5);
        let prop = &state.properties[0];
        assert_eq!(prop.metadata.len(), 1);
        assert_eq!(prop.metadata_value("source"), Some(&Value::from("import")));
        assert_eq!(prop.visibility, vis("b"));
    }

    #[test]
    fn soft_delete_tombstones_and_update_resurrects() {
        let key = ElementKey::vertex("v");
        let log = vec![
            logged(1, 1, update()),
            logged(2, 2, MutationOp::SoftDelete { event_data: None }),
            logged(3, 3, update()),
        ];
        assert!(replay(&log, 2).into_snapshot(&key).is_none());
        assert!(replay(&log, 3).into_snapshot(&key).is_some());
        assert!(replay(&log, 0).into_snapshot(&key).is_none());
    }

    #[test]
    fn additional_visibilities_are_normalized_sets() {
        let log = vec![
            logged(1, 1, update()),
            logged(
                2,
                2,
                MutationOp::AdditionalVisibilityAdd {
                    visibility: vis("b|a"),
                    event_data: None,
                },
            ),
            logged(
                3,
                3,
                MutationOp::AdditionalVisibilityAdd {
                    visibility: vis("a|b"),
                    event_data: None,
                },
            ),
        ];
        assert_eq!(replay(&log, 3).additional_visibilities.len(), 1);
        let mut log = log;
        log.push(logged(
            4,
            4,
            MutationOp::AdditionalVisibilityDelete {
                visibility: vis("(a|b)"),
                event_data: None,
            },
        ));
        assert!(replay(&log, 4).additional_visibilities.is_empty());
    }
}
