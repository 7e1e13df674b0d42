use serde::{Deserialize, Serialize};

use crate::types::{ElementId, Result, Timestamp, Value};
use crate::visibility::{Authorizations, VisibilityExpr};

/// Metadata attached to one property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Metadata key.
    pub key: String,
    /// Metadata value.
    pub value: Value,
    /// Visibility of the metadata entry itself.
    pub visibility: VisibilityExpr,
}

impl MetadataEntry {
    /// Creates a metadata entry.
    pub fn new(key: impl Into<String>, value: impl Into<Value>, visibility: VisibilityExpr) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            visibility,
        }
    }
}

/// Selects property entries by `(key, name, visibility)`; `None` matches any.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Property key (distinguishes values of a multi-valued property).
    pub key: Option<String>,
    /// Property name.
    pub name: Option<String>,
    /// Property visibility, compared after normalization.
    pub visibility: Option<VisibilityExpr>,
}

impl PropertyFilter {
    /// Matches exactly one `(key, name, visibility)` triple.
    pub fn exact(key: impl Into<String>, name: impl Into<String>, visibility: VisibilityExpr) -> Self {
        Self {
            key: Some(key.into()),
            name: Some(name.into()),
            visibility: Some(visibility),
        }
    }

    /// Matches every property called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            key: None,
            name: Some(name.into()),
            visibility: None,
        }
    }

    /// Returns `true` if the property identified by the arguments is selected.
    pub fn matches(&self, key: &str, name: &str, visibility: &VisibilityExpr) -> bool {
        if matches!(&self.key, Some(k) if k != key) {
            return false;
        }
        if matches!(&self.name, Some(n) if n != name) {
            return false;
        }
        match &self.visibility {
            Some(v) => v.equivalent(visibility),
            None => true,
        }
    }
}

/// One kind of change recorded in an element's mutation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MutationOp {
    /// Adds a property value. Existing values are never replaced implicitly.
    SetProperty {
        /// Property key.
        key: String,
        /// Property name.
        name: String,
        /// Value.
        value: Value,
        /// Metadata entries.
        metadata: Vec<MetadataEntry>,
        /// Visibility of the value.
        visibility: VisibilityExpr,
    },
    /// Upserts one metadata entry on every matching property.
    SetPropertyMetadata {
        /// Properties to update.
        filter: PropertyFilter,
        /// Entry replacing any entry with the same key and visibility.
        entry: MetadataEntry,
    },
    /// Changes the visibility of every matching property.
    AlterPropertyVisibility {
        /// Properties to update; the filter visibility is the old visibility.
        filter: PropertyFilter,
        /// Visibility to apply.
        visibility: VisibilityExpr,
    },
    /// Removes every matching property.
    PropertyDelete {
        /// Properties to remove.
        filter: PropertyFilter,
    },
    /// Removes every matching property, keeping the event for history.
    PropertySoftDelete {
        /// Properties to remove.
        filter: PropertyFilter,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Hides matching properties from readers satisfying `visibility`.
    MarkPropertyHidden {
        /// Properties to hide.
        filter: PropertyFilter,
        /// Readers satisfying this visibility no longer see the property.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Reverses a matching [`MutationOp::MarkPropertyHidden`].
    MarkPropertyVisible {
        /// Properties to reveal.
        filter: PropertyFilter,
        /// Hidden-visibility to remove.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Hides the element from readers satisfying `visibility`.
    MarkElementHidden {
        /// Hidden-visibility to add.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Reverses a matching [`MutationOp::MarkElementHidden`].
    MarkElementVisible {
        /// Hidden-visibility to remove.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Replaces the element visibility.
    AlterElementVisibility {
        /// New visibility.
        visibility: VisibilityExpr,
    },
    /// Replaces an edge label.
    AlterEdgeLabel {
        /// New label.
        label: String,
    },
    /// Adds a visibility readers must additionally satisfy.
    AdditionalVisibilityAdd {
        /// Visibility to add.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Removes an additional visibility.
    AdditionalVisibilityDelete {
        /// Visibility to remove.
        visibility: VisibilityExpr,
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Tombstones the element, keeping the event for history.
    SoftDelete {
        /// Opaque caller payload.
        event_data: Option<Value>,
    },
    /// Tombstones the element.
    Delete,
    /// Creates or re-creates a vertex.
    UpdateVertex {
        /// Element visibility.
        visibility: VisibilityExpr,
    },
    /// Creates or re-creates an edge.
    UpdateEdge {
        /// Element visibility.
        visibility: VisibilityExpr,
        /// Edge label.
        label: String,
        /// Source vertex.
        out_id: ElementId,
        /// Destination vertex.
        in_id: ElementId,
    },
}

impl MutationOp {
    /// Stable name of the variant, used in logs and history.
    pub fn kind(&self) -> &'static str {
        match self {
            MutationOp::SetProperty { .. } => "set_property",
            MutationOp::SetPropertyMetadata { .. } => "set_property_metadata",
            MutationOp::AlterPropertyVisibility { .. } => "alter_property_visibility",
            MutationOp::PropertyDelete { .. } => "property_delete",
            MutationOp::PropertySoftDelete { .. } => "property_soft_delete",
            MutationOp::MarkPropertyHidden { .. } => "mark_property_hidden",
            MutationOp::MarkPropertyVisible { .. } => "mark_property_visible",
            MutationOp::MarkElementHidden { .. } => "mark_element_hidden",
            MutationOp::MarkElementVisible { .. } => "mark_element_visible",
            MutationOp::AlterElementVisibility { .. } => "alter_element_visibility",
            MutationOp::AlterEdgeLabel { .. } => "alter_edge_label",
            MutationOp::AdditionalVisibilityAdd { .. } => "additional_visibility_add",
            MutationOp::AdditionalVisibilityDelete { .. } => "additional_visibility_delete",
            MutationOp::SoftDelete { .. } => "soft_delete",
            MutationOp::Delete => "delete",
            MutationOp::UpdateVertex { .. } => "update_vertex",
            MutationOp::UpdateEdge { .. } => "update_edge",
        }
    }

    /// Visibility that gates who may observe this event in history, if the
    /// event carries one.
    pub fn gating_visibility(&self) -> Option<&VisibilityExpr> {
        match self {
            MutationOp::SetProperty { visibility, .. }
            | MutationOp::AlterElementVisibility { visibility }
            | MutationOp::MarkElementHidden { visibility, .. }
            | MutationOp::MarkElementVisible { visibility, .. }
            | MutationOp::MarkPropertyHidden { visibility, .. }
            | MutationOp::MarkPropertyVisible { visibility, .. }
            | MutationOp::AdditionalVisibilityAdd { visibility, .. }
            | MutationOp::AdditionalVisibilityDelete { visibility, .. }
            | MutationOp::UpdateVertex { visibility }
            | MutationOp::UpdateEdge { visibility, .. } => Some(visibility),
            MutationOp::SetPropertyMetadata { entry, .. } => Some(&entry.visibility),
            MutationOp::AlterPropertyVisibility { visibility, .. } => Some(visibility),
            MutationOp::PropertyDelete { filter }
            | MutationOp::PropertySoftDelete { filter, .. } => filter.visibility.as_ref(),
            MutationOp::AlterEdgeLabel { .. } | MutationOp::SoftDelete { .. } | MutationOp::Delete => {
                None
            }
        }
    }

    /// Returns `true` if `auths` can read every visibility the event exposes.
    ///
    /// Metadata and property-visibility changes also expose the visibility of
    /// the property they target, so both must be readable.
    pub fn readable_by(&self, auths: &Authorizations) -> Result<bool> {
        if let Some(visibility) = self.gating_visibility() {
            if !auths.can_read(visibility)? {
                return Ok(false);
            }
        }
        match self {
            MutationOp::SetPropertyMetadata { filter, .. }
            | MutationOp::AlterPropertyVisibility { filter, .. } => match &filter.visibility {
                Some(visibility) => auths.can_read(visibility),
                None => Ok(true),
            },
            _ => Ok(true),
        }
    }

    /// Opaque payload carried by the event, if any.
    pub fn event_data(&self) -> Option<&Value> {
        match self {
            MutationOp::PropertySoftDelete { event_data, .. }
            | MutationOp::MarkPropertyHidden { event_data, .. }
            | MutationOp::MarkPropertyVisible { event_data, .. }
            | MutationOp::MarkElementHidden { event_data, .. }
            | MutationOp::MarkElementVisible { event_data, .. }
            | MutationOp::AdditionalVisibilityAdd { event_data, .. }
            | MutationOp::AdditionalVisibilityDelete { event_data, .. }
            | MutationOp::SoftDelete { event_data } => event_data.as_ref(),
            _ => None,
        }
    }
}

/// An immutable, timestamped event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Logical timestamp in milliseconds.
    pub timestamp: Timestamp,
    /// The change.
    pub op: MutationOp,
}

impl Mutation {
    /// Creates a mutation.
    pub fn new(timestamp: Timestamp, op: MutationOp) -> Self {
        Self { timestamp, op }
    }
}

/// A mutation together with its position in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedMutation {
    /// Insertion sequence number, unique within one log.
    pub seq: u64,
    /// The recorded mutation.
    pub mutation: Mutation,
}

impl LoggedMutation {
    /// Timestamp of the wrapped mutation.
    pub fn timestamp(&self) -> Timestamp {
        self.mutation.timestamp
    }

    /// Replay order: timestamp, then insertion sequence.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.mutation.timestamp, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vis(text: &str) -> VisibilityExpr {
        VisibilityExpr::parse(text).unwrap()
    }

    #[test]
    fn filter_wildcards_and_normalized_visibility() {
        let any = PropertyFilter::default();
        assert!(any.matches("k", "n", &vis("a")));
        let named = PropertyFilter::named("n");
        assert!(named.matches("k1", "n", &vis("")));
        assert!(!named.matches("k1", "m", &vis("")));
        let exact = PropertyFilter::exact("k", "n", vis("b&a"));
        assert!(exact.matches("k", "n", &vis("a&b")));
        assert!(!exact.matches("k", "n", &vis("a|b")));
        assert!(!exact.matches("k2", "n", &vis("a&b")));
    }

    #[test]
    fn mutations_round_trip_through_json() {
        let m = Mutation::new(
            7,
            MutationOp::UpdateEdge {
                visibility: vis("a|b"),
                label: "knows".into(),
                out_id: "v1".into(),
                in_id: "v2".into(),
            },
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Mutation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.op.kind(), "update_edge");
    }

    #[test]
    fn event_data_and_gating_visibility() {
        let op = MutationOp::SoftDelete {
            event_data: Some(Value::from("why")),
        };
        assert_eq!(op.event_data(), Some(&Value::from("why")));
        assert!(op.gating_visibility().is_none());
        let op = MutationOp::MarkElementHidden {
            visibility: vis("x"),
            event_data: None,
        };
        assert_eq!(op.gating_visibility(), Some(&vis("x")));
    }
}
