use std::collections::BTreeSet;

use super::mutation::MetadataEntry;
use crate::types::{ElementId, ElementKey, Result, Timestamp, Value};
use crate::visibility::{Authorizations, VisibilityExpr};

/// Which optional facets of an element a reader wants materialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchHints {
    /// Whether properties are returned at all.
    pub include_properties: bool,
    /// Whether elements and properties hidden for the reader are returned.
    pub include_hidden: bool,
}

impl FetchHints {
    /// Properties included, hidden data excluded.
    pub const DEFAULT: FetchHints = FetchHints {
        include_properties: true,
        include_hidden: false,
    };

    /// Everything the reader is authorized to see, hidden data included.
    pub const ALL_INCLUDING_HIDDEN: FetchHints = FetchHints {
        include_properties: true,
        include_hidden: true,
    };

    /// Element shell only.
    pub const NONE: FetchHints = FetchHints {
        include_properties: false,
        include_hidden: false,
    };
}

impl Default for FetchHints {
    fn default() -> Self {
        FetchHints::DEFAULT
    }
}

/// One live property value.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Property key.
    pub key: String,
    /// Property name.
    pub name: String,
    /// Current value.
    pub value: Value,
    /// Metadata entries.
    pub metadata: Vec<MetadataEntry>,
    /// Normalized visibilities for which this value is hidden.
    pub hidden_visibilities: BTreeSet<VisibilityExpr>,
    /// Timestamp of the mutation that set the value.
    pub timestamp: Timestamp,
    /// Visibility gating the value.
    pub visibility: VisibilityExpr,
}

impl Property {
    /// Returns `true` if any hidden-visibility is satisfied by `auths`.
    pub fn is_hidden_for(&self, auths: &Authorizations) -> Result<bool> {
        any_satisfied(&self.hidden_visibilities, auths)
    }

    /// Metadata value stored under `key`, if any.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }
}

/// Label and endpoints of an edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeEndpoints {
    /// Edge label.
    pub label: String,
    /// Source vertex.
    pub out_id: ElementId,
    /// Destination vertex.
    pub in_id: ElementId,
}

/// Materialized view of an element as of a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementSnapshot {
    /// Element addressed by this snapshot.
    pub key: ElementKey,
    /// Timestamp of the last mutation folded into the snapshot.
    pub timestamp: Timestamp,
    /// Element visibility.
    pub visibility: VisibilityExpr,
    /// Live properties in insertion order.
    pub properties: Vec<Property>,
    /// Normalized visibilities for which the element is hidden.
    pub hidden_visibilities: BTreeSet<VisibilityExpr>,
    /// Normalized visibilities a reader must additionally satisfy.
    pub additional_visibilities: BTreeSet<VisibilityExpr>,
    /// Edge label and endpoints; `None` for vertices and rows.
    pub edge: Option<EdgeEndpoints>,
}

impl ElementSnapshot {
    /// First property called `name`.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Every property called `name`.
    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties.iter().filter(move |p| p.name == name)
    }

    /// First value of the property called `name`.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.property(name).map(|p| &p.value)
    }

    /// Returns `true` if any element hidden-visibility is satisfied by `auths`.
    pub fn is_hidden_for(&self, auths: &Authorizations) -> Result<bool> {
        any_satisfied(&self.hidden_visibilities, auths)
    }

    /// Returns `true` if `auths` satisfies the element visibility and every
    /// additional visibility.
    pub fn is_visible_to(&self, auths: &Authorizations) -> Result<bool> {
        if !auths.can_read(&self.visibility)? {
            return Ok(false);
        }
        for extra in &self.additional_visibilities {
            if !auths.can_read(extra)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Applies read-side access control.
    ///
    /// Returns `None` when the element is not visible to `auths` (or hidden
    /// for it and `hints` exclude hidden data). Otherwise keeps only the
    /// properties and metadata entries `auths` can read.
    pub fn redact(mut self, auths: &Authorizations, hints: FetchHints) -> Result<Option<Self>> {
        if !self.is_visible_to(auths)? {
            return Ok(None);
        }
        if !hints.include_hidden && self.is_hidden_for(auths)? {
            return Ok(None);
        }
        if !hints.include_properties {
            self.properties.clear();
            return Ok(Some(self));
        }
        let mut kept = Vec::with_capacity(self.properties.len());
        for mut property in self.properties {
            if !auths.can_read(&property.visibility)? {
                continue;
            }
            if !hints.include_hidden && property.is_hidden_for(auths)? {
                continue;
            }
            let mut metadata = Vec::with_capacity(property.metadata.len());
            for entry in property.metadata {
                if auths.can_read(&entry.visibility)? {
                    metadata.push(entry);
                }
            }
            property.metadata = metadata;
            kept.push(property);
        }
        self.properties = kept;
        Ok(Some(self))
    }
}

fn any_satisfied(set: &BTreeSet<VisibilityExpr>, auths: &Authorizations) -> Result<bool> {
    for visibility in set {
        if auths.can_read(visibility)? {
            return Ok(true);
        }
    }
    Ok(false)
}
