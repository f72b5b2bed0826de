//! Category subsystem
//!
//! Groups leaf rows by the values of the leading sort columns. Each distinct
//! grouping prefix is one category row with running leaf and unread counts
//! and an optional min/max aggregate that controls where the category sorts.
//!
//! # Invariants
//!
//! - A category's leaf count equals the number of leaves below it, hidden
//!   or not; its unread count never exceeds its leaf count
//! - A category exists exactly while its leaf count is non-zero
//! - The tracked min/max equals the extreme over the current contributors
//! - Categories live in an arena; parent links are arena ids, never
//!   references

mod minmax;
mod registry;

use serde::{Deserialize, Serialize};

use crate::index::{RowKey, SortKey};
use crate::props::{PropTag, PropValue};

pub use minmax::{Extreme, MinMax};
pub use registry::CategoryRegistry;

/// Arena slot of a category
pub type CategoryId = usize;

/// Aggregate kind of a min/max sort column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregate {
    Min,
    Max,
}

/// Min/max column attached to one grouping level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateColumn {
    pub aggregate: Aggregate,
    pub tag: PropTag,
    pub descending: bool,
}

/// One grouping level: the categorize column and its optional aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryLevel {
    pub tag: PropTag,
    pub descending: bool,
    pub aggregate: Option<AggregateColumn>,
}

impl CategoryLevel {
    /// Grouping component of a row at this level
    pub fn group_component(&self, value: Option<&PropValue>) -> SortKey {
        SortKey::encode(value, self.descending)
    }

    /// Number of sort key components this level contributes
    pub fn width(&self) -> usize {
        if self.aggregate.is_some() {
            2
        } else {
            1
        }
    }
}

/// One category row
#[derive(Debug, Clone)]
pub struct Category {
    pub key: RowKey,
    /// 0 for top-level categories
    pub depth: usize,
    pub parent: Option<CategoryId>,
    /// Grouping components from the top level down to this one
    pub group: Vec<SortKey>,
    /// Grouping values as captured from the first leaf, one per level
    pub values: Vec<(PropTag, Option<PropValue>)>,
    pub leaf_count: u32,
    pub unread_count: u32,
    pub expanded: bool,
    /// Hidden because an ancestor is collapsed
    pub hidden: bool,
    pub minmax: Option<MinMax>,
}

impl Category {
    /// Whether rows directly below this category are hidden
    pub fn hides_children(&self) -> bool {
        self.hidden || !self.expanded
    }

    /// Value of a grouping column captured for this category
    pub fn group_value(&self, tag: PropTag) -> Option<&PropValue> {
        let tag = tag.normalized();
        self.values
            .iter()
            .find(|(t, _)| t.normalized() == tag)
            .and_then(|(_, v)| v.as_ref())
    }
}

/// Read-only view of one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryInfo {
    pub key: RowKey,
    pub depth: usize,
    pub parent: Option<RowKey>,
    pub values: Vec<Option<PropValue>>,
    pub leaf_count: u32,
    pub unread_count: u32,
    pub expanded: bool,
    pub hidden: bool,
    pub aggregate: Option<PropValue>,
}

/// Category side effects of one leaf operation, for the table to apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryChange {
    /// Newly minted categories, shallowest first
    pub created: Vec<CategoryId>,
    /// Existing categories whose aggregate component changed, shallowest first
    pub resorted: Vec<CategoryId>,
    /// Surviving categories whose counts changed
    pub modified: Vec<CategoryId>,
    /// Row keys of released categories, deepest first
    pub removed: Vec<RowKey>,
}

impl CategoryChange {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.resorted.is_empty()
            && self.modified.is_empty()
            && self.removed.is_empty()
    }

    fn merge(&mut self, other: CategoryChange) {
        self.created.extend(other.created);
        for id in other.resorted {
            if !self.resorted.contains(&id) {
                self.resorted.push(id);
            }
        }
        for id in other.modified {
            if !self.modified.contains(&id) {
                self.modified.push(id);
            }
        }
        self.removed.extend(other.removed);
    }
}
