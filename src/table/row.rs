//! Projected table rows
//!
//! Turns a leaf's property bag or a category into the requested columns.
//! Identity and hierarchy columns are computed by the table; a column the
//! row does not have comes back as a not-found error property.

use serde::Serialize;

use crate::category::{CategoryId, CategoryRegistry};
use crate::index::RowKey;
use crate::props::tags::{
    PR_CONTENT_COUNT, PR_CONTENT_UNREAD, PR_DEPTH, PR_INSTANCE_KEY, PR_ROW_TYPE,
    TBL_COLLAPSED_CATEGORY, TBL_EMPTY_CATEGORY, TBL_EXPANDED_CATEGORY, TBL_LEAF_ROW,
};
use crate::props::{PropTag, PropValue, Property, PropertyBag};

/// One row as returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub key: RowKey,
    /// One property per requested column, in column order
    pub props: Vec<Property>,
}

impl TableRow {
    /// Value of a column, `None` if the row reported it as missing
    pub fn get(&self, tag: PropTag) -> Option<&PropValue> {
        let tag = tag.normalized();
        self.props
            .iter()
            .find(|p| p.tag.normalized() == tag && !p.value.is_error())
            .map(|p| &p.value)
    }

    pub fn is_category(&self) -> bool {
        self.key.is_category()
    }
}

/// Column projection for one query
pub(crate) struct RowProjector<'a> {
    columns: &'a [PropTag],
    unicode: bool,
}

impl<'a> RowProjector<'a> {
    pub(crate) fn new(columns: &'a [PropTag], unicode: bool) -> Self {
        Self { columns, unicode }
    }

    fn property(&self, tag: PropTag, value: Option<PropValue>) -> Property {
        match value {
            Some(value) if !value.is_error() => {
                Property::new(tag.with_string_flavor(self.unicode), value)
            }
            _ => Property::not_found(tag),
        }
    }

    /// Project a leaf. `bag` is the fan-out row's view of the object and
    /// `depth` the number of grouping levels above it.
    pub(crate) fn leaf(&self, key: RowKey, bag: &PropertyBag, depth: usize) -> TableRow {
        let props = self
            .columns
            .iter()
            .map(|&tag| {
                let value = match tag {
                    PR_INSTANCE_KEY => Some(PropValue::Binary(key.instance_key())),
                    PR_ROW_TYPE => Some(PropValue::Long(TBL_LEAF_ROW)),
                    PR_DEPTH => Some(PropValue::Long(depth as i32)),
                    _ => bag.get(tag).cloned(),
                };
                self.property(tag, value)
            })
            .collect();
        TableRow { key, props }
    }

    /// Project a category row: counts, state and its grouping values.
    pub(crate) fn category(&self, registry: &CategoryRegistry, id: CategoryId) -> Option<TableRow> {
        let category = registry.get(id)?;
        let aggregate_tag = registry
            .levels()
            .get(category.depth)
            .and_then(|level| level.aggregate)
            .map(|aggregate| aggregate.tag.normalized());

        let row_type = if category.leaf_count == 0 {
            TBL_EMPTY_CATEGORY
        } else if category.expanded {
            TBL_EXPANDED_CATEGORY
        } else {
            TBL_COLLAPSED_CATEGORY
        };

        let props = self
            .columns
            .iter()
            .map(|&tag| {
                let value = match tag {
                    PR_INSTANCE_KEY => Some(PropValue::Binary(category.key.instance_key())),
                    PR_ROW_TYPE => Some(PropValue::Long(row_type)),
                    PR_DEPTH => Some(PropValue::Long(category.depth as i32)),
                    PR_CONTENT_COUNT => Some(PropValue::Long(category.leaf_count as i32)),
                    PR_CONTENT_UNREAD => Some(PropValue::Long(category.unread_count as i32)),
                    _ => match category.group_value(tag) {
                        Some(value) => Some(value.clone()),
                        None if aggregate_tag == Some(tag.normalized()) => category
                            .minmax
                            .as_ref()
                            .and_then(|minmax| minmax.value().cloned()),
                        None => None,
                    },
                };
                self.property(tag, value)
            })
            .collect();

        Some(TableRow {
            key: category.key,
            props,
        })
    }
}
