//! Sort order of a table
//!
//! The first `category_depth` plain columns group rows into categories. A
//! min/max column directly after a categorize column orders the categories
//! of that level by their live aggregate instead of by their own value.
//!
//! Effective sort key layout of a leaf:
//!
//! ```text
//! [agg0]? cat0 [agg1]? cat1 ... tail0 tail1 ...
//! ```
//!
//! A category row carries the prefix up to and including its own
//! categorize component, so it sorts before all of its rows.

use serde::{Deserialize, Serialize};

use crate::category::{Aggregate, AggregateColumn, CategoryId, CategoryLevel, CategoryRegistry};
use crate::errors::{TableError, TableResult};
use crate::index::SortKey;
use crate::props::{PropTag, PropertyBag};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// One sort column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub tag: PropTag,
    pub direction: SortDirection,
    /// Min/max column: orders the preceding category level
    pub aggregate: Option<Aggregate>,
}

impl SortColumn {
    pub fn asc(tag: PropTag) -> Self {
        Self {
            tag,
            direction: SortDirection::Ascending,
            aggregate: None,
        }
    }

    pub fn desc(tag: PropTag) -> Self {
        Self {
            tag,
            direction: SortDirection::Descending,
            aggregate: None,
        }
    }

    pub fn max(tag: PropTag, direction: SortDirection) -> Self {
        Self {
            tag,
            direction,
            aggregate: Some(Aggregate::Max),
        }
    }

    pub fn min(tag: PropTag, direction: SortDirection) -> Self {
        Self {
            tag,
            direction,
            aggregate: Some(Aggregate::Min),
        }
    }

    pub fn is_descending(&self) -> bool {
        self.direction == SortDirection::Descending
    }
}

/// Validated sort specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrderSet {
    columns: Vec<SortColumn>,
    category_depth: usize,
    expand_depth: usize,
}

impl SortOrderSet {
    /// Validate and build a sort order.
    ///
    /// - multi-valued columns must carry the instance flag, and at most one
    ///   column may (`TooComplex`)
    /// - `category_depth` may not exceed the number of plain columns
    ///   (`InvalidParameter`)
    /// - a min/max column must directly follow a categorize column
    ///   (`InvalidParameter`)
    pub fn new(
        columns: Vec<SortColumn>,
        category_depth: usize,
        expand_depth: usize,
    ) -> TableResult<Self> {
        let mut instance_columns = 0;
        let mut plain_seen = 0;
        let mut previous_categorizes = false;

        for column in &columns {
            if column.tag.is_multi_valued() {
                if !column.tag.is_instance() {
                    return Err(TableError::too_complex(format!(
                        "multi-valued sort column {} without instance flag",
                        column.tag
                    )));
                }
                instance_columns += 1;
                if instance_columns > 1 {
                    return Err(TableError::too_complex(
                        "more than one multi-valued instance sort column",
                    ));
                }
            }

            if column.aggregate.is_some() {
                if !previous_categorizes {
                    return Err(TableError::invalid_parameter(format!(
                        "min/max column {} does not follow a categorize column",
                        column.tag
                    )));
                }
                previous_categorizes = false;
            } else {
                previous_categorizes = plain_seen < category_depth;
                plain_seen += 1;
            }
        }

        if category_depth > plain_seen {
            return Err(TableError::invalid_parameter(format!(
                "category depth {} exceeds {} sort columns",
                category_depth, plain_seen
            )));
        }

        Ok(Self {
            columns,
            category_depth,
            expand_depth,
        })
    }

    /// Plain sort without grouping
    pub fn flat(columns: Vec<SortColumn>) -> TableResult<Self> {
        Self::new(columns, 0, 0)
    }

    pub fn columns(&self) -> &[SortColumn] {
        &self.columns
    }

    pub fn category_depth(&self) -> usize {
        self.category_depth
    }

    pub fn expand_depth(&self) -> usize {
        self.expand_depth
    }

    pub fn is_categorized(&self) -> bool {
        self.category_depth > 0
    }

    /// The multi-valued instance column rows fan out on
    pub fn instance_column(&self) -> Option<PropTag> {
        self.columns
            .iter()
            .map(|c| c.tag)
            .find(|tag| tag.is_instance())
    }

    /// Grouping levels for the category registry
    pub fn category_levels(&self) -> Vec<CategoryLevel> {
        let mut levels: Vec<CategoryLevel> = Vec::with_capacity(self.category_depth);
        for column in &self.columns {
            match column.aggregate {
                Some(aggregate) => {
                    if let Some(level) = levels.last_mut() {
                        level.aggregate = Some(AggregateColumn {
                            aggregate,
                            tag: column.tag,
                            descending: column.is_descending(),
                        });
                    }
                }
                None if levels.len() < self.category_depth => levels.push(CategoryLevel {
                    tag: column.tag,
                    descending: column.is_descending(),
                    aggregate: None,
                }),
                None => break,
            }
        }
        levels
    }

    /// Plain columns after the categorize columns
    pub fn tail_columns(&self) -> impl Iterator<Item = &SortColumn> {
        self.columns
            .iter()
            .filter(|c| c.aggregate.is_none())
            .skip(self.category_depth)
    }

    /// Tags the loader must supply for ordering and grouping
    pub fn projection(&self) -> Vec<PropTag> {
        let mut tags: Vec<PropTag> = Vec::new();
        for column in &self.columns {
            let tag = column.tag.normalized();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }

    /// Effective sort key sequence of a leaf row. `category` is the leaf's
    /// deepest category when the table is categorized.
    pub fn leaf_sort_keys(
        &self,
        row: &PropertyBag,
        registry: &CategoryRegistry,
        category: Option<CategoryId>,
    ) -> Vec<SortKey> {
        let mut keys = category
            .map(|id| registry.sort_prefix(id))
            .unwrap_or_default();
        keys.extend(
            self.tail_columns()
                .map(|column| SortKey::encode(row.get(column.tag), column.is_descending())),
        );
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::tags::{
        MVI_FLAG, PR_KEYWORDS, PR_MESSAGE_DELIVERY_TIME, PR_SENDER_NAME, PR_SUBJECT,
    };
    use crate::props::PropValue;

    fn keywords_instance() -> PropTag {
        PR_KEYWORDS.with_type(PR_KEYWORDS.prop_type() | MVI_FLAG)
    }

    #[test]
    fn test_multi_valued_without_instance_is_too_complex() {
        let result = SortOrderSet::flat(vec![SortColumn::asc(PR_KEYWORDS)]);
        assert!(matches!(result, Err(TableError::TooComplex(_))));
    }

    #[test]
    fn test_two_instance_columns_too_complex() {
        let result = SortOrderSet::flat(vec![
            SortColumn::asc(keywords_instance()),
            SortColumn::asc(keywords_instance()),
        ]);
        assert!(matches!(result, Err(TableError::TooComplex(_))));
    }

    #[test]
    fn test_depth_exceeding_columns_rejected() {
        let result = SortOrderSet::new(vec![SortColumn::asc(PR_SUBJECT)], 2, 0);
        assert!(matches!(result, Err(TableError::InvalidParameter(_))));
    }

    #[test]
    fn test_aggregate_must_follow_categorize() {
        let misplaced = SortOrderSet::new(
            vec![
                SortColumn::asc(PR_SENDER_NAME),
                SortColumn::asc(PR_SUBJECT),
                SortColumn::max(PR_MESSAGE_DELIVERY_TIME, SortDirection::Descending),
            ],
            1,
            1,
        );
        assert!(matches!(misplaced, Err(TableError::InvalidParameter(_))));

        let flat = SortOrderSet::flat(vec![SortColumn::max(
            PR_MESSAGE_DELIVERY_TIME,
            SortDirection::Descending,
        )]);
        assert!(matches!(flat, Err(TableError::InvalidParameter(_))));
    }

    #[test]
    fn test_category_levels_with_aggregate() {
        let sort = SortOrderSet::new(
            vec![
                SortColumn::asc(PR_SENDER_NAME),
                SortColumn::max(PR_MESSAGE_DELIVERY_TIME, SortDirection::Descending),
                SortColumn::desc(PR_MESSAGE_DELIVERY_TIME),
            ],
            1,
            1,
        )
        .unwrap();

        let levels = sort.category_levels();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].tag, PR_SENDER_NAME);
        let aggregate = levels[0].aggregate.unwrap();
        assert_eq!(aggregate.aggregate, Aggregate::Max);
        assert!(aggregate.descending);

        let tail: Vec<_> = sort.tail_columns().collect();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].is_descending());
        assert_eq!(sort.projection().len(), 2);
    }

    #[test]
    fn test_flat_leaf_keys() {
        let sort = SortOrderSet::flat(vec![SortColumn::asc(PR_SUBJECT)]).unwrap();
        let row = PropertyBag::new().with(PR_SUBJECT, PropValue::string("b"));
        let keys = sort.leaf_sort_keys(&row, &CategoryRegistry::default(), None);
        assert_eq!(keys, vec![SortKey::encode(Some(&PropValue::string("b")), false)]);
    }

    #[test]
    fn test_instance_column() {
        let sort = SortOrderSet::flat(vec![SortColumn::asc(keywords_instance())]).unwrap();
        assert_eq!(sort.instance_column(), Some(keywords_instance()));
        assert_eq!(sort.projection(), vec![PR_KEYWORDS]);
    }
}
