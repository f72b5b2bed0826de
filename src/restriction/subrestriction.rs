//! Sub-restriction resolution
//!
//! A SUB-RESTRICTION matches a parent row when any object in one of its
//! nested collections matches the subtree. Subtrees are resolved once per
//! batch of parents, then the matcher looks the parent up by ordinal.

use std::collections::HashSet;

use crate::errors::TableResult;
use crate::index::ObjectId;
use crate::observability::{log_event, Event};
use crate::props::PropTag;
use crate::table::RowLoader;

use super::ast::{Restriction, SubObject};
use super::evaluator::RowMatcher;

/// Parent ids that matched, indexed by sub-restriction ordinal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubRestrictionResults {
    sets: Vec<HashSet<ObjectId>>,
    /// Parents whose children could not be resolved
    failed: HashSet<ObjectId>,
}

impl SubRestrictionResults {
    pub fn from_sets(sets: Vec<HashSet<ObjectId>>) -> Self {
        Self {
            sets,
            failed: HashSet::new(),
        }
    }

    pub fn get(&self, ordinal: usize) -> Option<&HashSet<ObjectId>> {
        self.sets.get(ordinal)
    }

    /// Whether resolution failed for this parent; such rows are skipped
    pub fn is_failed(&self, parent: ObjectId) -> bool {
        self.failed.contains(&parent)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

struct SubTree {
    object: SubObject,
    matcher: RowMatcher,
    columns: Vec<PropTag>,
}

/// Resolves every sub-restriction of one restriction
pub struct SubRestrictionRunner {
    subtrees: Vec<SubTree>,
}

impl SubRestrictionRunner {
    /// Extract the subtrees of an already validated restriction
    pub fn new(restriction: &Restriction, max_depth: usize) -> TableResult<Self> {
        let subtrees = restriction
            .sub_restrictions()
            .into_iter()
            .map(|(object, subtree)| {
                Ok(SubTree {
                    object,
                    matcher: RowMatcher::new(subtree.clone(), max_depth)?,
                    columns: subtree.columns(),
                })
            })
            .collect::<TableResult<Vec<_>>>()?;
        Ok(Self { subtrees })
    }

    pub fn is_empty(&self) -> bool {
        self.subtrees.is_empty()
    }

    /// Resolve all subtrees for one batch of parents.
    ///
    /// A parent whose children cannot be resolved is logged and recorded as
    /// failed, so the caller skips it. Loader failures that are not
    /// row-level abort the batch.
    pub fn run(
        &self,
        loader: &dyn RowLoader,
        parents: &[ObjectId],
    ) -> TableResult<SubRestrictionResults> {
        let no_nested = SubRestrictionResults::default();
        let mut sets = Vec::with_capacity(self.subtrees.len());
        let mut failed = HashSet::new();

        for subtree in &self.subtrees {
            let mut matched = HashSet::new();

            for &parent in parents {
                let children = match loader.fetch_child_ids(parent, subtree.object) {
                    Ok(children) => children,
                    Err(e) if e.is_row_level() => {
                        let parent_id = parent.to_string();
                        log_event(
                            Event::SubObjectFailed,
                            &[
                                ("code", e.code()),
                                ("object", subtree.object.as_str()),
                                ("parent_id", parent_id.as_str()),
                            ],
                        );
                        failed.insert(parent);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if children.is_empty() {
                    continue;
                }

                for child in loader.fetch_rows(&children, &subtree.columns)? {
                    let row = match child {
                        Ok(row) => row,
                        Err(e) if e.is_row_level() => continue,
                        Err(e) => return Err(e),
                    };
                    if subtree.matcher.matches(&row, &no_nested)? {
                        matched.insert(parent);
                        break;
                    }
                }
            }

            sets.push(matched);
        }

        Ok(SubRestrictionResults { sets, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::errors::TableError;
    use crate::props::tags::{PR_DISPLAY_NAME, PR_EMAIL_ADDRESS};
    use crate::props::{PropValue, PropertyBag};
    use crate::restriction::{ContentFlags, FuzzyLevel};

    /// Parents 1 and 2 have recipients; parent 3 fails resolution.
    struct Children {
        rows: HashMap<ObjectId, PropertyBag>,
    }

    impl Children {
        fn new() -> Self {
            let mut rows = HashMap::new();
            rows.insert(11, PropertyBag::new().with(PR_DISPLAY_NAME, PropValue::string("Alice")));
            rows.insert(12, PropertyBag::new().with(PR_DISPLAY_NAME, PropValue::string("Bob")));
            rows.insert(21, PropertyBag::new().with(PR_EMAIL_ADDRESS, PropValue::string("c@x")));
            Self { rows }
        }
    }

    impl RowLoader for Children {
        fn fetch_rows(
            &self,
            ids: &[ObjectId],
            _tags: &[PropTag],
        ) -> TableResult<Vec<TableResult<PropertyBag>>> {
            Ok(ids
                .iter()
                .map(|id| {
                    self.rows
                        .get(id)
                        .cloned()
                        .ok_or_else(|| TableError::not_found(id.to_string()))
                })
                .collect())
        }

        fn fetch_child_ids(&self, parent: ObjectId, kind: SubObject) -> TableResult<Vec<ObjectId>> {
            match (parent, kind) {
                (1, SubObject::Recipients) => Ok(vec![11, 12]),
                (2, SubObject::Recipients) => Ok(vec![21, 99]),
                (3, _) => Err(TableError::database("child table unavailable")),
                _ => Ok(Vec::new()),
            }
        }

        fn fan_out_count(&self, _object_id: ObjectId, _tag: PropTag) -> TableResult<u32> {
            Ok(1)
        }

        fn list_all_object_ids(&self) -> TableResult<Vec<ObjectId>> {
            Ok(vec![1, 2, 3])
        }
    }

    #[test]
    fn test_runner_collects_matching_parents() {
        let r = Restriction::sub(
            SubObject::Recipients,
            Restriction::content(
                PR_DISPLAY_NAME,
                "bob",
                FuzzyLevel::Full,
                ContentFlags::ignore_case(),
            ),
        );
        let runner = SubRestrictionRunner::new(&r, 16).unwrap();
        let results = runner.run(&Children::new(), &[1, 2, 3, 4]).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0), Some(&HashSet::from([1])));
        assert!(results.is_failed(3));
        assert!(!results.is_failed(1));
        assert!(!results.is_failed(4));
    }

    #[test]
    fn test_runner_one_set_per_subtree() {
        let r = Restriction::Or(vec![
            Restriction::sub(SubObject::Recipients, Restriction::exist(PR_EMAIL_ADDRESS)),
            Restriction::sub(SubObject::Attachments, Restriction::exist(PR_DISPLAY_NAME)),
        ]);
        let runner = SubRestrictionRunner::new(&r, 16).unwrap();
        let results = runner.run(&Children::new(), &[1, 2]).unwrap();

        assert_eq!(results.get(0), Some(&HashSet::from([2])));
        assert_eq!(results.get(1), Some(&HashSet::new()));
    }

    #[test]
    fn test_runner_empty_without_sub_restrictions() {
        let runner = SubRestrictionRunner::new(&Restriction::exist(PR_DISPLAY_NAME), 16).unwrap();
        assert!(runner.is_empty());
        assert!(runner.run(&Children::new(), &[1]).unwrap().is_empty());
    }
}
