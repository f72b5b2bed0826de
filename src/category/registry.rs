//! Arena-backed category registry
//!
//! Categories live in `slots`; freed slots are reused. Two secondary maps
//! find a category by its grouping prefix and by its row key. Leaves are
//! remembered with their owning (deepest) category so removal never needs
//! the leaf's properties again.

use std::collections::{BTreeMap, HashMap};

use crate::index::{RowKey, SortKey};
use crate::props::PropertyBag;

use super::{Category, CategoryChange, CategoryId, CategoryInfo, CategoryLevel, MinMax};

#[derive(Debug, Clone, Copy)]
struct Leaf {
    category: CategoryId,
    unread: bool,
}

/// Category forest of one table view
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    levels: Vec<CategoryLevel>,
    expand_depth: usize,
    slots: Vec<Option<Category>>,
    free: Vec<CategoryId>,
    by_group: BTreeMap<Vec<SortKey>, CategoryId>,
    by_key: HashMap<RowKey, CategoryId>,
    leaves: HashMap<RowKey, Leaf>,
    next_sequence: u32,
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), 0)
    }
}

impl CategoryRegistry {
    /// Registry for the given grouping levels. Categories shallower than
    /// `expand_depth` start expanded.
    pub fn new(levels: Vec<CategoryLevel>, expand_depth: usize) -> Self {
        Self {
            levels,
            expand_depth,
            slots: Vec::new(),
            free: Vec::new(),
            by_group: BTreeMap::new(),
            by_key: HashMap::new(),
            leaves: HashMap::new(),
            next_sequence: 1,
        }
    }

    pub fn levels(&self) -> &[CategoryLevel] {
        &self.levels
    }

    /// Number of grouping levels
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Number of live categories
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: CategoryId) -> Option<&mut Category> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    pub fn id_for_row(&self, key: RowKey) -> Option<CategoryId> {
        self.by_key.get(&key).copied()
    }

    pub fn by_row(&self, key: RowKey) -> Option<&Category> {
        self.id_for_row(key).and_then(|id| self.get(id))
    }

    /// Deepest category of a leaf
    pub fn leaf_category(&self, key: RowKey) -> Option<CategoryId> {
        self.leaves.get(&key).map(|leaf| leaf.category)
    }

    /// Whether a leaf starts hidden: its deepest category is collapsed or hidden
    pub fn leaf_hidden(&self, key: RowKey) -> bool {
        self.leaf_category(key)
            .and_then(|id| self.get(id))
            .map_or(false, Category::hides_children)
    }

    /// Live categories in arena order
    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &Category)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|c| (id, c)))
    }

    /// Grouping components of a row, one per level
    pub fn group_for(&self, row: &PropertyBag) -> Vec<SortKey> {
        self.levels
            .iter()
            .map(|level| level.group_component(row.get(level.tag)))
            .collect()
    }

    /// Index of the aggregate component of `depth` in a row's sort key sequence
    pub fn aggregate_position(&self, depth: usize) -> Option<usize> {
        let level = self.levels.get(depth)?;
        level.aggregate?;
        Some(self.levels[..depth].iter().map(CategoryLevel::width).sum())
    }

    /// Current aggregate component of a category
    pub fn aggregate_component(&self, id: CategoryId) -> Option<SortKey> {
        self.get(id)?.minmax.as_ref().map(MinMax::sort_component)
    }

    /// Effective sort key sequence of a category row. Leaves below it share
    /// this sequence as a prefix.
    pub fn sort_prefix(&self, id: CategoryId) -> Vec<SortKey> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            match self.get(cid) {
                Some(category) => {
                    chain.push(category);
                    current = category.parent;
                }
                None => break,
            }
        }

        let mut out = Vec::new();
        for category in chain.into_iter().rev() {
            if let Some(level) = self.levels.get(category.depth) {
                if level.aggregate.is_some() {
                    out.push(match &category.minmax {
                        Some(minmax) => minmax.sort_component(),
                        None => SortKey::encode(None, false),
                    });
                }
            }
            if let Some(component) = category.group.get(category.depth) {
                out.push(component.clone());
            }
        }
        out
    }

    /// Account a new leaf. An existing leaf is updated instead.
    pub fn add_leaf(&mut self, key: RowKey, row: &PropertyBag, unread: bool) -> CategoryChange {
        if self.leaves.contains_key(&key) {
            return self.update_leaf(key, row, unread);
        }

        let mut change = CategoryChange::default();
        if self.levels.is_empty() {
            return change;
        }

        let mut parent = None;
        let mut group = Vec::with_capacity(self.levels.len());

        for depth in 0..self.levels.len() {
            let level = self.levels[depth];
            group.push(level.group_component(row.get(level.tag)));

            let id = match self.by_group.get(&group) {
                Some(id) => *id,
                None => {
                    let id = self.create(depth, parent, group.clone(), row);
                    change.created.push(id);
                    id
                }
            };
            let created = change.created.contains(&id);

            if let Some(category) = self.get_mut(id) {
                category.leaf_count += 1;
                if unread {
                    category.unread_count += 1;
                }
                if let (Some(minmax), Some(aggregate)) = (category.minmax.as_mut(), level.aggregate)
                {
                    if minmax.add(key, row.get(aggregate.tag).cloned()) && !created {
                        change.resorted.push(id);
                    }
                }
            }
            if !created {
                change.modified.push(id);
            }
            parent = Some(id);
        }

        if let Some(category) = parent {
            self.leaves.insert(key, Leaf { category, unread });
        }
        change
    }

    /// Re-account a leaf whose properties changed. A changed grouping moves
    /// the leaf to another category chain.
    pub fn update_leaf(&mut self, key: RowKey, row: &PropertyBag, unread: bool) -> CategoryChange {
        let leaf = match self.leaves.get(&key) {
            Some(leaf) => *leaf,
            None => return self.add_leaf(key, row, unread),
        };

        let group = self.group_for(row);
        let same_group = self.get(leaf.category).map_or(false, |c| c.group == group);
        if !same_group {
            let mut change = self.remove_leaf(key);
            change.merge(self.add_leaf(key, row, unread));
            return change;
        }

        let mut change = CategoryChange::default();
        let mut resorted = Vec::new();
        let mut current = Some(leaf.category);

        while let Some(id) = current {
            let level_aggregate = self
                .get(id)
                .and_then(|c| self.levels.get(c.depth))
                .and_then(|level| level.aggregate);
            let Some(category) = self.get_mut(id) else {
                break;
            };

            if leaf.unread != unread {
                if unread {
                    category.unread_count += 1;
                } else {
                    category.unread_count = category.unread_count.saturating_sub(1);
                }
                change.modified.push(id);
            }
            if let (Some(minmax), Some(aggregate)) = (category.minmax.as_mut(), level_aggregate) {
                if minmax.replace(key, row.get(aggregate.tag).cloned()) {
                    resorted.push(id);
                }
            }
            current = category.parent;
        }

        resorted.reverse();
        change.resorted = resorted;
        self.leaves.insert(
            key,
            Leaf {
                category: leaf.category,
                unread,
            },
        );
        change
    }

    /// Remove a leaf: counts drop up the parent chain, aggregates sourced
    /// from the leaf are recomputed, empty categories are released.
    pub fn remove_leaf(&mut self, key: RowKey) -> CategoryChange {
        let mut change = CategoryChange::default();
        let leaf = match self.leaves.remove(&key) {
            Some(leaf) => leaf,
            None => return change,
        };

        let mut resorted = Vec::new();
        let mut current = Some(leaf.category);

        while let Some(id) = current {
            let Some(category) = self.get_mut(id) else {
                break;
            };
            category.leaf_count = category.leaf_count.saturating_sub(1);
            if leaf.unread {
                category.unread_count = category.unread_count.saturating_sub(1);
            }
            let aggregate_changed = category
                .minmax
                .as_mut()
                .map_or(false, |minmax| minmax.remove(key));
            let empty = category.leaf_count == 0;
            current = category.parent;

            if empty {
                if let Some(released) = self.release(id) {
                    change.removed.push(released);
                }
            } else {
                if aggregate_changed {
                    resorted.push(id);
                }
                change.modified.push(id);
            }
        }

        resorted.reverse();
        change.resorted = resorted;
        change
    }

    /// Set a category's expanded flag. Returns the previous value.
    pub fn set_expanded(&mut self, id: CategoryId, expanded: bool) -> Option<bool> {
        let category = self.get_mut(id)?;
        Some(std::mem::replace(&mut category.expanded, expanded))
    }

    pub fn set_hidden(&mut self, id: CategoryId, hidden: bool) {
        if let Some(category) = self.get_mut(id) {
            category.hidden = hidden;
        }
    }

    /// Every category below `id`, shallowest first
    pub fn descendants(&self, id: CategoryId) -> Vec<CategoryId> {
        let mut out: Vec<(usize, CategoryId)> = self
            .iter()
            .filter(|(cid, _)| *cid != id && self.is_ancestor(id, *cid))
            .map(|(cid, c)| (c.depth, cid))
            .collect();
        out.sort_unstable();
        out.into_iter().map(|(_, cid)| cid).collect()
    }

    fn is_ancestor(&self, ancestor: CategoryId, id: CategoryId) -> bool {
        let mut current = self.get(id).and_then(|c| c.parent);
        while let Some(cid) = current {
            if cid == ancestor {
                return true;
            }
            current = self.get(cid).and_then(|c| c.parent);
        }
        false
    }

    /// Snapshot of one category
    pub fn info(&self, id: CategoryId) -> Option<CategoryInfo> {
        let category = self.get(id)?;
        Some(CategoryInfo {
            key: category.key,
            depth: category.depth,
            parent: category
                .parent
                .and_then(|p| self.get(p))
                .map(|parent| parent.key),
            values: category.values.iter().map(|(_, v)| v.clone()).collect(),
            leaf_count: category.leaf_count,
            unread_count: category.unread_count,
            expanded: category.expanded,
            hidden: category.hidden,
            aggregate: category.minmax.as_ref().and_then(|m| m.value().cloned()),
        })
    }

    fn create(
        &mut self,
        depth: usize,
        parent: Option<CategoryId>,
        group: Vec<SortKey>,
        row: &PropertyBag,
    ) -> CategoryId {
        let hidden = parent
            .and_then(|p| self.get(p))
            .map_or(false, Category::hides_children);
        let key = RowKey::category(self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

        let values = self.levels[..=depth]
            .iter()
            .map(|level| (level.tag, row.get(level.tag).cloned()))
            .collect();
        let minmax = self.levels[depth]
            .aggregate
            .map(|a| MinMax::new(a.aggregate, a.descending));

        let category = Category {
            key,
            depth,
            parent,
            group: group.clone(),
            values,
            leaf_count: 0,
            unread_count: 0,
            expanded: depth < self.expand_depth,
            hidden,
            minmax,
        };

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(category);
                id
            }
            None => {
                self.slots.push(Some(category));
                self.slots.len() - 1
            }
        };
        self.by_group.insert(group, id);
        self.by_key.insert(key, id);
        id
    }

    fn release(&mut self, id: CategoryId) -> Option<RowKey> {
        let category = self.slots.get_mut(id)?.take()?;
        self.by_group.remove(&category.group);
        self.by_key.remove(&category.key);
        self.free.push(id);
        Some(category.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Aggregate, AggregateColumn};
    use crate::props::tags::{PR_IMPORTANCE, PR_MESSAGE_DELIVERY_TIME, PR_SENDER_NAME};
    use crate::props::PropValue;

    fn by_sender_max_time() -> CategoryRegistry {
        CategoryRegistry::new(
            vec![CategoryLevel {
                tag: PR_SENDER_NAME,
                descending: false,
                aggregate: Some(AggregateColumn {
                    aggregate: Aggregate::Max,
                    tag: PR_MESSAGE_DELIVERY_TIME,
                    descending: true,
                }),
            }],
            1,
        )
    }

    fn message(sender: &str, time: i64) -> PropertyBag {
        PropertyBag::new()
            .with(PR_SENDER_NAME, PropValue::string(sender))
            .with(PR_MESSAGE_DELIVERY_TIME, PropValue::SysTime(time))
    }

    fn leaf(id: u32) -> RowKey {
        RowKey::new(id, 0)
    }

    #[test]
    fn test_first_leaf_creates_category() {
        let mut registry = by_sender_max_time();
        let change = registry.add_leaf(leaf(1), &message("X", 10), true);

        assert_eq!(change.created.len(), 1);
        assert!(change.modified.is_empty());
        let category = registry.get(change.created[0]).unwrap();
        assert_eq!(category.leaf_count, 1);
        assert_eq!(category.unread_count, 1);
        assert!(category.expanded);
        assert!(category.key.is_category());
        assert_eq!(registry.leaf_category(leaf(1)), Some(change.created[0]));
    }

    #[test]
    fn test_max_change_requests_resort() {
        let mut registry = by_sender_max_time();
        let id = registry.add_leaf(leaf(1), &message("X", 10), false).created[0];

        let change = registry.add_leaf(leaf(2), &message("X", 30), false);
        assert_eq!(change.resorted, vec![id]);
        assert_eq!(change.modified, vec![id]);

        let change = registry.add_leaf(leaf(3), &message("X", 20), false);
        assert!(change.resorted.is_empty());
        assert_eq!(
            registry.info(id).unwrap().aggregate,
            Some(PropValue::SysTime(30))
        );
    }

    #[test]
    fn test_remove_source_recomputes_and_releases() {
        let mut registry = by_sender_max_time();
        let id = registry.add_leaf(leaf(1), &message("X", 10), false).created[0];
        registry.add_leaf(leaf(2), &message("X", 30), false);
        registry.add_leaf(leaf(3), &message("X", 20), false);

        let change = registry.remove_leaf(leaf(2));
        assert_eq!(change.resorted, vec![id]);
        assert_eq!(
            registry.info(id).unwrap().aggregate,
            Some(PropValue::SysTime(20))
        );

        registry.remove_leaf(leaf(1));
        let key = registry.get(id).unwrap().key;
        let change = registry.remove_leaf(leaf(3));
        assert_eq!(change.removed, vec![key]);
        assert!(registry.is_empty());
        assert!(registry.by_row(key).is_none());
    }

    #[test]
    fn test_update_moves_leaf_between_categories() {
        let mut registry = by_sender_max_time();
        registry.add_leaf(leaf(1), &message("X", 10), false);
        let change = registry.update_leaf(leaf(1), &message("Y", 10), false);

        assert_eq!(change.removed.len(), 1);
        assert_eq!(change.created.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_read_state_in_place() {
        let mut registry = by_sender_max_time();
        let id = registry.add_leaf(leaf(1), &message("X", 10), true).created[0];
        let change = registry.update_leaf(leaf(1), &message("X", 10), false);

        assert_eq!(change.modified, vec![id]);
        assert!(change.created.is_empty());
        assert_eq!(registry.get(id).unwrap().unread_count, 0);
    }

    #[test]
    fn test_two_levels_and_prefix() {
        let mut registry = CategoryRegistry::new(
            vec![
                CategoryLevel {
                    tag: PR_SENDER_NAME,
                    descending: false,
                    aggregate: None,
                },
                CategoryLevel {
                    tag: PR_IMPORTANCE,
                    descending: true,
                    aggregate: None,
                },
            ],
            1,
        );
        let row = PropertyBag::new()
            .with(PR_SENDER_NAME, PropValue::string("X"))
            .with(PR_IMPORTANCE, PropValue::Long(2));
        let change = registry.add_leaf(leaf(1), &row, false);
        assert_eq!(change.created.len(), 2);

        let (top, inner) = (change.created[0], change.created[1]);
        let inner_category = registry.get(inner).unwrap();
        assert_eq!(inner_category.parent, Some(top));
        // Depth 1 starts collapsed, so its leaves start hidden
        assert!(!inner_category.expanded);
        assert!(registry.leaf_hidden(leaf(1)));
        assert_eq!(registry.sort_prefix(inner).len(), 2);
        assert_eq!(registry.descendants(top), vec![inner]);
    }

    #[test]
    fn test_aggregate_position() {
        let registry = by_sender_max_time();
        assert_eq!(registry.aggregate_position(0), Some(0));
        assert_eq!(registry.aggregate_position(1), None);
    }

    #[test]
    fn test_released_slot_is_reused() {
        let mut registry = by_sender_max_time();
        let first = registry.add_leaf(leaf(1), &message("X", 1), false).created[0];
        registry.remove_leaf(leaf(1));
        let second = registry.add_leaf(leaf(2), &message("Y", 1), false).created[0];
        assert_eq!(first, second);
        assert_ne!(
            registry.get(second).unwrap().key,
            RowKey::category(1),
            "category row keys are never reused"
        );
    }
}
