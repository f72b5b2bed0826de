//! In-memory row index
//!
//! Rows live in a `BTreeMap` ordered by (sort key sequence, row key), with a
//! reverse map from row key to its current sort keys. Iteration order is
//! deterministic.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::errors::{TableError, TableResult};

use super::{Bookmark, RowAction, RowIndex, RowKey, SortKey};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    sort_keys: Vec<SortKey>,
    key: RowKey,
}

/// A cursor or bookmark position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Before the first row
    Start,
    /// On a visible row
    Row(RowKey),
    /// After the last row
    End,
}

/// Ordered row index kept entirely in memory.
#[derive(Debug)]
pub struct MemoryIndex {
    /// Ordered rows; value is the hidden flag
    rows: BTreeMap<OrderKey, bool>,
    /// Current sort keys per row
    keys: HashMap<RowKey, Vec<SortKey>>,
    cursor: Position,
    bookmarks: HashMap<u32, Position>,
    next_bookmark: u32,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            keys: HashMap::new(),
            cursor: Position::Start,
            bookmarks: HashMap::new(),
            next_bookmark: 1,
        }
    }

    fn order_key(&self, key: RowKey) -> Option<OrderKey> {
        self.keys.get(&key).map(|sort_keys| OrderKey {
            sort_keys: sort_keys.clone(),
            key,
        })
    }

    fn prev_visible(&self, at: &OrderKey) -> Option<RowKey> {
        self.rows
            .range(..at)
            .rev()
            .find(|(_, hidden)| !**hidden)
            .map(|(ok, _)| ok.key)
    }

    fn next_visible(&self, at: &OrderKey) -> Option<RowKey> {
        self.rows
            .range((Bound::Excluded(at), Bound::Unbounded))
            .find(|(_, hidden)| !**hidden)
            .map(|(ok, _)| ok.key)
    }

    fn first_visible(&self) -> Option<RowKey> {
        self.rows
            .iter()
            .find(|(_, hidden)| !**hidden)
            .map(|(ok, _)| ok.key)
    }

    /// Moves every position on `key` to the next visible row.
    fn relocate(&mut self, key: RowKey) {
        let Some(ok) = self.order_key(key) else {
            return;
        };
        let next = match self.next_visible(&ok) {
            Some(next) => Position::Row(next),
            None => Position::End,
        };
        if self.cursor == Position::Row(key) {
            self.cursor = next;
        }
        for position in self.bookmarks.values_mut() {
            if *position == Position::Row(key) {
                *position = next;
            }
        }
    }

    /// Number of visible rows before a position
    fn position_index(&self, position: Position) -> usize {
        match position {
            Position::Start => 0,
            Position::End => self.visible_count(),
            Position::Row(key) => match self.order_key(key) {
                Some(ok) => self.rows.range(..ok).filter(|(_, hidden)| !**hidden).count(),
                None => 0,
            },
        }
    }

    fn visible_count(&self) -> usize {
        self.rows.values().filter(|hidden| !**hidden).count()
    }

    fn nth_visible(&self, n: usize) -> Option<RowKey> {
        self.rows
            .iter()
            .filter(|(_, hidden)| !**hidden)
            .nth(n)
            .map(|(ok, _)| ok.key)
    }

    fn resolve(&self, bookmark: Bookmark) -> TableResult<Position> {
        match bookmark {
            Bookmark::Beginning => Ok(Position::Start),
            Bookmark::Current => Ok(self.cursor),
            Bookmark::End => Ok(Position::End),
            Bookmark::Id(id) => self
                .bookmarks
                .get(&id)
                .copied()
                .ok_or_else(|| TableError::not_found(format!("bookmark {}", id))),
        }
    }

    /// Order keys strictly under a category's prefix
    fn prefix_rows(&self, category: RowKey) -> TableResult<Vec<OrderKey>> {
        let ok = self
            .order_key(category)
            .ok_or_else(|| TableError::not_found(format!("category {:?}", category)))?;
        Ok(self
            .rows
            .range((Bound::Excluded(&ok), Bound::Unbounded))
            .map(|(row, _)| row)
            .take_while(|row| row.sort_keys.starts_with(&ok.sort_keys))
            .cloned()
            .collect())
    }

    fn insert(&mut self, key: RowKey, sort_keys: Vec<SortKey>, hidden: bool) -> OrderKey {
        let ok = OrderKey {
            sort_keys: sort_keys.clone(),
            key,
        };
        self.keys.insert(key, sort_keys);
        self.rows.insert(ok.clone(), hidden);
        ok
    }
}

impl RowIndex for MemoryIndex {
    fn update_row(
        &mut self,
        key: RowKey,
        sort_keys: Vec<SortKey>,
        hidden: bool,
    ) -> (RowAction, Option<RowKey>) {
        let Some(old) = self.order_key(key) else {
            let ok = self.insert(key, sort_keys, hidden);
            return (RowAction::Added, self.prev_visible(&ok));
        };

        let was_hidden = self.rows.get(&old).copied().unwrap_or(false);
        if hidden && !was_hidden {
            self.relocate(key);
        }

        if old.sort_keys == sort_keys {
            self.rows.insert(old.clone(), hidden);
            return (RowAction::Modified, self.prev_visible(&old));
        }

        let prev_before = self.prev_visible(&old);
        self.rows.remove(&old);
        let ok = self.insert(key, sort_keys, hidden);
        let prev_after = self.prev_visible(&ok);

        if prev_before == prev_after {
            (RowAction::Modified, prev_after)
        } else {
            (RowAction::Moved, prev_after)
        }
    }

    fn update_partial_sort_key(
        &mut self,
        key: RowKey,
        level: usize,
        component: SortKey,
    ) -> TableResult<(RowAction, Option<RowKey>)> {
        let ok = self
            .order_key(key)
            .ok_or_else(|| TableError::not_found(format!("row {:?}", key)))?;
        if level >= ok.sort_keys.len() {
            return Err(TableError::invalid_parameter(format!(
                "sort level {} out of range for row {:?}",
                level, key
            )));
        }
        let hidden = self.rows.get(&ok).copied().unwrap_or(false);
        let mut sort_keys = ok.sort_keys;
        sort_keys[level] = component;
        Ok(self.update_row(key, sort_keys, hidden))
    }

    fn delete_row(&mut self, key: RowKey) -> bool {
        let Some(ok) = self.order_key(key) else {
            return false;
        };
        self.relocate(key);
        self.rows.remove(&ok);
        self.keys.remove(&key);
        true
    }

    fn seek(&mut self, bookmark: Bookmark, delta: i64) -> TableResult<i64> {
        let base = self.resolve(bookmark)?;
        let total = self.visible_count() as i64;
        let from = self.position_index(base) as i64;
        let to = (from + delta).clamp(0, total);

        self.cursor = if to == total {
            Position::End
        } else if to == 0 {
            Position::Start
        } else {
            match self.nth_visible(to as usize) {
                Some(row) => Position::Row(row),
                None => Position::End,
            }
        };
        Ok(to - from)
    }

    fn seek_to_row(&mut self, key: RowKey) -> TableResult<()> {
        match self.is_hidden(key) {
            Some(false) => {
                self.cursor = Position::Row(key);
                Ok(())
            }
            Some(true) => Err(TableError::not_found(format!("row {:?} is hidden", key))),
            None => Err(TableError::not_found(format!("row {:?}", key))),
        }
    }

    fn query_rows(&mut self, count: usize, reverse: bool, advance: bool) -> Vec<RowKey> {
        if count == 0 {
            return Vec::new();
        }

        if reverse {
            let upper = match self.cursor {
                Position::Start => return Vec::new(),
                Position::Row(key) => match self.order_key(key) {
                    Some(ok) => Bound::Excluded(ok),
                    None => Bound::Unbounded,
                },
                Position::End => Bound::Unbounded,
            };
            let rows: Vec<RowKey> = self
                .rows
                .range((Bound::Unbounded, upper))
                .rev()
                .filter(|(_, hidden)| !**hidden)
                .take(count)
                .map(|(ok, _)| ok.key)
                .collect();
            if advance {
                if let Some(last) = rows.last() {
                    self.cursor = Position::Row(*last);
                }
            }
            return rows;
        }

        let lower = match self.cursor {
            Position::Start => Bound::Unbounded,
            Position::Row(key) => match self.order_key(key) {
                Some(ok) => Bound::Included(ok),
                None => Bound::Unbounded,
            },
            Position::End => return Vec::new(),
        };
        let rows: Vec<RowKey> = self
            .rows
            .range((lower, Bound::Unbounded))
            .filter(|(_, hidden)| !**hidden)
            .take(count)
            .map(|(ok, _)| ok.key)
            .collect();
        if advance {
            if let Some(last) = rows.last().and_then(|key| self.order_key(*key)) {
                self.cursor = match self.next_visible(&last) {
                    Some(next) => Position::Row(next),
                    None => Position::End,
                };
            }
        }
        rows
    }

    fn hide_rows(&mut self, category: RowKey) -> TableResult<Vec<RowKey>> {
        let mut hidden = Vec::new();
        for ok in self.prefix_rows(category)? {
            if self.rows.get(&ok) == Some(&false) {
                self.relocate(ok.key);
                self.rows.insert(ok.clone(), true);
                hidden.push(ok.key);
            }
        }
        Ok(hidden)
    }

    fn unhide_rows(&mut self, category: RowKey) -> TableResult<Vec<RowKey>> {
        let mut shown = Vec::new();
        for ok in self.prefix_rows(category)? {
            if self.rows.get(&ok) == Some(&true) {
                self.rows.insert(ok.clone(), false);
                shown.push(ok.key);
            }
        }
        Ok(shown)
    }

    fn row_count(&self) -> (usize, usize) {
        (self.visible_count(), self.position_index(self.cursor))
    }

    fn rows_by_sort_prefix(&self, category: RowKey) -> TableResult<Vec<RowKey>> {
        Ok(self.prefix_rows(category)?.into_iter().map(|ok| ok.key).collect())
    }

    fn create_bookmark(&mut self) -> TableResult<u32> {
        let id = self.next_bookmark;
        self.next_bookmark = self
            .next_bookmark
            .checked_add(1)
            .ok_or_else(|| TableError::invalid_parameter("bookmark ids exhausted"))?;
        let position = match self.cursor {
            Position::Start => match self.first_visible() {
                Some(first) => Position::Row(first),
                None => Position::Start,
            },
            other => other,
        };
        self.bookmarks.insert(id, position);
        Ok(id)
    }

    fn free_bookmark(&mut self, id: u32) -> TableResult<()> {
        self.bookmarks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| TableError::not_found(format!("bookmark {}", id)))
    }

    fn current_row(&self) -> Option<RowKey> {
        match self.cursor {
            Position::Row(key) => Some(key),
            Position::Start => self.first_visible(),
            Position::End => None,
        }
    }

    fn contains(&self, key: RowKey) -> bool {
        self.keys.contains_key(&key)
    }

    fn is_hidden(&self, key: RowKey) -> Option<bool> {
        let ok = self.order_key(key)?;
        self.rows.get(&ok).copied()
    }

    fn sort_keys(&self, key: RowKey) -> Option<&[SortKey]> {
        self.keys.get(&key).map(Vec::as_slice)
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.keys.clear();
        self.bookmarks.clear();
        self.cursor = Position::Start;
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::PropValue;

    fn sk(v: i32) -> SortKey {
        SortKey::encode(Some(&PropValue::Long(v)), false)
    }

    fn row(id: u32) -> RowKey {
        RowKey::new(id, 0)
    }

    fn index_with(values: &[(u32, i32)]) -> MemoryIndex {
        let mut index = MemoryIndex::new();
        for (id, v) in values {
            index.update_row(row(*id), vec![sk(*v)], false);
        }
        index
    }

    #[test]
    fn test_rows_ordered_by_sort_key() {
        let mut index = index_with(&[(1, 30), (2, 10), (3, 20)]);
        let rows = index.query_rows(10, false, true);
        assert_eq!(rows, vec![row(2), row(3), row(1)]);
    }

    #[test]
    fn test_ties_break_by_row_key() {
        let mut index = index_with(&[(9, 5), (3, 5), (6, 5)]);
        assert_eq!(
            index.query_rows(3, false, false),
            vec![row(3), row(6), row(9)]
        );
    }

    #[test]
    fn test_update_reports_previous_row() {
        let mut index = index_with(&[(1, 10), (2, 30)]);
        let (action, prev) = index.update_row(row(3), vec![sk(20)], false);
        assert_eq!(action, RowAction::Added);
        assert_eq!(prev, Some(row(1)));

        let (action, prev) = index.update_row(row(3), vec![sk(40)], false);
        assert_eq!(action, RowAction::Moved);
        assert_eq!(prev, Some(row(2)));

        let (action, _) = index.update_row(row(3), vec![sk(40)], false);
        assert_eq!(action, RowAction::Modified);
    }

    #[test]
    fn test_cursor_advances_and_stops_at_end() {
        let mut index = index_with(&[(1, 1), (2, 2), (3, 3)]);
        assert_eq!(index.query_rows(2, false, true), vec![row(1), row(2)]);
        assert_eq!(index.row_count(), (3, 2));
        assert_eq!(index.query_rows(2, false, true), vec![row(3)]);
        assert!(index.query_rows(2, false, true).is_empty());
    }

    #[test]
    fn test_reverse_query() {
        let mut index = index_with(&[(1, 1), (2, 2), (3, 3)]);
        index.seek(Bookmark::End, 0).unwrap();
        assert_eq!(index.query_rows(2, true, true), vec![row(3), row(2)]);
        assert_eq!(index.current_row(), Some(row(2)));
    }

    #[test]
    fn test_seek_clamps() {
        let mut index = index_with(&[(1, 1), (2, 2), (3, 3)]);
        assert_eq!(index.seek(Bookmark::Beginning, 2).unwrap(), 2);
        assert_eq!(index.current_row(), Some(row(3)));
        assert_eq!(index.seek(Bookmark::Current, 10).unwrap(), 1);
        assert_eq!(index.seek(Bookmark::Current, -10).unwrap(), -3);
        assert_eq!(index.row_count(), (3, 0));
    }

    #[test]
    fn test_cursor_slides_on_delete() {
        let mut index = index_with(&[(1, 1), (2, 2), (3, 3)]);
        index.seek_to_row(row(2)).unwrap();
        assert!(index.delete_row(row(2)));
        assert_eq!(index.current_row(), Some(row(3)));
        assert!(!index.delete_row(row(2)));
    }

    #[test]
    fn test_bookmarks() {
        let mut index = index_with(&[(1, 1), (2, 2), (3, 3)]);
        index.seek(Bookmark::Beginning, 1).unwrap();
        let mark = index.create_bookmark().unwrap();
        index.seek(Bookmark::End, 0).unwrap();
        index.seek(Bookmark::Id(mark), 0).unwrap();
        assert_eq!(index.current_row(), Some(row(2)));

        index.free_bookmark(mark).unwrap();
        assert!(index.seek(Bookmark::Id(mark), 0).is_err());
    }

    #[test]
    fn test_prefix_hide_unhide() {
        let mut index = MemoryIndex::new();
        let cat_x = RowKey::category(1);
        let cat_y = RowKey::category(2);
        let x = SortKey::encode(Some(&PropValue::string("x")), false);
        let y = SortKey::encode(Some(&PropValue::string("y")), false);

        index.update_row(cat_x, vec![x.clone()], false);
        index.update_row(cat_y, vec![y.clone()], false);
        index.update_row(row(1), vec![x.clone(), sk(1)], false);
        index.update_row(row(2), vec![x.clone(), sk(2)], false);
        index.update_row(row(3), vec![y.clone(), sk(1)], false);

        assert_eq!(index.rows_by_sort_prefix(cat_x).unwrap(), vec![row(1), row(2)]);

        let hidden = index.hide_rows(cat_x).unwrap();
        assert_eq!(hidden, vec![row(1), row(2)]);
        assert_eq!(index.row_count().0, 3);
        assert_eq!(
            index.query_rows(10, false, false),
            vec![cat_x, cat_y, row(3)]
        );

        let shown = index.unhide_rows(cat_x).unwrap();
        assert_eq!(shown, vec![row(1), row(2)]);
        assert_eq!(index.row_count().0, 5);
    }

    #[test]
    fn test_partial_sort_key_moves_row() {
        let mut index = MemoryIndex::new();
        index.update_row(row(1), vec![sk(1), sk(100)], false);
        index.update_row(row(2), vec![sk(2), sk(100)], false);

        let (action, prev) = index.update_partial_sort_key(row(1), 0, sk(3)).unwrap();
        assert_eq!(action, RowAction::Moved);
        assert_eq!(prev, Some(row(2)));
        assert!(index.update_partial_sort_key(row(1), 5, sk(0)).is_err());
    }

    #[test]
    fn test_clear() {
        let mut index = index_with(&[(1, 1)]);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.row_count(), (0, 0));
    }
}
