//! Row index subsystem
//!
//! The index keeps the ordered sequence of row keys of one table together
//! with the cursor, bookmarks and hidden (collapsed) state. The table
//! orchestrator drives it; it never looks at property values, only at the
//! binary sort keys handed to it.
//!
//! # Invariants
//!
//! - Rows order by their sort key sequence, ties broken by `RowKey`
//! - A category row sorts before every row sharing its sort prefix
//! - Cursor and bookmarks follow their row; when the row is deleted or
//!   hidden they slide to the next visible row
//! - Previous-row results always name a visible row

mod memory;
mod sort_key;

use serde::{Deserialize, Serialize};

use crate::errors::TableResult;

pub use memory::MemoryIndex;
pub use sort_key::{binary_sort_key, SortKey};

/// Server object identifier
pub type ObjectId = u32;

/// Unique identity of one table row.
///
/// `order_id` separates the rows a multi-valued column fans an object out
/// into. Category rows use object id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub object_id: ObjectId,
    pub order_id: u32,
}

impl RowKey {
    pub const fn new(object_id: ObjectId, order_id: u32) -> Self {
        Self {
            object_id,
            order_id,
        }
    }

    /// Key of a category row
    pub const fn category(sequence: u32) -> Self {
        Self::new(0, sequence)
    }

    pub const fn is_category(&self) -> bool {
        self.object_id == 0
    }

    /// Eight-byte instance key: object id then order id, little-endian
    pub fn instance_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&self.object_id.to_le_bytes());
        out.extend_from_slice(&self.order_id.to_le_bytes());
        out
    }

    pub fn from_instance_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        let object_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let order_id = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self::new(object_id, order_id))
    }
}

/// What happened to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowAction {
    /// Row is new
    Added,
    /// Row changed in place
    Modified,
    /// Row changed and now follows a different row
    Moved,
    /// Row left the table
    Deleted,
    /// Whole table content must be re-read
    Reload,
}

impl std::fmt::Display for RowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowAction::Added => write!(f, "ADDED"),
            RowAction::Modified => write!(f, "MODIFIED"),
            RowAction::Moved => write!(f, "MOVED"),
            RowAction::Deleted => write!(f, "DELETED"),
            RowAction::Reload => write!(f, "RELOAD"),
        }
    }
}

/// A cursor origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bookmark {
    Beginning,
    Current,
    End,
    /// Bookmark created by `create_bookmark`
    Id(u32),
}

/// Ordered row index with cursor, bookmarks and hidden rows.
pub trait RowIndex: Send {
    /// Insert or reposition a row. Returns the action and the previous
    /// visible row after the update.
    fn update_row(
        &mut self,
        key: RowKey,
        sort_keys: Vec<SortKey>,
        hidden: bool,
    ) -> (RowAction, Option<RowKey>);

    /// Replace one component of an existing row's sort key sequence.
    fn update_partial_sort_key(
        &mut self,
        key: RowKey,
        level: usize,
        component: SortKey,
    ) -> TableResult<(RowAction, Option<RowKey>)>;

    /// Remove a row. Returns false if it was not present.
    fn delete_row(&mut self, key: RowKey) -> bool;

    /// Move the cursor to `bookmark` then `delta` visible rows. Returns rows moved.
    fn seek(&mut self, bookmark: Bookmark, delta: i64) -> TableResult<i64>;

    /// Put the cursor on a visible row
    fn seek_to_row(&mut self, key: RowKey) -> TableResult<()>;

    /// Read up to `count` visible rows from the cursor.
    ///
    /// Forward reads start at the cursor row. Reverse reads return the rows
    /// before the cursor, nearest first.
    fn query_rows(&mut self, count: usize, reverse: bool, advance: bool) -> Vec<RowKey>;

    /// Hide every row under a category's sort prefix; returns rows that became hidden.
    fn hide_rows(&mut self, category: RowKey) -> TableResult<Vec<RowKey>>;

    /// Unhide every row under a category's sort prefix; returns rows that became visible.
    fn unhide_rows(&mut self, category: RowKey) -> TableResult<Vec<RowKey>>;

    /// (visible rows, cursor position)
    fn row_count(&self) -> (usize, usize);

    /// Rows under a category's sort prefix in table order, excluding the category row.
    fn rows_by_sort_prefix(&self, category: RowKey) -> TableResult<Vec<RowKey>>;

    fn create_bookmark(&mut self) -> TableResult<u32>;

    fn free_bookmark(&mut self, id: u32) -> TableResult<()>;

    /// Row at the cursor, if the cursor is on a row
    fn current_row(&self) -> Option<RowKey>;

    fn contains(&self, key: RowKey) -> bool;

    fn is_hidden(&self, key: RowKey) -> Option<bool>;

    fn sort_keys(&self, key: RowKey) -> Option<&[SortKey]>;

    /// Remove all rows, bookmarks and reset the cursor
    fn clear(&mut self);

    /// Number of rows including hidden ones
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
