//! Collaborators a table is constructed with
//!
//! The table never reads storage or checks permissions itself; it goes
//! through these traits. Implementations must be thread-safe because one
//! table may be driven from several worker threads.

use crate::errors::{TableError, TableResult};
use crate::index::ObjectId;
use crate::props::{PropTag, PropertyBag};
use crate::restriction::SubObject;

use super::notify::TableNotification;

/// Resolves object ids into property bags.
pub trait RowLoader: Send + Sync {
    /// Fetch `tags` for each object, in the order of `ids`.
    ///
    /// The outer error aborts the batch. A per-row `Err(NotFound)` means the
    /// object disappeared and is handled as a delete; other per-row errors
    /// are logged and the row is skipped.
    fn fetch_rows(
        &self,
        ids: &[ObjectId],
        tags: &[PropTag],
    ) -> TableResult<Vec<TableResult<PropertyBag>>>;

    /// Child objects of `parent` in the given nested collection
    fn fetch_child_ids(&self, parent: ObjectId, kind: SubObject) -> TableResult<Vec<ObjectId>>;

    /// Number of values the object has in a multi-valued column; the object
    /// fans out into that many rows.
    fn fan_out_count(&self, object_id: ObjectId, tag: PropTag) -> TableResult<u32>;

    /// Every object that may appear in the table
    fn list_all_object_ids(&self) -> TableResult<Vec<ObjectId>>;

    /// Resolve an entry id to its object id
    fn object_id_for_entry_id(&self, entry_id: &[u8]) -> TableResult<ObjectId> {
        let _ = entry_id;
        Err(TableError::NoSupport("entry id lookup".into()))
    }
}

/// Capability check consulted before objects are added or modified.
pub trait PermissionCheck: Send + Sync {
    fn can_access(&self, object_id: ObjectId) -> bool;
}

/// Grants access to every object
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn can_access(&self, _object_id: ObjectId) -> bool {
        true
    }
}

/// Receives row change notifications.
///
/// `emit` is called with the table lock held and must not block.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: TableNotification);
}

/// Drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl NotificationSink for DiscardSink {
    fn emit(&self, _notification: TableNotification) {}
}
