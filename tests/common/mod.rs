//! Shared fixtures for table integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use grouptable::errors::{TableError, TableResult};
use grouptable::index::ObjectId;
use grouptable::props::tags::{
    MSGFLAG_READ, PR_ENTRYID, PR_MESSAGE_DELIVERY_TIME, PR_MESSAGE_FLAGS, PR_OBJECT_ID,
    PR_SENDER_NAME, PR_SUBJECT,
};
use grouptable::props::{PropTag, PropValue, PropertyBag};
use grouptable::restriction::SubObject;
use grouptable::table::{AllowAll, NotificationSink, RowLoader, TableNotification};
use grouptable::{Table, TableConfig};

// =============================================================================
// Row loader
// =============================================================================

/// In-memory object store standing in for the storage layer
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectId, PropertyBag>>,
    children: Mutex<HashMap<(ObjectId, SubObject), Vec<ObjectId>>>,
    /// Recipients and attachments; never listed as table rows
    child_objects: Mutex<HashMap<ObjectId, PropertyBag>>,
    /// Parents whose nested collections cannot be opened
    broken_children: Mutex<HashSet<ObjectId>>,
    /// Objects reported missing when their fan-out is counted
    vanishing: Mutex<HashSet<ObjectId>>,
    fetches: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, id: ObjectId, bag: PropertyBag) {
        let bag = bag.with(PR_OBJECT_ID, PropValue::Long(id as i32));
        self.objects.lock().unwrap().insert(id, bag);
    }

    pub fn remove(&self, id: ObjectId) {
        self.objects.lock().unwrap().remove(&id);
    }

    /// Register child objects of a parent in one nested collection
    pub fn put_children(&self, parent: ObjectId, kind: SubObject, children: Vec<(ObjectId, PropertyBag)>) {
        let ids = children.iter().map(|(id, _)| *id).collect();
        self.child_objects.lock().unwrap().extend(children);
        self.children.lock().unwrap().insert((parent, kind), ids);
    }

    /// Make child resolution of `parent` fail with a database error
    pub fn break_children(&self, parent: ObjectId) {
        self.broken_children.lock().unwrap().insert(parent);
    }

    /// Report `id` as gone when its fan-out is counted, after its
    /// properties were already fetched
    pub fn vanish_on_fan_out(&self, id: ObjectId) {
        self.vanishing.lock().unwrap().insert(id);
    }

    /// Number of `fetch_rows` calls so far
    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

impl RowLoader for MemoryStore {
    fn fetch_rows(
        &self,
        ids: &[ObjectId],
        _tags: &[PropTag],
    ) -> TableResult<Vec<TableResult<PropertyBag>>> {
        *self.fetches.lock().unwrap() += 1;
        let objects = self.objects.lock().unwrap();
        let child_objects = self.child_objects.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                objects
                    .get(id)
                    .or_else(|| child_objects.get(id))
                    .cloned()
                    .ok_or_else(|| TableError::not_found(format!("object {}", id)))
            })
            .collect())
    }

    fn fetch_child_ids(&self, parent: ObjectId, kind: SubObject) -> TableResult<Vec<ObjectId>> {
        if self.broken_children.lock().unwrap().contains(&parent) {
            return Err(TableError::database(format!("children of {}", parent)));
        }
        Ok(self
            .children
            .lock()
            .unwrap()
            .get(&(parent, kind))
            .cloned()
            .unwrap_or_default())
    }

    fn fan_out_count(&self, object_id: ObjectId, tag: PropTag) -> TableResult<u32> {
        if self.vanishing.lock().unwrap().contains(&object_id) {
            return Err(TableError::not_found(format!("object {}", object_id)));
        }
        let objects = self.objects.lock().unwrap();
        let bag = objects
            .get(&object_id)
            .ok_or_else(|| TableError::not_found(format!("object {}", object_id)))?;
        Ok(bag.instance_count(tag))
    }

    fn list_all_object_ids(&self) -> TableResult<Vec<ObjectId>> {
        Ok(self.objects.lock().unwrap().keys().copied().collect())
    }

    fn object_id_for_entry_id(&self, entry_id: &[u8]) -> TableResult<ObjectId> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|(_, bag)| bag.get(PR_ENTRYID).and_then(PropValue::as_binary) == Some(entry_id))
            .map(|(id, _)| *id)
            .ok_or_else(|| TableError::not_found("entry id"))
    }
}

// =============================================================================
// Notification sink
// =============================================================================

/// Sink that records every notification
#[derive(Default)]
pub struct CollectingSink {
    received: Mutex<Vec<TableNotification>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drain everything received so far
    pub fn take(&self) -> Vec<TableNotification> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }
}

impl NotificationSink for CollectingSink {
    fn emit(&self, notification: TableNotification) {
        self.received.lock().unwrap().push(notification);
    }
}

// =============================================================================
// Builders
// =============================================================================

/// A message with subject, sender and delivery time
pub fn message(subject: &str, sender: &str, time: i64) -> PropertyBag {
    PropertyBag::new()
        .with(PR_SUBJECT, PropValue::string(subject))
        .with(PR_SENDER_NAME, PropValue::string(sender))
        .with(PR_MESSAGE_DELIVERY_TIME, PropValue::SysTime(time))
        .with(PR_MESSAGE_FLAGS, PropValue::Long(MSGFLAG_READ))
}

/// Same message, flagged unread
pub fn unread(bag: PropertyBag) -> PropertyBag {
    bag.with(PR_MESSAGE_FLAGS, PropValue::Long(0))
}

pub fn table_over(store: &Arc<MemoryStore>, sink: &Arc<CollectingSink>) -> Table {
    Table::new(
        store.clone(),
        Arc::new(AllowAll),
        sink.clone(),
        TableConfig::default(),
    )
}

/// String values of one column, in row order; missing values are skipped
pub fn strings(rows: &[grouptable::table::TableRow], tag: PropTag) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(tag).and_then(PropValue::as_str).map(str::to_string))
        .collect()
}
