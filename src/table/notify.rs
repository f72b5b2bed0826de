//! Row change notifications
//!
//! Delivery is best-effort. A table hands each notification to its sink and
//! moves on; a sink that cannot deliver drops the notification.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::index::{RowAction, RowKey};
use crate::observability::{log_event, Event};

use super::loader::NotificationSink;
use super::row::TableRow;

/// One row change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableNotification {
    pub action: RowAction,
    /// `None` for a reload
    pub key: Option<RowKey>,
    /// Visible row the changed row now follows; `None` at the top
    pub previous: Option<RowKey>,
    /// Projected row for adds and modifications. Deletes, reloads and rows
    /// moved by a category re-sort carry no snapshot.
    pub row: Option<TableRow>,
    pub timestamp: DateTime<Utc>,
}

impl TableNotification {
    pub fn new(
        action: RowAction,
        key: RowKey,
        previous: Option<RowKey>,
        row: Option<TableRow>,
    ) -> Self {
        Self {
            action,
            key: Some(key),
            previous,
            row,
            timestamp: Utc::now(),
        }
    }

    pub fn deleted(key: RowKey) -> Self {
        Self::new(RowAction::Deleted, key, None, None)
    }

    /// Whole table must be re-read
    pub fn reload() -> Self {
        Self {
            action: RowAction::Reload,
            key: None,
            previous: None,
            row: None,
            timestamp: Utc::now(),
        }
    }
}

/// Notification sender of a channel sink
pub type NotificationSender = mpsc::UnboundedSender<TableNotification>;

/// Notification receiver of a channel sink
pub type NotificationReceiver = mpsc::UnboundedReceiver<TableNotification>;

/// Sink forwarding notifications into an unbounded tokio channel
#[derive(Debug)]
pub struct ChannelSink {
    sender: NotificationSender,
    closed: AtomicBool,
}

impl ChannelSink {
    /// Create a sink and the receiver the transport reads from
    pub fn new() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_sender(tx), rx)
    }

    pub fn from_sender(sender: NotificationSender) -> Self {
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the receiver has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, notification: TableNotification) {
        let action = notification.action;
        if self.sender.send(notification).is_err() && !self.closed.swap(true, Ordering::Relaxed) {
            let action = action.to_string();
            log_event(
                Event::NotificationSinkClosed,
                &[("action", action.as_str())],
            );
        }
    }
}
