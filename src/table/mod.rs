//! Table subsystem
//!
//! `GenericTable` keeps a live, ordered view over the objects a row loader
//! serves: column projection, sort order with grouping, restriction, cursor
//! and bookmarks, and per-row change notifications.
//!
//! # Invariants
//!
//! - A row is in the index iff its object passed the restriction and the
//!   permission check at its last add or modify
//! - A malformed sort order or restriction leaves the table unchanged
//! - Populate runs at most once per table; reloads swap in a complete view
//! - Notifications are emitted only for rows visible after the change,
//!   except deletions of rows that were visible before it
//! - No two threads mutate the index or the category registry at once

mod loader;
mod notify;
mod row;
mod sort;
mod table;

pub use loader::{AllowAll, DiscardSink, NotificationSink, PermissionCheck, RowLoader};
pub use notify::{ChannelSink, NotificationReceiver, NotificationSender, TableNotification};
pub use row::TableRow;
pub use sort::{SortColumn, SortDirection, SortOrderSet};
pub use table::{ChangeKind, GenericTable, QueryFlags, Table, DEFAULT_COLUMNS};
