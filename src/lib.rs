//! grouptable - Live, incrementally-updated table views for a groupware server
//!
//! A table keeps an ordered view over the objects of a row loader: a
//! column projection, a sort order that may group rows into categories with
//! running min/max aggregates, a restriction, and a cursor with bookmarks.
//! Membership changes are applied incrementally and reported per row.

pub mod category;
pub mod config;
pub mod errors;
pub mod index;
pub mod observability;
pub mod props;
pub mod restriction;
pub mod table;

pub use config::TableConfig;
pub use errors::{TableError, TableResult};
pub use index::{Bookmark, ObjectId, RowAction, RowKey};
pub use table::{ChangeKind, GenericTable, QueryFlags, SortColumn, SortDirection, Table};
