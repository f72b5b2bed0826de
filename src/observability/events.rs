//! Observable table events
//!
//! Every lifecycle point the table engine logs has a typed event here.

use std::fmt;

use super::logger::Severity;

/// Observable events of a table instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Population
    /// Lazy population started
    PopulateBegin,
    /// Lazy population finished
    PopulateComplete,
    /// Membership and index rebuilt from the loader
    TableReload,
    /// Loader reported the whole table invalid
    TableInvalidated,

    // Restriction and sort
    /// New restriction installed
    RestrictionApplied,
    /// Restriction failed validation or matching
    RestrictionRejected,
    /// New sort order installed
    SortApplied,
    /// Sort order failed validation
    SortRejected,

    // Row pipeline
    /// One row's property fetch failed; row skipped
    RowFetchFailed,
    /// One parent's sub-object resolution failed; parent skipped
    SubObjectFailed,

    // Categories
    /// Category row minted
    CategoryCreated,
    /// Category row released
    CategoryRemoved,
    /// Category aggregate changed and its rows were re-sorted
    MinMaxResort,

    // Navigation
    /// FindRow resolved through the instance key or entry id
    FindRowFastPath,
    /// FindRow scanned rows
    FindRowScan,

    // Notifications
    /// Notification receiver dropped
    NotificationSinkClosed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PopulateBegin => "POPULATE_BEGIN",
            Event::PopulateComplete => "POPULATE_COMPLETE",
            Event::TableReload => "TABLE_RELOAD",
            Event::TableInvalidated => "TABLE_INVALIDATED",

            Event::RestrictionApplied => "RESTRICTION_APPLIED",
            Event::RestrictionRejected => "RESTRICTION_REJECTED",
            Event::SortApplied => "SORT_APPLIED",
            Event::SortRejected => "SORT_REJECTED",

            Event::RowFetchFailed => "ROW_FETCH_FAILED",
            Event::SubObjectFailed => "SUB_OBJECT_FAILED",

            Event::CategoryCreated => "CATEGORY_CREATED",
            Event::CategoryRemoved => "CATEGORY_REMOVED",
            Event::MinMaxResort => "MINMAX_RESORT",

            Event::FindRowFastPath => "FIND_ROW_FAST_PATH",
            Event::FindRowScan => "FIND_ROW_SCAN",

            Event::NotificationSinkClosed => "NOTIFICATION_SINK_CLOSED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::RowFetchFailed
            | Event::SubObjectFailed
            | Event::NotificationSinkClosed
            | Event::RestrictionRejected
            | Event::SortRejected => Severity::Warn,
            Event::CategoryCreated
            | Event::CategoryRemoved
            | Event::MinMaxResort
            | Event::FindRowFastPath
            | Event::FindRowScan => Severity::Trace,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::PopulateBegin,
            Event::PopulateComplete,
            Event::TableReload,
            Event::TableInvalidated,
            Event::RestrictionApplied,
            Event::RestrictionRejected,
            Event::SortApplied,
            Event::SortRejected,
            Event::RowFetchFailed,
            Event::SubObjectFailed,
            Event::CategoryCreated,
            Event::CategoryRemoved,
            Event::MinMaxResort,
            Event::FindRowFastPath,
            Event::FindRowScan,
            Event::NotificationSinkClosed,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_severity() {
        assert_eq!(Event::RowFetchFailed.severity(), Severity::Warn);
        assert_eq!(Event::TableReload.severity(), Severity::Info);
        assert_eq!(Event::MinMaxResort.severity(), Severity::Trace);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::FindRowFastPath), "FIND_ROW_FAST_PATH");
    }
}
