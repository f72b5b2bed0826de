//! Table metrics
//!
//! - Counters only, monotonic
//! - Relaxed atomics; one registry per table instance

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one table instance
#[derive(Debug, Default)]
pub struct TableMetrics {
    rows_added: AtomicU64,
    rows_deleted: AtomicU64,
    rows_filtered: AtomicU64,
    rows_skipped: AtomicU64,
    categories_created: AtomicU64,
    categories_removed: AtomicU64,
    minmax_resorts: AtomicU64,
    notifications: AtomicU64,
    find_row_fast_path: AtomicU64,
    find_row_scans: AtomicU64,
    reloads: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl TableMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_rows_added, rows_added);
    counter!(increment_rows_deleted, rows_deleted);
    counter!(increment_rows_filtered, rows_filtered);
    counter!(increment_rows_skipped, rows_skipped);
    counter!(increment_categories_created, categories_created);
    counter!(increment_categories_removed, categories_removed);
    counter!(increment_minmax_resorts, minmax_resorts);
    counter!(increment_notifications, notifications);
    counter!(increment_find_row_fast_path, find_row_fast_path);
    counter!(increment_find_row_scans, find_row_scans);
    counter!(increment_reloads, reloads);

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_added: self.rows_added.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            rows_filtered: self.rows_filtered.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            categories_created: self.categories_created.load(Ordering::Relaxed),
            categories_removed: self.categories_removed.load(Ordering::Relaxed),
            minmax_resorts: self.minmax_resorts.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            find_row_fast_path: self.find_row_fast_path.load(Ordering::Relaxed),
            find_row_scans: self.find_row_scans.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of table metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub rows_added: u64,
    pub rows_deleted: u64,
    /// Rows that failed the restriction
    pub rows_filtered: u64,
    /// Rows skipped because their fetch failed
    pub rows_skipped: u64,
    pub categories_created: u64,
    pub categories_removed: u64,
    pub minmax_resorts: u64,
    pub notifications: u64,
    pub find_row_fast_path: u64,
    pub find_row_scans: u64,
    pub reloads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(TableMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_increment() {
        let metrics = TableMetrics::new();
        metrics.increment_rows_added();
        metrics.increment_rows_added();
        metrics.increment_find_row_fast_path();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rows_added, 2);
        assert_eq!(snapshot.find_row_fast_path, 1);
        assert_eq!(snapshot.find_row_scans, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = TableMetrics::new();
        metrics.increment_reloads();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["reloads"], 1);
    }
}
