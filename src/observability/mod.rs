//! Observability subsystem
//!
//! - Structured JSON logging
//! - Typed table lifecycle events
//! - Per-table counters
//!
//! # Principles
//!
//! 1. Observability is read-only: it never changes table state
//! 2. Logging never fails the caller
//! 3. No background threads

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, TableMetrics};
pub use scope::ObservationScope;

/// Log a table event with fields at the event's severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::event(event, fields);
}
