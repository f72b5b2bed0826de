//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` or `{name}_FAILED` when closed explicitly
//! - Logs `{name}_INCOMPLETE` on drop otherwise (an early `?` return)

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

/// A scope that logs the start and outcome of a table operation
///
/// ```ignore
/// let scope = ObservationScope::new("RELOAD");
/// rebuild()?;              // RELOAD_INCOMPLETE if this returns early
/// scope.complete();        // RELOAD_COMPLETE
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    /// Create a new observation scope. Logs `{name}_BEGIN` immediately.
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a new observation scope whose fields repeat on every line
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        let event = format!("{}_BEGIN", name);
        Logger::info(&event, fields);

        Self {
            name,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    fn field_refs(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as completed, adding `elapsed_ms` and extra fields
    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        let event = format!("{}_COMPLETE", self.name);
        let elapsed = self.started.elapsed().as_millis().to_string();

        let mut all_fields = self.field_refs();
        all_fields.push(("elapsed_ms", elapsed.as_str()));
        all_fields.extend(extra_fields.iter().copied());

        Logger::info(&event, &all_fields);
    }

    /// Mark the scope as failed. Logs `{name}_FAILED` at ERROR level.
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let event = format!("{}_FAILED", self.name);
        let mut all_fields = self.field_refs();
        all_fields.push(("reason", reason));
        Logger::error(&event, &all_fields);
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            let event = format!("{}_INCOMPLETE", self.name);
            Logger::warn(&event, &[("reason", "scope dropped without completion")]);
        }
    }
}
