//! Structured JSON logger
//!
//! - One log line = one JSON object
//! - `event` first, `severity` second, remaining fields sorted by key
//! - Synchronous, no buffering
//! - Write failures are swallowed; logging never fails a table operation

use std::fmt;
use std::io::{self, Write};

use super::events::Event;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-row detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Row skipped, sink closed, other recoverable issues
    Warn = 2,
    /// Operation aborted
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured logger that outputs JSON lines
pub struct Logger;

impl Logger {
    /// Log an event name with the given severity and fields.
    ///
    /// INFO and below go to stdout, WARN and ERROR to stderr.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if severity >= Severity::Warn {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, event, fields, &mut io::stdout());
        }
    }

    /// Log a typed table event at its default severity
    pub fn event(event: Event, fields: &[(&str, &str)]) {
        Self::log(event.severity(), event.as_str(), fields);
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let line = Self::format_line(severity, event, fields);
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    fn format_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut output = String::with_capacity(128);

        output.push_str("{\"event\":\"");
        Self::escape_json_string(&mut output, event);
        output.push_str("\",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted_fields {
            output.push_str(",\"");
            Self::escape_json_string(&mut output, key);
            output.push_str("\":\"");
            Self::escape_json_string(&mut output, value);
            output.push('"');
        }

        output.push_str("}\n");
        output
    }

    fn escape_json_string(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }

    /// Log at TRACE level
    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}

#[cfg(test)]
pub(crate) fn capture_log(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn test_log_json_format() {
        let output = capture_log(Severity::Info, "TABLE_RELOAD", &[("rows", "12")]);

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["event"], "TABLE_RELOAD");
        assert_eq!(parsed["severity"], "INFO");
        assert_eq!(parsed["rows"], "12");
    }

    #[test]
    fn test_log_deterministic_ordering() {
        let output1 = capture_log(
            Severity::Warn,
            "ROW_FETCH_FAILED",
            &[("object_id", "7"), ("code", "TABLE_DATABASE_ERROR")],
        );
        let output2 = capture_log(
            Severity::Warn,
            "ROW_FETCH_FAILED",
            &[("code", "TABLE_DATABASE_ERROR"), ("object_id", "7")],
        );
        assert_eq!(output1, output2);

        let code_pos = output1.find("\"code\"").unwrap();
        let object_pos = output1.find("\"object_id\"").unwrap();
        assert!(code_pos < object_pos);
    }

    #[test]
    fn test_log_escapes_special_chars() {
        let output = capture_log(
            Severity::Error,
            "RESTRICTION_REJECTED",
            &[("reason", "operand \"x\"\nis PT_LONG")],
        );

        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["reason"], "operand \"x\"\nis PT_LONG");
        assert_eq!(output.chars().filter(|c| *c == '\n').count(), 1);
    }

    #[test]
    fn test_log_event_first() {
        let output = capture_log(Severity::Info, "POPULATE_BEGIN", &[("a", "1")]);
        let event_pos = output.find("\"event\"").unwrap();
        let severity_pos = output.find("\"severity\"").unwrap();
        let field_pos = output.find("\"a\"").unwrap();
        assert!(event_pos < severity_pos);
        assert!(severity_pos < field_pos);
    }
}
