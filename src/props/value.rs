//! Typed property values
//!
//! Closed sum type over every value kind a row can carry. String values are
//! always stored as Rust strings; the 8-bit/unicode distinction lives only
//! in the tag.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tags::{
    PropTag, PT_APPTIME, PT_BINARY, PT_BOOLEAN, PT_CURRENCY, PT_DOUBLE, PT_ERROR, PT_FLOAT,
    PT_I2, PT_I8, PT_LONG, PT_STRING8, PT_SYSTIME, PT_UNICODE,
};

/// Ticks (100ns) between 1601-01-01 and the unix epoch.
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Base kind of a value, independent of the multi-value wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    I2,
    Long,
    Float,
    Double,
    Currency,
    AppTime,
    SysTime,
    I8,
    Boolean,
    String,
    Binary,
    Error,
}

impl ValueKind {
    /// Maps a base property type (no MV flags) to a kind
    pub fn from_prop_type(prop_type: u16) -> Option<Self> {
        match prop_type {
            PT_I2 => Some(ValueKind::I2),
            PT_LONG => Some(ValueKind::Long),
            PT_FLOAT => Some(ValueKind::Float),
            PT_DOUBLE => Some(ValueKind::Double),
            PT_CURRENCY => Some(ValueKind::Currency),
            PT_APPTIME => Some(ValueKind::AppTime),
            PT_SYSTIME => Some(ValueKind::SysTime),
            PT_I8 => Some(ValueKind::I8),
            PT_BOOLEAN => Some(ValueKind::Boolean),
            PT_STRING8 | PT_UNICODE => Some(ValueKind::String),
            PT_BINARY => Some(ValueKind::Binary),
            PT_ERROR => Some(ValueKind::Error),
            _ => None,
        }
    }

    /// Name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::I2 => "PT_I2",
            ValueKind::Long => "PT_LONG",
            ValueKind::Float => "PT_FLOAT",
            ValueKind::Double => "PT_DOUBLE",
            ValueKind::Currency => "PT_CURRENCY",
            ValueKind::AppTime => "PT_APPTIME",
            ValueKind::SysTime => "PT_SYSTIME",
            ValueKind::I8 => "PT_I8",
            ValueKind::Boolean => "PT_BOOLEAN",
            ValueKind::String => "PT_UNICODE",
            ValueKind::Binary => "PT_BINARY",
            ValueKind::Error => "PT_ERROR",
        }
    }
}

/// A property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    I2(i16),
    Long(i32),
    Float(f32),
    Double(f64),
    Currency(i64),
    AppTime(f64),
    /// FILETIME: 100ns ticks since 1601-01-01 UTC
    SysTime(i64),
    I8(i64),
    Boolean(bool),
    String(String),
    Binary(Vec<u8>),
    Error(u32),
    /// Elements all share one scalar kind
    MultiValue(Vec<PropValue>),
}

impl PropValue {
    /// Create a string value
    pub fn string(s: impl Into<String>) -> Self {
        PropValue::String(s.into())
    }

    /// Create a SysTime value from a UTC timestamp
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let micros = at.timestamp_micros();
        PropValue::SysTime(micros * 10 + FILETIME_UNIX_EPOCH)
    }

    /// Convert a SysTime value to a UTC timestamp
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PropValue::SysTime(ticks) => {
                let micros = (ticks - FILETIME_UNIX_EPOCH) / 10;
                DateTime::from_timestamp_micros(micros)
            }
            _ => None,
        }
    }

    /// Base kind; element kind for multi-values, `None` for an empty multi-value
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            PropValue::I2(_) => Some(ValueKind::I2),
            PropValue::Long(_) => Some(ValueKind::Long),
            PropValue::Float(_) => Some(ValueKind::Float),
            PropValue::Double(_) => Some(ValueKind::Double),
            PropValue::Currency(_) => Some(ValueKind::Currency),
            PropValue::AppTime(_) => Some(ValueKind::AppTime),
            PropValue::SysTime(_) => Some(ValueKind::SysTime),
            PropValue::I8(_) => Some(ValueKind::I8),
            PropValue::Boolean(_) => Some(ValueKind::Boolean),
            PropValue::String(_) => Some(ValueKind::String),
            PropValue::Binary(_) => Some(ValueKind::Binary),
            PropValue::Error(_) => Some(ValueKind::Error),
            PropValue::MultiValue(values) => values.first().and_then(PropValue::kind),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PropValue::Error(_))
    }

    pub fn is_multi_valued(&self) -> bool {
        matches!(self, PropValue::MultiValue(_))
    }

    /// Scalar elements: the value itself, or each element of a multi-value
    pub fn elements(&self) -> &[PropValue] {
        match self {
            PropValue::MultiValue(values) => values,
            scalar => std::slice::from_ref(scalar),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            PropValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i32> {
        match self {
            PropValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte length used by SIZE restrictions.
    ///
    /// Multi-values report the sum of their elements, not their count.
    pub fn byte_size(&self) -> usize {
        match self {
            PropValue::I2(_) | PropValue::Boolean(_) => 2,
            PropValue::Long(_) | PropValue::Float(_) | PropValue::Error(_) => 4,
            PropValue::Double(_)
            | PropValue::Currency(_)
            | PropValue::AppTime(_)
            | PropValue::SysTime(_)
            | PropValue::I8(_) => 8,
            PropValue::String(s) => s.len(),
            PropValue::Binary(b) => b.len(),
            PropValue::MultiValue(values) => values.iter().map(PropValue::byte_size).sum(),
        }
    }
}

/// Case folding used for case-insensitive comparison and string sort keys.
pub fn fold_case(input: &str) -> Cow<'_, str> {
    if input.is_ascii() {
        if input.bytes().any(|b| b.is_ascii_uppercase()) {
            return Cow::Owned(input.to_ascii_lowercase());
        }
        return Cow::Borrowed(input);
    }
    Cow::Owned(input.to_lowercase())
}

/// A tagged value: one column of a row, or a restriction operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub tag: PropTag,
    pub value: PropValue,
}

impl Property {
    pub fn new(tag: PropTag, value: PropValue) -> Self {
        Self { tag, value }
    }

    /// Error placeholder for a column that has no value
    pub fn not_found(tag: PropTag) -> Self {
        Self {
            tag: tag.as_error(),
            value: PropValue::Error(super::tags::MAPI_E_NOT_FOUND),
        }
    }
}
