//! Binary sort keys
//!
//! Each property value encodes to a byte string whose plain byte order is the
//! collation order of the value:
//!
//! - integers: sign bit flipped, big-endian
//! - floats: total-order bits, big-endian
//! - strings: case-folded UTF-8
//! - binaries: raw bytes
//! - absent and error values: a single sentinel byte that sorts after every
//!   real value

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::props::{fold_case, PropValue};

/// Leading byte of every present value
const PRESENT_MARKER: u8 = 0x01;

/// Encoding of an absent (or error) value
const ABSENT_MARKER: u8 = 0xFF;

/// One component of a row's sort key sequence.
///
/// Equality and hashing look at the bytes only; the direction only flips
/// the ordering.
#[derive(Debug, Clone)]
pub struct SortKey {
    bytes: Vec<u8>,
    descending: bool,
}

impl SortKey {
    /// Encode a value (or its absence) for one sort column
    pub fn encode(value: Option<&PropValue>, descending: bool) -> Self {
        Self {
            bytes: binary_sort_key(value),
            descending,
        }
    }

    /// Wrap already encoded bytes
    pub fn from_bytes(bytes: Vec<u8>, descending: bool) -> Self {
        Self { bytes, descending }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// Whether this component stands for an absent value
    pub fn is_absent(&self) -> bool {
        self.bytes == [ABSENT_MARKER]
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SortKey {}

impl Hash for SortKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let ordering = self.bytes.cmp(&other.bytes);
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Byte-comparable encoding of one value, ascending collation.
pub fn binary_sort_key(value: Option<&PropValue>) -> Vec<u8> {
    let value = match value {
        Some(v) if !v.is_error() => v,
        _ => return vec![ABSENT_MARKER],
    };

    let mut out = Vec::with_capacity(16);
    out.push(PRESENT_MARKER);
    encode_payload(value, &mut out);
    out
}

fn encode_payload(value: &PropValue, out: &mut Vec<u8>) {
    match value {
        PropValue::I2(v) => out.extend_from_slice(&((*v as u16) ^ 0x8000).to_be_bytes()),
        PropValue::Long(v) => out.extend_from_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes()),
        PropValue::I8(v) | PropValue::Currency(v) | PropValue::SysTime(v) => {
            out.extend_from_slice(&ordered_i64_bytes(*v))
        }
        PropValue::Float(v) => out.extend_from_slice(&ordered_f64_bytes(f64::from(*v))),
        PropValue::Double(v) | PropValue::AppTime(v) => {
            out.extend_from_slice(&ordered_f64_bytes(*v))
        }
        PropValue::Boolean(v) => out.push(u8::from(*v)),
        PropValue::String(s) => out.extend_from_slice(fold_case(s).as_bytes()),
        PropValue::Binary(b) => out.extend_from_slice(b),
        // Handled by the caller; kept total for exhaustive matching.
        PropValue::Error(_) => out.push(ABSENT_MARKER),
        PropValue::MultiValue(values) => {
            for element in values {
                let mut payload = Vec::new();
                encode_payload(element, &mut payload);
                push_terminated_bytes(out, &payload);
            }
        }
    }
}

const fn ordered_i64_bytes(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1u64 << 63)).to_be_bytes()
}

const fn ordered_f64_bytes(value: f64) -> [u8; 8] {
    let bits = value.to_bits();
    // Negative: flip all bits. Positive: flip sign bit.
    let ordered = if bits & 0x8000_0000_0000_0000 == 0 {
        bits ^ 0x8000_0000_0000_0000
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

// Element payloads are escaped so element boundaries stay unambiguous.
fn push_terminated_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        if byte == 0 {
            out.extend_from_slice(&[0, 0xFF]);
        } else {
            out.push(byte);
        }
    }
    out.extend_from_slice(&[0, 0]);
}
