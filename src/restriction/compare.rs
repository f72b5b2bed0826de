//! Value comparison for restriction matching
//!
//! Both sides must share a base kind; string flavors are already unified by
//! `PropValue`. Case folding applies to strings only.

use std::cmp::Ordering;

use crate::errors::{TableError, TableResult};
use crate::props::{fold_case, PropValue};

/// Compare a row value with an operand of the same kind.
///
/// Multi-values compare element-wise, then by length.
pub fn compare_values(a: &PropValue, b: &PropValue, ignore_case: bool) -> TableResult<Ordering> {
    use PropValue::*;

    let ordering = match (a, b) {
        (I2(x), I2(y)) => x.cmp(y),
        (Long(x), Long(y)) => x.cmp(y),
        (I8(x), I8(y)) | (Currency(x), Currency(y)) | (SysTime(x), SysTime(y)) => x.cmp(y),
        (Float(x), Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Double(x), Double(y)) | (AppTime(x), AppTime(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (String(x), String(y)) => compare_strings(x, y, ignore_case),
        (Binary(x), Binary(y)) => x.as_slice().cmp(y.as_slice()),
        (MultiValue(xs), MultiValue(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                let ordering = compare_values(x, y, ignore_case)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => return Err(type_mismatch(a, b)),
    };
    Ok(ordering)
}

/// String comparison, folded when `ignore_case` is set
pub fn compare_strings(a: &str, b: &str, ignore_case: bool) -> Ordering {
    if ignore_case {
        fold_case(a).cmp(&fold_case(b))
    } else {
        a.cmp(b)
    }
}

pub(crate) fn type_mismatch(a: &PropValue, b: &PropValue) -> TableError {
    let name = |v: &PropValue| v.kind().map(|k| k.as_str()).unwrap_or("empty multi-value");
    TableError::invalid_type(format!("cannot compare {} with {}", name(a), name(b)))
}
