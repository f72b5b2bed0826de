//! Property vocabulary for table rows
//!
//! Tags, typed values and per-row property bags. The table engine only reads
//! these; rows are produced by the row loader.
//!
//! # Conventions
//!
//! - 8-bit and unicode string types are one logical type (`ValueKind::String`)
//! - `PropValue::Error` is treated as an absent value everywhere
//! - Multi-valued values hold elements of a single scalar kind

mod bag;
pub mod tags;
mod value;

pub use bag::PropertyBag;
pub use tags::PropTag;
pub use value::{fold_case, PropValue, Property, ValueKind};
