//! Restriction subsystem
//!
//! Predicate trees, their validation, row matching and sub-restriction
//! resolution.
//!
//! # Invariants
//!
//! - A restriction is validated once, when installed; matching never sees a
//!   tree that failed validation
//! - Operand and column must share a base kind; mismatches are
//!   `InvalidType` and abort the caller's operation
//! - Error values count as absent
//! - Sub-restriction ordinals follow a pre-order walk that does not enter
//!   sub-restriction subtrees; results are computed once per batch

mod ast;
mod compare;
mod evaluator;
mod subrestriction;

pub use ast::{BitmaskOp, ContentFlags, FuzzyLevel, RelOp, Restriction, SubObject};
pub use compare::{compare_strings, compare_values};
pub use evaluator::RowMatcher;
pub use subrestriction::{SubRestrictionResults, SubRestrictionRunner};
