//! # Table Errors
//!
//! Error taxonomy shared by every table subsystem.
//!
//! Propagation policy:
//! - Malformed restrictions and sort orders abort the whole call and leave
//!   the prior table state untouched.
//! - Row-level failures inside a batch (one row's fetch, one parent's
//!   sub-object resolution) are logged and the row is skipped.

use thiserror::Error;

/// Result type for table operations
pub type TableResult<T> = Result<T, TableError>;

/// Table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Row, category or bookmark is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed call arguments
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Restriction operand and column types disagree
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Restriction too deep or sort order not supported
    #[error("Too complex: {0}")]
    TooComplex(String),

    /// Optional capability not implemented by this collaborator
    #[error("Not supported: {0}")]
    NoSupport(String),

    /// Permission check refused the object
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Row loader failure
    #[error("Database error: {0}")]
    Database(String),

    /// Internal state could not be accessed (poisoned lock)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TableError {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::InvalidParameter(reason.into())
    }

    /// Create an invalid type error
    pub fn invalid_type(reason: impl Into<String>) -> Self {
        Self::InvalidType(reason.into())
    }

    /// Create a too complex error
    pub fn too_complex(reason: impl Into<String>) -> Self {
        Self::TooComplex(reason.into())
    }

    /// Create a database error
    pub fn database(reason: impl Into<String>) -> Self {
        Self::Database(reason.into())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            TableError::NotFound(_) => "TABLE_NOT_FOUND",
            TableError::InvalidParameter(_) => "TABLE_INVALID_PARAMETER",
            TableError::InvalidType(_) => "TABLE_INVALID_TYPE",
            TableError::TooComplex(_) => "TABLE_TOO_COMPLEX",
            TableError::NoSupport(_) => "TABLE_NO_SUPPORT",
            TableError::AccessDenied(_) => "TABLE_ACCESS_DENIED",
            TableError::Database(_) => "TABLE_DATABASE_ERROR",
            TableError::Internal(_) => "TABLE_INTERNAL_ERROR",
        }
    }

    /// Whether a batch may log this error and skip the affected row.
    ///
    /// Restriction and sort errors are never row-level: they abort the call.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            TableError::NotFound(_) | TableError::Database(_) | TableError::AccessDenied(_)
        )
    }
}
