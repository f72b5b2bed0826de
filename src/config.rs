//! Table configuration
//!
//! Limits applied by the row pipeline. Set once at table construction;
//! category depth and expand depth are options of `set_sort_order`, and the
//! output string flavor can be switched with `set_unicode_output`.

/// Default number of objects fetched per batch when no sub-restriction is active.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Batch cap while a restriction with sub-restrictions is active.
pub const DEFAULT_SUB_RESTRICTION_BATCH_SIZE: usize = 20;

/// Maximum nesting of restriction nodes.
pub const DEFAULT_MAX_RESTRICTION_DEPTH: usize = 16;

/// Configuration for a table instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Objects per loader fetch when the restriction has no sub-restrictions.
    pub batch_size: usize,
    /// Objects per loader fetch when sub-restrictions must be resolved.
    pub sub_restriction_batch_size: usize,
    /// Restriction trees deeper than this are rejected as too complex.
    pub max_restriction_depth: usize,
    /// Report string columns as unicode (otherwise as 8-bit strings).
    pub unicode_output: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sub_restriction_batch_size: DEFAULT_SUB_RESTRICTION_BATCH_SIZE,
            max_restriction_depth: DEFAULT_MAX_RESTRICTION_DEPTH,
            unicode_output: true,
        }
    }
}

impl TableConfig {
    /// Config reporting string columns with the legacy 8-bit type.
    pub fn legacy_strings() -> Self {
        Self {
            unicode_output: false,
            ..Self::default()
        }
    }

    /// Override both batch caps.
    pub fn with_batch_sizes(mut self, batch_size: usize, sub_restriction_batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.sub_restriction_batch_size = sub_restriction_batch_size.max(1);
        self
    }

    /// Batch cap for the current restriction.
    pub fn batch_size_for(&self, has_sub_restrictions: bool) -> usize {
        if has_sub_restrictions {
            self.sub_restriction_batch_size
        } else {
            self.batch_size
        }
    }
}
