//! Packet-filter capability consumed by the synchronizer
//!
//! Every operation has "ensure" semantics where it mutates: applying it twice
//! leaves the same state as applying it once.

use crate::core::chain::{FilterRule, Table};
use crate::core::error::FilterError;

/// Bridge filter operations
#[allow(async_fn_in_trait)]
pub trait FilterBackend {
    /// Probes the filter subsystem, returning its version.
    async fn version(&self) -> Result<String, FilterError>;

    /// Removes every rule from `chain`. Fails if the chain does not exist.
    async fn flush_chain(&self, table: Table, chain: &str) -> Result<(), FilterError>;

    /// Creates `chain` if absent. Returns `true` if it already existed.
    async fn ensure_chain(&self, table: Table, chain: &str) -> Result<bool, FilterError>;

    /// Inserts `rule` at its position if absent. Returns `true` if it already existed.
    async fn ensure_rule(&self, rule: &FilterRule) -> Result<bool, FilterError>;
}

impl<T: FilterBackend> FilterBackend for &T {
    async fn version(&self) -> Result<String, FilterError> {
        (**self).version().await
    }

    async fn flush_chain(&self, table: Table, chain: &str) -> Result<(), FilterError> {
        (**self).flush_chain(table, chain).await
    }

    async fn ensure_chain(&self, table: Table, chain: &str) -> Result<bool, FilterError> {
        (**self).ensure_chain(table, chain).await
    }

    async fn ensure_rule(&self, rule: &FilterRule) -> Result<bool, FilterError> {
        (**self).ensure_rule(rule).await
    }
}
