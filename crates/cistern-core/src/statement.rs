//! Prepared statement trait

use std::time::Duration;

use crate::Result;
use async_trait::async_trait;

/// Fetch direction hint for a statement's result sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchDirection {
    /// Rows are fetched first to last (the driver default)
    #[default]
    Forward,
    /// Rows are fetched last to first
    Reverse,
    /// No preferred direction
    Unknown,
}

/// A prepared statement owned by a physical connection.
///
/// Covers execution plus the mutable properties a caller can set between
/// executions. The pooling layer tracks property mutations so a statement
/// handed out again from a cache starts from driver defaults.
#[async_trait]
pub trait NativeStatement: Send + Sync {
    /// Execute the statement, returning whether it produced a result set
    async fn execute(&self) -> Result<bool>;

    /// Execute the statement as an update, returning the affected row count
    async fn execute_update(&self) -> Result<u64>;

    /// Add the current parameter set to the batch
    async fn add_batch(&self) -> Result<()>;

    /// Execute the accumulated batch, returning per-command update counts
    async fn execute_batch(&self) -> Result<Vec<u64>>;

    /// Discard the accumulated batch
    async fn clear_batch(&self) -> Result<()>;

    /// Clear bound parameters
    async fn clear_parameters(&self) -> Result<()>;

    /// Clear accumulated warnings
    async fn clear_warnings(&self) -> Result<()>;

    /// Hint the fetch direction for result sets
    async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()>;

    /// Hint how many rows to fetch per driver round trip
    async fn set_fetch_size(&self, rows: u64) -> Result<()>;

    /// Limit the bytes returned per column value (0 means no limit)
    async fn set_max_field_size(&self, bytes: u64) -> Result<()>;

    /// Limit the rows a result set may contain (0 means no limit)
    async fn set_max_rows(&self, rows: u64) -> Result<()>;

    /// Limit how long an execution may run (zero means no limit)
    async fn set_query_timeout(&self, timeout: Duration) -> Result<()>;

    /// Close the statement, releasing driver resources
    async fn close(&self) -> Result<()>;
}
