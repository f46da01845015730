//! Physical connection trait

use crate::{NativeStatement, Result, TransactionIsolation};
use async_trait::async_trait;

/// An opaque physical database connection.
///
/// This is the capability set the pool needs from whatever driver sits
/// underneath: statement preparation, transaction demarcation, auto-commit
/// control, and closing. Everything else about the driver is invisible to
/// the pooling layer.
#[async_trait]
pub trait NativeConnection: Send + Sync {
    /// Prepare a statement for the given SQL text
    async fn prepare(&self, sql: &str) -> Result<Box<dyn NativeStatement>>;

    /// Execute a one-off statement, returning whether it produced a result set
    async fn execute(&self, sql: &str) -> Result<bool>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Get the auto-commit mode
    async fn auto_commit(&self) -> Result<bool>;

    /// Set the auto-commit mode
    async fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;

    /// Set the transaction isolation level for subsequent transactions
    async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()>;

    /// Check whether the connection has been closed by the driver or the
    /// server side. May require a driver round trip.
    async fn is_closed(&self) -> Result<bool>;

    /// Close the connection, releasing driver resources
    async fn close(&self) -> Result<()>;
}
