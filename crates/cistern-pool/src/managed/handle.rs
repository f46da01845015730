//! Caller-facing connection handle

use std::sync::Arc;

use cistern_core::{Result, TransactionIsolation};

use super::connection::ManagedConnection;
use super::statement::ReusableStatement;

/// The connection as application code sees it.
///
/// Operations delegate to the physical connection, with two twists: any
/// failure is reported to the connection's observers before it is returned,
/// and `close` is a logical close that leaves the physical connection open
/// for the pool.
pub struct ConnectionHandle {
    owner: Arc<ManagedConnection>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identifier", &self.owner.identifier())
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn new(owner: Arc<ManagedConnection>) -> Self {
        Self { owner }
    }

    /// Identifier of the managed connection behind this handle.
    pub fn identifier(&self) -> u64 {
        self.owner.identifier()
    }

    /// The managed connection behind this handle.
    pub fn managed(&self) -> &Arc<ManagedConnection> {
        &self.owner
    }

    /// Prepare a statement, going through the connection's reuse cache.
    pub async fn prepare(&self, sql: &str) -> Result<Arc<ReusableStatement>> {
        let result = self.owner.prepare(sql).await;
        self.report(result).await
    }

    /// Execute a one-off statement.
    pub async fn execute(&self, sql: &str) -> Result<bool> {
        let result = self.owner.physical().execute(sql).await;
        self.report(result).await
    }

    /// Commit the driver's current local transaction.
    pub async fn commit(&self) -> Result<()> {
        let result = self.owner.physical().commit().await;
        self.report(result).await
    }

    /// Roll back the driver's current local transaction.
    pub async fn rollback(&self) -> Result<()> {
        let result = self.owner.physical().rollback().await;
        self.report(result).await
    }

    /// Whether the driver commits each statement on its own.
    pub async fn auto_commit(&self) -> Result<bool> {
        let result = self.owner.physical().auto_commit().await;
        self.report(result).await
    }

    /// Switch the driver's auto-commit mode.
    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        let result = self.owner.physical().set_auto_commit(auto_commit).await;
        self.report(result).await
    }

    /// Change the isolation level of the physical connection.
    pub async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()> {
        let result = self.owner.physical().set_transaction_isolation(isolation).await;
        self.report(result).await
    }

    /// Whether the physical connection has been closed underneath us.
    pub async fn is_physically_closed(&self) -> Result<bool> {
        let result = self.owner.physical().is_closed().await;
        self.report(result).await
    }

    /// Logically close the handle.
    ///
    /// The physical connection stays open; the connection's observers
    /// decide whether it goes back to the pool or stays reserved for its
    /// transaction.
    pub async fn close(&self) {
        self.owner.notify_close().await;
    }

    async fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.owner.notify_error(e).await;
        }
        result
    }
}
