//! Reusable prepared statement wrapper

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use cistern_core::{FetchDirection, NativeStatement, Result};

use super::connection::ManagedConnection;

/// A prepared statement that survives its logical close.
///
/// Tracked statements belong to a connection's statement cache: closing one
/// marks it reusable and notifies the owning connection instead of closing
/// the driver statement. Untracked statements exist when caching is
/// disabled and close for real.
///
/// Mutating a statement property marks the wrapper as changed; the next
/// reuse resets every property back to its default before handing the
/// statement out again.
pub struct ReusableStatement {
    /// SQL text this statement was prepared from
    sql: String,
    physical: Box<dyn NativeStatement>,
    /// Owning connection, notified when a tracked statement closes
    owner: Weak<ManagedConnection>,
    /// Whether the owner's cache accounts for this statement
    tracked: bool,
    /// Logically open from the caller's point of view
    opened: AtomicBool,
    /// Mid-close; keeps the cache evictor away while the owner is notified
    closing: AtomicBool,
    /// A mutable property was changed since the last reset
    changed: AtomicBool,
}

impl std::fmt::Debug for ReusableStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReusableStatement")
            .field("sql", &self.sql)
            .field("tracked", &self.tracked)
            .field("opened", &self.opened.load(Ordering::SeqCst))
            .finish()
    }
}

impl ReusableStatement {
    pub(crate) fn tracked(
        sql: &str,
        physical: Box<dyn NativeStatement>,
        owner: Weak<ManagedConnection>,
    ) -> Self {
        Self {
            sql: sql.to_string(),
            physical,
            owner,
            tracked: true,
            opened: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            changed: AtomicBool::new(false),
        }
    }

    pub(crate) fn untracked(sql: &str, physical: Box<dyn NativeStatement>) -> Self {
        Self {
            sql: sql.to_string(),
            physical,
            owner: Weak::new(),
            tracked: false,
            opened: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            changed: AtomicBool::new(false),
        }
    }

    /// SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the statement is logically closed and not mid-close.
    pub fn is_closed(&self) -> bool {
        !self.opened.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }

    /// Close the statement from the caller's point of view.
    ///
    /// A tracked statement stays prepared in its owner's cache; the owner
    /// is notified so it can evict if the cache is over its bound. An
    /// untracked statement closes the driver statement.
    pub async fn close(&self) -> Result<()> {
        if !self.tracked {
            return self.physical.close().await;
        }
        if !self.opened.swap(false, Ordering::SeqCst) {
            tracing::debug!(sql = %self.sql, "statement already closed");
            return Ok(());
        }
        self.closing.store(true, Ordering::SeqCst);
        if let Some(owner) = self.owner.upgrade() {
            owner.statement_closed().await;
        }
        self.closing.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Mark a cached statement open again and restore its defaults.
    ///
    /// Parameters and warnings are always cleared; the heavier property
    /// reset only runs when a property was actually changed.
    pub(crate) async fn reuse(&self) -> Result<()> {
        self.physical.clear_parameters().await?;
        self.physical.clear_warnings().await?;
        self.opened.store(true, Ordering::SeqCst);
        if self.changed.load(Ordering::SeqCst) {
            tracing::debug!(sql = %self.sql, "statement properties were changed, resetting to defaults");
            self.physical.clear_batch().await?;
            self.physical.set_fetch_direction(FetchDirection::Forward).await?;
            self.physical.set_max_field_size(0).await?;
            self.physical.set_max_rows(0).await?;
            self.physical.set_query_timeout(Duration::ZERO).await?;
            self.changed.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Force the logical close of a statement the caller abandoned.
    ///
    /// Returns true if the statement was still open.
    pub(crate) fn force_close(&self) -> bool {
        if self.opened.swap(false, Ordering::SeqCst) {
            tracing::warn!(sql = %self.sql, "statement was not closed explicitly");
            return true;
        }
        false
    }

    /// Physically close an evicted statement.
    pub(crate) async fn forget(&self) {
        if let Err(e) = self.physical.close().await {
            tracing::error!(sql = %self.sql, error = %e, "cannot close evicted statement");
        }
    }

    pub async fn execute(&self) -> Result<bool> {
        self.physical.execute().await
    }

    pub async fn execute_update(&self) -> Result<u64> {
        self.physical.execute_update().await
    }

    pub async fn add_batch(&self) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.add_batch().await
    }

    pub async fn execute_batch(&self) -> Result<Vec<u64>> {
        self.physical.execute_batch().await
    }

    pub async fn clear_batch(&self) -> Result<()> {
        self.physical.clear_batch().await
    }

    pub async fn clear_parameters(&self) -> Result<()> {
        self.physical.clear_parameters().await
    }

    pub async fn clear_warnings(&self) -> Result<()> {
        self.physical.clear_warnings().await
    }

    pub async fn set_fetch_direction(&self, direction: FetchDirection) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.set_fetch_direction(direction).await
    }

    pub async fn set_fetch_size(&self, rows: u64) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.set_fetch_size(rows).await
    }

    pub async fn set_max_field_size(&self, bytes: u64) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.set_max_field_size(bytes).await
    }

    pub async fn set_max_rows(&self, rows: u64) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.set_max_rows(rows).await
    }

    pub async fn set_query_timeout(&self, timeout: Duration) -> Result<()> {
        self.changed.store(true, Ordering::SeqCst);
        self.physical.set_query_timeout(timeout).await
    }
}
