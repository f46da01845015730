//! Managed connection wrapper

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cistern_core::{
    CisternError, NativeConnection, Result, Transaction, XaEndFlag, XaError, XaResource, XaResult,
    XaStartFlag, XaVote, Xid,
};
use parking_lot::{Mutex, RwLock};

use super::statement::ReusableStatement;

/// Observer of managed connection events.
///
/// The connection manager implements this to learn when a caller logically
/// closes its handle or when an operation on the handle fails.
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// The caller logically closed its handle to this connection.
    async fn connection_closed(&self, connection: Arc<ManagedConnection>);

    /// An operation on a handle to this connection failed.
    async fn connection_errored(&self, connection: Arc<ManagedConnection>, error: &CisternError);
}

/// A pooled physical connection and everything the pool knows about it.
///
/// The wrapper counts logical opens, remembers which transaction currently
/// owns the connection, carries the two deadlines driving eviction (age and
/// inactivity), and keeps the per-connection prepared statement cache. It
/// is also the resource enlisted with the transaction coordinator:
/// two-phase requests are emulated over the driver's local commit and
/// rollback.
pub struct ManagedConnection {
    /// Identifier unique within the owning factory
    identifier: u64,
    /// The wrapped physical connection
    physical: Arc<dyn NativeConnection>,
    /// Instant after which the connection must not be reused
    death_deadline: Instant,
    /// How long the connection may stay open outside a transaction before
    /// it counts as leaked
    max_open_time: Duration,
    /// Open count, transaction binding, and the inactivity deadline
    state: Mutex<ConnectionState>,
    /// Prepared statement cache keyed by SQL text
    cache: Mutex<StatementCache>,
    /// Parties notified of logical closes and errors
    observers: RwLock<Vec<Weak<dyn ConnectionObserver>>>,
    /// Set once `remove` has run; guards against double destruction
    removed: AtomicBool,
    /// Branch timeout advertised through the resource contract, in seconds
    xa_timeout: AtomicU32,
    /// Handed to statements so close notifications find their way back
    weak_self: Weak<ManagedConnection>,
}

struct ConnectionState {
    /// Number of logical opens not yet closed
    open_count: u32,
    /// Transaction currently owning this connection
    transaction: Option<Arc<dyn Transaction>>,
    /// Re-armed on each hold; meaningful only while the connection is open
    inactivity_deadline: Instant,
}

struct StatementCache {
    /// SQL text to its reusable wrapper
    entries: HashMap<String, Arc<ReusableStatement>>,
    /// Wrappers currently open from the caller's point of view
    open_count: i64,
    /// Bound on cached wrappers; 0 disables caching
    max_size: usize,
    /// Number of times a cached wrapper was handed out again
    reuses: u64,
}

/// An `Instant` far enough away to mean "never" when the configured
/// duration does not fit the clock.
fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManagedConnection")
            .field("identifier", &self.identifier)
            .field("open_count", &state.open_count)
            .field("in_transaction", &state.transaction.is_some())
            .finish()
    }
}

impl ManagedConnection {
    pub(crate) fn new(
        identifier: u64,
        physical: Arc<dyn NativeConnection>,
        max_age: Duration,
        max_open_time: Duration,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new_cyclic(|weak_self| Self {
            identifier,
            physical,
            death_deadline: deadline_after(now, max_age),
            max_open_time,
            state: Mutex::new(ConnectionState {
                open_count: 0,
                transaction: None,
                inactivity_deadline: deadline_after(now, max_open_time),
            }),
            cache: Mutex::new(StatementCache {
                entries: HashMap::new(),
                open_count: 0,
                max_size: 0,
                reuses: 0,
            }),
            observers: RwLock::new(Vec::new()),
            removed: AtomicBool::new(false),
            xa_timeout: AtomicU32::new(0),
            weak_self: weak_self.clone(),
        })
    }

    /// Identifier unique within the owning factory.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub(crate) fn physical(&self) -> &Arc<dyn NativeConnection> {
        &self.physical
    }

    /// Register an observer for close and error notifications.
    pub fn add_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        self.observers.write().push(observer);
    }

    /// Count one more logical open and re-arm the inactivity deadline.
    pub(crate) fn hold(&self) {
        let mut state = self.state.lock();
        state.open_count += 1;
        state.inactivity_deadline = deadline_after(Instant::now(), self.max_open_time);
    }

    /// Count one logical close.
    ///
    /// Returns true when this was the last open and the connection is now
    /// logically closed.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.state.lock();
        if state.open_count == 0 {
            tracing::warn!(identifier = self.identifier, "connection released but it was not open");
            return false;
        }
        state.open_count -= 1;
        state.open_count == 0
    }

    /// Whether at least one logical open is outstanding.
    pub fn is_open(&self) -> bool {
        self.state.lock().open_count > 0
    }

    /// Whether no logical open is outstanding.
    pub fn is_closed(&self) -> bool {
        self.state.lock().open_count == 0
    }

    /// Number of outstanding logical opens.
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    /// Whether the connection has outlived its configured lifetime.
    pub fn is_aged(&self) -> bool {
        self.death_deadline <= Instant::now()
    }

    /// Whether the connection looks leaked: open, owned by no transaction,
    /// and past its inactivity deadline.
    pub fn inactive(&self) -> bool {
        let state = self.state.lock();
        state.transaction.is_none()
            && state.open_count > 0
            && state.inactivity_deadline <= Instant::now()
    }

    /// Bind or unbind the transaction owning this connection.
    pub(crate) fn set_transaction(&self, transaction: Option<Arc<dyn Transaction>>) {
        self.state.lock().transaction = transaction;
    }

    /// Transaction currently owning this connection, if any.
    pub fn transaction(&self) -> Option<Arc<dyn Transaction>> {
        self.state.lock().transaction.clone()
    }

    /// Number of times a cached statement was handed out again.
    pub fn statement_reuses(&self) -> u64 {
        self.cache.lock().reuses
    }

    /// Current bound on the statement cache.
    pub fn statement_cache_size(&self) -> usize {
        self.cache.lock().max_size
    }

    /// Change the bound on the statement cache; 0 disables caching.
    pub fn set_statement_cache_size(&self, max_size: usize) {
        self.cache.lock().max_size = max_size;
    }

    #[cfg(test)]
    pub(crate) fn cached_statements(&self) -> usize {
        self.cache.lock().entries.len()
    }

    #[cfg(test)]
    pub(crate) fn open_statements(&self) -> i64 {
        self.cache.lock().open_count
    }

    /// Ask the driver whether the physical connection is still open.
    pub async fn is_physically_closed(&self) -> Result<bool> {
        self.physical.is_closed().await
    }

    /// Prepare a statement, going through the reuse cache.
    ///
    /// With caching disabled the driver statement is prepared and returned
    /// as-is. Otherwise a cached wrapper for the same SQL is revived when
    /// one exists, and a fresh one is prepared and cached when not.
    pub async fn prepare(&self, sql: &str) -> Result<Arc<ReusableStatement>> {
        {
            let cache = self.cache.lock();
            if cache.max_size == 0 {
                drop(cache);
                let physical = self.physical.prepare(sql).await?;
                return Ok(Arc::new(ReusableStatement::untracked(sql, physical)));
            }
        }

        let hit = self.cache.lock().entries.get(sql).cloned();
        if let Some(statement) = hit {
            if !statement.is_closed() {
                tracing::warn!(
                    identifier = self.identifier,
                    sql,
                    "reusing a prepared statement that is still open"
                );
            }
            statement.reuse().await?;
            let mut cache = self.cache.lock();
            cache.reuses += 1;
            cache.open_count += 1;
            return Ok(statement);
        }

        let physical = self.physical.prepare(sql).await?;
        let statement = Arc::new(ReusableStatement::tracked(
            sql,
            physical,
            self.weak_self.clone(),
        ));
        let mut cache = self.cache.lock();
        cache.open_count += 1;
        cache.entries.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }

    /// A tracked statement was logically closed.
    ///
    /// When the cache is at its bound, the first entry found in closed
    /// state is evicted and physically closed.
    pub(crate) async fn statement_closed(&self) {
        let evicted = {
            let mut cache = self.cache.lock();
            cache.open_count -= 1;
            if cache.entries.len() >= cache.max_size {
                let sql = cache
                    .entries
                    .iter()
                    .find(|(_, statement)| statement.is_closed())
                    .map(|(sql, _)| sql.clone());
                sql.and_then(|sql| cache.entries.remove(&sql))
            } else {
                None
            }
        };
        if let Some(statement) = evicted {
            tracing::debug!(identifier = self.identifier, sql = statement.sql(), "evicting cached statement");
            statement.forget().await;
        }
    }

    /// Logical close of the caller-facing handle.
    ///
    /// Every cached statement still open is forced closed, then the
    /// observers are told so the connection can go back to the pool or
    /// stay reserved for its transaction.
    pub async fn notify_close(&self) {
        {
            let mut cache = self.cache.lock();
            let mut forced = 0;
            for statement in cache.entries.values() {
                if statement.force_close() {
                    forced += 1;
                }
            }
            cache.open_count -= forced;
            if cache.open_count != 0 {
                tracing::warn!(
                    identifier = self.identifier,
                    open_statements = cache.open_count,
                    "statement accounting out of balance at connection close"
                );
                cache.open_count = 0;
            }
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        for observer in self.live_observers() {
            observer.connection_closed(this.clone()).await;
        }
    }

    /// Report a failure on this connection to the observers.
    pub async fn notify_error(&self, error: &CisternError) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        for observer in self.live_observers() {
            observer.connection_errored(this.clone(), error).await;
        }
    }

    fn live_observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Physically close the connection.
    ///
    /// Destroying the same connection twice is an error.
    pub(crate) async fn remove(&self) -> Result<()> {
        if self.removed.swap(true, Ordering::SeqCst) {
            tracing::error!(identifier = self.identifier, "connection removed twice");
            return Err(CisternError::Connection("connection already removed".into()));
        }
        self.cache.lock().entries.clear();
        self.physical.close().await
    }
}

/// Two-phase commit face of the managed connection.
///
/// The drivers underneath only know local transactions, so prepare always
/// votes yes, recovery never returns work, and commit and rollback map to
/// the driver's own commit and rollback. Rolling back while the driver is
/// still in auto-commit mode means the work was already committed; that
/// case reports a heuristic commit.
#[async_trait]
impl XaResource for ManagedConnection {
    fn resource_id(&self) -> u64 {
        self.identifier
    }

    async fn start(&self, xid: &Xid, flag: XaStartFlag) -> XaResult<()> {
        tracing::debug!(identifier = self.identifier, ?xid, ?flag, "xa start");
        Ok(())
    }

    async fn end(&self, xid: &Xid, flag: XaEndFlag) -> XaResult<()> {
        tracing::debug!(identifier = self.identifier, ?xid, ?flag, "xa end");
        Ok(())
    }

    async fn prepare(&self, _xid: &Xid) -> XaResult<XaVote> {
        Ok(XaVote::Ok)
    }

    async fn commit(&self, _xid: &Xid, _one_phase: bool) -> XaResult<()> {
        if let Err(e) = self.physical.commit().await {
            tracing::error!(identifier = self.identifier, error = %e, "cannot commit transaction");
            self.notify_error(&e).await;
            return Err(XaError::resource("commit failed on the physical connection"));
        }
        Ok(())
    }

    async fn rollback(&self, _xid: &Xid) -> XaResult<()> {
        match self.physical.auto_commit().await {
            Ok(true) => {
                tracing::error!(
                    identifier = self.identifier,
                    "rollback requested while auto-commit is on"
                );
                return Err(XaError::heuristic_commit(
                    "work was already committed by auto-commit",
                ));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(identifier = self.identifier, error = %e, "cannot read auto-commit mode");
                self.notify_error(&e).await;
                return Err(XaError::resource("cannot read auto-commit mode"));
            }
        }
        if let Err(e) = self.physical.rollback().await {
            tracing::error!(identifier = self.identifier, error = %e, "cannot rollback transaction");
            self.notify_error(&e).await;
            return Err(XaError::resource("rollback failed on the physical connection"));
        }
        Ok(())
    }

    async fn forget(&self, xid: &Xid) -> XaResult<()> {
        tracing::debug!(identifier = self.identifier, ?xid, "xa forget");
        Ok(())
    }

    async fn recover(&self) -> XaResult<Vec<Xid>> {
        Ok(Vec::new())
    }

    fn transaction_timeout(&self) -> u32 {
        self.xa_timeout.load(Ordering::SeqCst)
    }

    fn set_transaction_timeout(&self, seconds: u32) -> bool {
        self.xa_timeout.store(seconds, Ordering::SeqCst);
        true
    }
}
