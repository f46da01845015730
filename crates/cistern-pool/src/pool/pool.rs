//! Core connection pool

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cistern_core::{CisternError, Credentials, Result};
use tokio::sync::{Mutex, Notify};

use crate::listener::{NoopListener, PoolLifecycleListener};
use crate::managed::ManagedConnection;

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Aged connections destroyed per adjustment pass, so one pass cannot
/// stall the pool by closing everything at once.
const AGED_REMOVALS_PER_ADJUST: usize = 10;

/// Factory trait the pool uses to create, validate, and destroy managed
/// connections.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    /// Open a new managed connection.
    async fn create(&self, credentials: &Credentials) -> Result<Arc<ManagedConnection>>;

    /// Check whether a pooled connection is still usable.
    ///
    /// The default implementation accepts every connection.
    async fn validate(&self, _connection: &Arc<ManagedConnection>) -> bool {
        true
    }

    /// Physically close a connection, swallowing close errors.
    async fn destroy(&self, connection: &Arc<ManagedConnection>);
}

#[async_trait]
impl<F: PoolFactory> PoolFactory for Arc<F> {
    async fn create(&self, credentials: &Credentials) -> Result<Arc<ManagedConnection>> {
        (**self).create(credentials).await
    }

    async fn validate(&self, connection: &Arc<ManagedConnection>) -> bool {
        (**self).validate(connection).await
    }

    async fn destroy(&self, connection: &Arc<ManagedConnection>) {
        (**self).destroy(connection).await
    }
}

struct PoolState {
    /// Every connection currently opened by this pool
    connections: Vec<Arc<ManagedConnection>>,
    /// Free connections, keyed for fewest-reuses-then-lowest-id dequeue
    available: BTreeMap<(u64, u64), Arc<ManagedConnection>>,
}

/// One occupied waiter slot.
///
/// The slot is given back on drop, so a `get` future abandoned while
/// parked (a caller-side timeout, a task abort) cannot consume it
/// forever.
struct WaiterSlot<'a> {
    count: &'a AtomicUsize,
}

impl<'a> WaiterSlot<'a> {
    fn acquire(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PoolState {
    fn pop_best_available(&mut self) -> Option<Arc<ManagedConnection>> {
        self.available.pop_first().map(|(_, connection)| connection)
    }

    fn push_available(&mut self, connection: Arc<ManagedConnection>) {
        // Dequeue order prefers the fewest statement reuses, then the
        // lowest identifier. Note this favors connections with the
        // coldest statement caches.
        let key = (connection.statement_reuses(), connection.identifier());
        self.available.insert(key, connection);
    }

    fn remove_member(&mut self, identifier: u64) {
        self.connections.retain(|c| c.identifier() != identifier);
    }

    fn is_member(&self, identifier: u64) -> bool {
        self.connections.iter().any(|c| c.identifier() == identifier)
    }

    fn busy(&self) -> usize {
        self.connections.len() - self.available.len()
    }
}

/// A bounded pool of managed connections with a waiter queue.
///
/// `get` hands out a free connection when one passes validation, opens a
/// new one while under the occupancy bound, and otherwise parks the caller
/// until a connection frees up or the waiter timeout expires. Sizing knobs
/// can be changed while the pool is running.
pub struct ManagedConnectionPool {
    factory: Arc<dyn PoolFactory>,
    /// Membership, the free list, and the waiter count, guarded together
    state: Mutex<PoolState>,
    /// Wakes waiters when a connection frees up or capacity grows
    freed: Notify,
    /// Callers currently blocked in `get`; kept outside the state lock so
    /// a cancelled waiter can give its slot back from a `Drop`
    current_waiters: AtomicUsize,
    /// Number of connections to keep ready
    pool_min: AtomicUsize,
    /// Bound on open connections; `None` means unlimited
    pool_max: parking_lot::Mutex<Option<usize>>,
    /// How long a caller may wait for a free connection
    waiter_timeout: parking_lot::Mutex<Duration>,
    /// How many callers may wait at the same time
    max_waiters: AtomicUsize,
    /// Statement cache bound pushed to connections at checkout
    statement_cache_size: AtomicUsize,
    /// Lifecycle listener; must not block
    listener: parking_lot::RwLock<Arc<dyn PoolLifecycleListener>>,
}

impl std::fmt::Debug for ManagedConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnectionPool")
            .field("pool_min", &self.pool_min.load(Ordering::SeqCst))
            .field("pool_max", &*self.pool_max.lock())
            .finish()
    }
}

impl ManagedConnectionPool {
    pub fn new<F: PoolFactory>(config: PoolConfig, factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            state: Mutex::new(PoolState {
                connections: Vec::new(),
                available: BTreeMap::new(),
            }),
            freed: Notify::new(),
            current_waiters: AtomicUsize::new(0),
            pool_min: AtomicUsize::new(config.pool_min()),
            pool_max: parking_lot::Mutex::new(config.pool_max()),
            waiter_timeout: parking_lot::Mutex::new(config.waiter_timeout()),
            max_waiters: AtomicUsize::new(config.max_waiters()),
            statement_cache_size: AtomicUsize::new(config.statement_cache_size()),
            listener: parking_lot::RwLock::new(Arc::new(NoopListener)),
        }
    }

    /// Replace the lifecycle listener.
    pub fn set_listener(&self, listener: Arc<dyn PoolLifecycleListener>) {
        *self.listener.write() = listener;
    }

    /// Bring the pool up to its configured minimum.
    pub async fn start(&self) {
        tracing::debug!(
            pool_min = self.pool_min.load(Ordering::SeqCst),
            "starting connection pool"
        );
        self.adjust().await;
    }

    /// Destroy every connection and empty the pool.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let free = state.available.len();
        state.available.clear();
        let members = std::mem::take(&mut state.connections);
        if members.len() > free {
            tracing::warn!(
                busy = members.len() - free,
                "stopping the pool while connections are checked out"
            );
        }
        for connection in &members {
            self.factory.destroy(connection).await;
            self.listener.read().connection_destroyed(connection.identifier());
        }
        self.notify_busy(&state);
        tracing::debug!(destroyed = members.len(), "connection pool stopped");
    }

    /// Get a connection from the pool.
    ///
    /// Preference order: a free connection (fewest statement reuses
    /// first), then a newly opened one while under the occupancy bound,
    /// then waiting for another caller to free one. Free connections that
    /// fail validation are destroyed and retried without the caller ever
    /// seeing the failure. Waiting is bounded by the waiter timeout and by
    /// the waiter-slot budget; a creation failure is returned as-is.
    #[tracing::instrument(skip_all)]
    pub async fn get(&self, credentials: &Credentials) -> Result<Arc<ManagedConnection>> {
        let mut state = self.state.lock().await;
        // Set when this caller first starts waiting; rejection taxonomy
        // and listener reporting both key off the time elapsed since then.
        let mut wait_started: Option<Instant> = None;

        let connection = loop {
            if let Some(candidate) = state.pop_best_available() {
                if self.factory.validate(&candidate).await {
                    self.listener.read().connection_validated(candidate.identifier());
                    break candidate;
                }
                tracing::warn!(
                    identifier = candidate.identifier(),
                    "destroying non-valid connection"
                );
                state.remove_member(candidate.identifier());
                self.factory.destroy(&candidate).await;
                self.listener.read().connection_destroyed(candidate.identifier());
                continue;
            }

            let at_capacity = self
                .pool_max
                .lock()
                .is_some_and(|max| state.connections.len() >= max);
            if !at_capacity {
                let created = match self.factory.create(credentials).await {
                    Ok(created) => created,
                    Err(e) => {
                        if let Some(started) = wait_started {
                            self.listener.read().waiter_stop_waiting(started.elapsed(), false);
                        }
                        self.listener.read().waiter_rejected_failure();
                        self.notify_busy(&state);
                        return Err(e);
                    }
                };
                state.connections.push(created.clone());
                self.listener.read().connection_created(created.identifier());
                break created;
            }

            let timeout = *self.waiter_timeout.lock();
            let remaining = match wait_started {
                None => timeout,
                Some(started) => timeout.saturating_sub(started.elapsed()),
            };
            let may_wait = !remaining.is_zero()
                && self.current_waiters.load(Ordering::SeqCst)
                    < self.max_waiters.load(Ordering::SeqCst);

            if !may_wait {
                let timed_out = wait_started.is_some() && remaining.is_zero();
                if let Some(started) = wait_started {
                    self.listener.read().waiter_stop_waiting(started.elapsed(), timed_out);
                }
                let error = if timed_out {
                    let waited_ms = wait_started
                        .map(|started| started.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    self.listener.read().waiter_rejected_timeout();
                    tracing::warn!(
                        waited_ms,
                        opened = state.connections.len(),
                        "no connection freed before the waiter timeout"
                    );
                    CisternError::PoolTimeout { waited_ms }
                } else {
                    self.listener.read().waiter_rejected_overflow();
                    tracing::warn!(
                        opened = state.connections.len(),
                        waiters = self.current_waiters.load(Ordering::SeqCst),
                        "pool at capacity and no waiter slot available"
                    );
                    CisternError::PoolOverflow
                };
                return Err(error);
            }

            if wait_started.is_none() {
                wait_started = Some(Instant::now());
                self.listener.read().waiter_start_waiting();
            }
            let slot = WaiterSlot::acquire(&self.current_waiters);

            // Arm the notification before releasing the lock so a release
            // happening in between cannot be missed.
            let notified = self.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(state);

            let _ = tokio::time::timeout(remaining, notified).await;
            drop(slot);

            state = self.state.lock().await;
            // Woken or timed out, go around and look at the live state:
            // wake-ups are single-target and a racing caller may have won.
        };

        if let Some(started) = wait_started {
            self.listener.read().waiter_stop_waiting(started.elapsed(), false);
        }
        connection.set_statement_cache_size(self.statement_cache_size.load(Ordering::SeqCst));
        self.notify_busy(&state);
        tracing::debug!(identifier = connection.identifier(), "connection checked out");
        Ok(connection)
    }

    /// Return a connection to the free list and wake one waiter.
    ///
    /// Connections the pool does not know are refused; releasing an
    /// already-discarded connection must not resurrect it.
    pub async fn release(&self, connection: &Arc<ManagedConnection>) {
        let mut state = self.state.lock().await;
        if !state.is_member(connection.identifier()) {
            tracing::warn!(
                identifier = connection.identifier(),
                "released connection is not a pool member"
            );
            return;
        }
        state.push_available(connection.clone());
        self.freed.notify_one();
        self.notify_busy(&state);
        tracing::debug!(
            identifier = connection.identifier(),
            free = state.available.len(),
            "connection released"
        );
    }

    /// Drop a connection from the pool entirely and destroy it.
    ///
    /// Occupancy decreases, so one waiter is woken to retry.
    pub async fn discard(&self, connection: &Arc<ManagedConnection>) {
        let mut state = self.state.lock().await;
        state.remove_member(connection.identifier());
        state
            .available
            .retain(|_, c| c.identifier() != connection.identifier());
        self.factory.destroy(connection).await;
        self.listener.read().connection_destroyed(connection.identifier());
        self.freed.notify_one();
        self.notify_busy(&state);
        tracing::debug!(identifier = connection.identifier(), "connection discarded");
    }

    /// One adjustment pass.
    ///
    /// Destroys a bounded batch of aged free connections, reclaims leaked
    /// connections that sat open outside any transaction past their
    /// inactivity deadline, shrinks the pool when it is over its bound,
    /// and finally opens connections until the minimum is reached.
    pub async fn adjust(&self) {
        let mut state = self.state.lock().await;

        let aged: Vec<Arc<ManagedConnection>> = state
            .available
            .values()
            .filter(|c| c.is_aged())
            .take(AGED_REMOVALS_PER_ADJUST)
            .cloned()
            .collect();
        for connection in aged {
            tracing::debug!(identifier = connection.identifier(), "removing aged connection");
            state
                .available
                .retain(|_, c| c.identifier() != connection.identifier());
            state.remove_member(connection.identifier());
            self.factory.destroy(&connection).await;
            self.listener.read().connection_destroyed(connection.identifier());
        }

        let leaked: Vec<Arc<ManagedConnection>> = state
            .connections
            .iter()
            .filter(|c| c.inactive())
            .cloned()
            .collect();
        for connection in leaked {
            tracing::warn!(
                identifier = connection.identifier(),
                "closing a connection its caller lost"
            );
            state.remove_member(connection.identifier());
            self.factory.destroy(&connection).await;
            self.listener.read().connection_destroyed(connection.identifier());
            self.freed.notify_one();
        }

        loop {
            let over_bound = self
                .pool_max
                .lock()
                .is_some_and(|max| state.connections.len() > max);
            if !over_bound {
                break;
            }
            // Destroy from the back of the dequeue order, keeping the
            // connections `get` would prefer.
            let Some((_, connection)) = state.available.pop_last() else {
                break;
            };
            tracing::debug!(identifier = connection.identifier(), "shrinking pool over its bound");
            state.remove_member(connection.identifier());
            self.factory.destroy(&connection).await;
            self.listener.read().connection_destroyed(connection.identifier());
        }

        // A minimum above the bound grows to the bound, never past it
        let target_min = {
            let pool_min = self.pool_min.load(Ordering::SeqCst);
            self.pool_max.lock().map_or(pool_min, |max| pool_min.min(max))
        };
        while state.connections.len() < target_min {
            let created = match self.factory.create(&Credentials::default_account()).await {
                Ok(created) => created,
                Err(e) => {
                    tracing::error!(error = %e, "cannot grow the pool to its minimum");
                    break;
                }
            };
            self.listener.read().connection_created(created.identifier());
            state.connections.push(created.clone());
            state.push_available(created);
        }

        self.notify_busy(&state);
    }

    /// Number of connections to keep ready.
    pub fn pool_min(&self) -> usize {
        self.pool_min.load(Ordering::SeqCst)
    }

    /// Change the minimum and adjust immediately.
    pub async fn set_pool_min(&self, pool_min: usize) {
        self.pool_min.store(pool_min, Ordering::SeqCst);
        self.adjust().await;
    }

    /// Bound on the number of open connections.
    pub fn pool_max(&self) -> Option<usize> {
        *self.pool_max.lock()
    }

    /// Change the occupancy bound and adjust immediately.
    ///
    /// Raising the bound wakes every waiter, since more than one of them
    /// may now be allowed to open a connection.
    pub async fn set_pool_max(&self, pool_max: Option<usize>) {
        let raised = {
            let mut current = self.pool_max.lock();
            let raised = match (*current, pool_max) {
                (Some(old), Some(new)) => new > old,
                (Some(_), None) => true,
                (None, _) => false,
            };
            *current = pool_max;
            raised
        };
        if raised {
            self.freed.notify_waiters();
        }
        self.adjust().await;
    }

    /// How long a caller may wait for a free connection.
    pub fn waiter_timeout(&self) -> Duration {
        *self.waiter_timeout.lock()
    }

    /// Change the waiter timeout; affects waiters already in line.
    pub fn set_waiter_timeout(&self, timeout: Duration) {
        *self.waiter_timeout.lock() = timeout;
    }

    /// How many callers may wait at the same time.
    pub fn max_waiters(&self) -> usize {
        self.max_waiters.load(Ordering::SeqCst)
    }

    /// Change the waiter-slot budget.
    pub fn set_max_waiters(&self, max_waiters: usize) {
        self.max_waiters.store(max_waiters, Ordering::SeqCst);
    }

    /// Statement cache bound pushed to connections at checkout.
    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size.load(Ordering::SeqCst)
    }

    /// Change the statement cache bound and push it to every pooled
    /// connection.
    pub async fn set_statement_cache_size(&self, size: usize) {
        self.statement_cache_size.store(size, Ordering::SeqCst);
        let state = self.state.lock().await;
        for connection in &state.connections {
            connection.set_statement_cache_size(size);
        }
    }

    /// A point-in-time snapshot of pool occupancy.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats::new(
            state.connections.len(),
            state.available.len(),
            state.busy(),
            self.current_waiters.load(Ordering::SeqCst),
        )
    }

    fn notify_busy(&self, state: &PoolState) {
        self.listener.read().busy_connections(state.busy());
    }
}
