//! Pool and manager event listeners

use std::time::Duration;

use cistern_core::TransactionId;

/// Observer of pool lifecycle events.
///
/// Implementations must not block: several of these callbacks run inside
/// the pool's critical section.
pub trait PoolLifecycleListener: Send + Sync {
    /// A connection was opened.
    fn connection_created(&self, _identifier: u64) {}

    /// A connection was physically destroyed.
    fn connection_destroyed(&self, _identifier: u64) {}

    /// A free connection passed validation and is being handed out again.
    fn connection_validated(&self, _identifier: u64) {}

    /// A caller started waiting for a free connection.
    fn waiter_start_waiting(&self) {}

    /// A caller stopped waiting after `waited`. `timed_out` tells whether
    /// the wait ended in rejection rather than in a served connection.
    fn waiter_stop_waiting(&self, _waited: Duration, _timed_out: bool) {}

    /// A caller was rejected because its wait timed out.
    fn waiter_rejected_timeout(&self) {}

    /// A caller was rejected because no waiter slot was available.
    fn waiter_rejected_overflow(&self) {}

    /// A caller was rejected because opening a new connection failed.
    fn waiter_rejected_failure(&self) {}

    /// Number of connections currently checked out.
    fn busy_connections(&self, _busy: usize) {}
}

/// Observer of connection manager events.
pub trait ConnectionManagerListener: Send + Sync {
    /// A checkout was served to a caller.
    fn connection_served(&self) {}

    /// A connection joined a transaction.
    fn connection_enlisted(&self, _transaction_id: TransactionId) {}

    /// A connection could not join a transaction.
    fn connection_enlistment_error(&self) {}

    /// A connection left its transaction.
    fn connection_delisted(&self, _transaction_id: TransactionId) {}

    /// A call inside a transaction was served the connection already
    /// reserved for that transaction.
    fn connection_reused_in_transaction(&self, _transaction_id: TransactionId) {}

    /// A completed transaction's connection was unbound.
    fn connection_freed_after_transaction_completion(&self, _transaction_id: TransactionId) {}
}

/// Listener that ignores every event. The default for pool and manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl PoolLifecycleListener for NoopListener {}

impl ConnectionManagerListener for NoopListener {}
