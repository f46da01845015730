//! Statistics over the pool and manager event streams

use std::time::Duration;

use chrono::{DateTime, Utc};
use cistern_core::TransactionId;
use parking_lot::Mutex;

use crate::listener::{ConnectionManagerListener, PoolLifecycleListener};

use super::metrics::{Counter, Gauge, Increment, PartitionIncrement, Timing};

/// Collects the pool and manager event streams into metrics.
///
/// One instance observes one pool/manager pair. The observation window runs
/// from construction (`from`) to the most recent event (`to`). Callbacks
/// only touch atomics and short-lived `parking_lot` locks, so the listener
/// is safe to wire into the pool's critical section.
#[derive(Debug)]
pub struct StatisticsListener {
    from: DateTime<Utc>,
    to: Mutex<DateTime<Utc>>,
    created: Increment,
    destroyed: Increment,
    validated: Increment,
    served: Increment,
    rejected_timeout: Increment,
    rejected_overflow: Increment,
    rejected_failure: Increment,
    enlistment_errors: Increment,
    completed_transactions: Increment,
    waiters: Counter,
    in_transaction: Counter,
    busy: Gauge,
    wait_time: Timing,
    per_transaction: PartitionIncrement,
}

impl StatisticsListener {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            from: now,
            to: Mutex::new(now),
            created: Increment::default(),
            destroyed: Increment::default(),
            validated: Increment::default(),
            served: Increment::default(),
            rejected_timeout: Increment::default(),
            rejected_overflow: Increment::default(),
            rejected_failure: Increment::default(),
            enlistment_errors: Increment::default(),
            completed_transactions: Increment::default(),
            waiters: Counter::default(),
            in_transaction: Counter::default(),
            busy: Gauge::default(),
            wait_time: Timing::default(),
            per_transaction: PartitionIncrement::default(),
        }
    }

    fn touch(&self) {
        *self.to.lock() = Utc::now();
    }

    /// Start of the observation window.
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// Time of the most recent observed event.
    pub fn to(&self) -> DateTime<Utc> {
        *self.to.lock()
    }

    /// Connections opened.
    pub fn created(&self) -> &Increment {
        &self.created
    }

    /// Connections physically destroyed.
    pub fn destroyed(&self) -> &Increment {
        &self.destroyed
    }

    /// Free connections revalidated and handed out again.
    pub fn validated(&self) -> &Increment {
        &self.validated
    }

    /// Checkouts served to callers.
    pub fn served(&self) -> &Increment {
        &self.served
    }

    /// Callers rejected by the waiter timeout.
    pub fn rejected_timeout(&self) -> &Increment {
        &self.rejected_timeout
    }

    /// Callers rejected because no waiter slot was available.
    pub fn rejected_overflow(&self) -> &Increment {
        &self.rejected_overflow
    }

    /// Callers rejected by a connection creation failure.
    pub fn rejected_failure(&self) -> &Increment {
        &self.rejected_failure
    }

    /// Enlistments the coordinator refused.
    pub fn enlistment_errors(&self) -> &Increment {
        &self.enlistment_errors
    }

    /// Transactions that completed after reserving a connection.
    pub fn completed_transactions(&self) -> &Increment {
        &self.completed_transactions
    }

    /// Callers currently waiting for a free connection.
    pub fn waiters(&self) -> &Counter {
        &self.waiters
    }

    /// Transactions currently holding a reserved connection.
    pub fn in_transaction(&self) -> &Counter {
        &self.in_transaction
    }

    /// Connections currently checked out.
    pub fn busy(&self) -> &Gauge {
        &self.busy
    }

    /// Time callers spent waiting for a free connection.
    pub fn wait_time(&self) -> &Timing {
        &self.wait_time
    }

    /// Checkouts partitioned by the transaction they served.
    pub fn per_transaction(&self) -> &PartitionIncrement {
        &self.per_transaction
    }
}

impl Default for StatisticsListener {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolLifecycleListener for StatisticsListener {
    fn connection_created(&self, _identifier: u64) {
        self.touch();
        self.created.increment();
    }

    fn connection_destroyed(&self, _identifier: u64) {
        self.touch();
        self.destroyed.increment();
    }

    fn connection_validated(&self, _identifier: u64) {
        self.touch();
        self.validated.increment();
    }

    fn waiter_start_waiting(&self) {
        self.touch();
        self.waiters.increment();
    }

    fn waiter_stop_waiting(&self, waited: Duration, _timed_out: bool) {
        self.touch();
        self.waiters.decrement();
        self.wait_time.record(waited);
    }

    fn waiter_rejected_timeout(&self) {
        self.touch();
        self.rejected_timeout.increment();
    }

    fn waiter_rejected_overflow(&self) {
        self.touch();
        self.rejected_overflow.increment();
    }

    fn waiter_rejected_failure(&self) {
        self.touch();
        self.rejected_failure.increment();
    }

    fn busy_connections(&self, busy: usize) {
        self.touch();
        self.busy.set(busy as u64);
    }
}

impl ConnectionManagerListener for StatisticsListener {
    fn connection_served(&self) {
        self.touch();
        self.served.increment();
    }

    fn connection_enlisted(&self, transaction_id: TransactionId) {
        self.touch();
        // A count of one means a transaction just reserved its connection;
        // re-enlistments after a mid-transaction close count higher.
        if self.per_transaction.increment(transaction_id) == 1 {
            self.in_transaction.increment();
        }
    }

    fn connection_enlistment_error(&self) {
        self.touch();
        self.enlistment_errors.increment();
    }

    fn connection_delisted(&self, _transaction_id: TransactionId) {
        self.touch();
    }

    fn connection_reused_in_transaction(&self, transaction_id: TransactionId) {
        self.touch();
        self.per_transaction.increment(transaction_id);
    }

    fn connection_freed_after_transaction_completion(&self, transaction_id: TransactionId) {
        self.touch();
        self.completed_transactions.increment();
        if self.per_transaction.forget(transaction_id).is_some() {
            self.in_transaction.decrement();
        }
    }
}
