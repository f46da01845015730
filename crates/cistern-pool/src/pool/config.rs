//! Pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a managed connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of connections to keep ready
    pool_min: usize,

    /// Bound on the number of open connections; `None` means unlimited
    pool_max: Option<usize>,

    /// How long a caller may wait for a free connection, in milliseconds
    waiter_timeout_ms: u64,

    /// How many callers may wait at the same time
    max_waiters: usize,

    /// Prepared statements cached per connection; 0 disables caching
    statement_cache_size: usize,
}

impl PoolConfig {
    /// Create a new pool configuration.
    ///
    /// # Panics
    ///
    /// Panics if `pool_min` exceeds `pool_max`.
    pub fn new(pool_min: usize, pool_max: Option<usize>) -> Self {
        if let Some(max) = pool_max {
            assert!(
                pool_min <= max,
                "pool_min ({pool_min}) cannot exceed pool_max ({max})"
            );
        }

        Self {
            pool_min,
            pool_max,
            waiter_timeout_ms: 10_000,
            max_waiters: 1_000,
            statement_cache_size: 12,
        }
    }

    /// Set how long a caller may wait for a free connection.
    ///
    /// A zero timeout disables waiting entirely: callers are rejected as
    /// soon as the pool is at capacity with nothing free.
    pub fn with_waiter_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.waiter_timeout_ms = timeout_ms;
        self
    }

    /// Set how many callers may wait at the same time.
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    /// Set the per-connection prepared statement cache bound.
    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Number of connections to keep ready.
    pub fn pool_min(&self) -> usize {
        self.pool_min
    }

    /// Bound on the number of open connections.
    pub fn pool_max(&self) -> Option<usize> {
        self.pool_max
    }

    /// How long a caller may wait for a free connection.
    pub fn waiter_timeout(&self) -> Duration {
        Duration::from_millis(self.waiter_timeout_ms)
    }

    /// How many callers may wait at the same time.
    pub fn max_waiters(&self) -> usize {
        self.max_waiters
    }

    /// Per-connection prepared statement cache bound.
    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    /// - pool_min: 0
    /// - pool_max: unlimited
    /// - waiter_timeout: 10 seconds
    /// - max_waiters: 1000
    /// - statement_cache_size: 12
    fn default() -> Self {
        Self::new(0, None)
    }
}
