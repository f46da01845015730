//! Pool statistics

use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently open, busy or free
    pub opened: usize,

    /// Connections sitting in the free list
    pub free: usize,

    /// Connections currently checked out
    pub busy: usize,

    /// Callers currently waiting for a free connection
    pub waiting: usize,
}

impl PoolStats {
    pub(crate) fn new(opened: usize, free: usize, busy: usize, waiting: usize) -> Self {
        Self {
            opened,
            free,
            busy,
            waiting,
        }
    }

    /// Fraction of open connections currently checked out, 0.0 to 1.0.
    pub fn utilization(&self) -> f64 {
        if self.opened == 0 {
            return 0.0;
        }
        self.busy as f64 / self.opened as f64
    }

    /// Whether every open connection is checked out.
    pub fn is_full(&self) -> bool {
        self.opened > 0 && self.free == 0
    }
}
