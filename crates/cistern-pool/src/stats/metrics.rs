//! Metric primitives behind the statistics listener

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cistern_core::TransactionId;
use parking_lot::Mutex;

/// Monotonically increasing event count.
#[derive(Debug, Default)]
pub struct Increment {
    count: AtomicU64,
}

impl Increment {
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn value(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Up/down counter remembering the extremes it passed through.
#[derive(Debug, Default)]
pub struct Counter {
    state: Mutex<CounterState>,
}

#[derive(Debug, Default)]
struct CounterState {
    latest: u64,
    minimum: Option<u64>,
    maximum: u64,
}

impl CounterState {
    /// Both extremes track every value the counter reaches, whichever
    /// direction it moved in.
    fn observe(&mut self) {
        self.minimum = Some(self.minimum.map_or(self.latest, |minimum| minimum.min(self.latest)));
        if self.latest > self.maximum {
            self.maximum = self.latest;
        }
    }
}

impl Counter {
    pub fn increment(&self) {
        let mut state = self.state.lock();
        state.latest += 1;
        state.observe();
    }

    /// Decrements saturate at zero rather than underflow.
    pub fn decrement(&self) {
        let mut state = self.state.lock();
        state.latest = state.latest.saturating_sub(1);
        state.observe();
    }

    pub fn latest(&self) -> u64 {
        self.state.lock().latest
    }

    /// Smallest value the counter reached; zero before the first change.
    pub fn minimum(&self) -> u64 {
        self.state.lock().minimum.unwrap_or(0)
    }

    pub fn maximum(&self) -> u64 {
        self.state.lock().maximum
    }
}

/// Last-set value with the extremes of every value set so far.
#[derive(Debug, Default)]
pub struct Gauge {
    state: Mutex<GaugeState>,
}

#[derive(Debug, Default)]
struct GaugeState {
    latest: u64,
    minimum: Option<u64>,
    maximum: u64,
}

impl Gauge {
    pub fn set(&self, value: u64) {
        let mut state = self.state.lock();
        state.latest = value;
        state.minimum = Some(state.minimum.map_or(value, |minimum| minimum.min(value)));
        if value > state.maximum {
            state.maximum = value;
        }
    }

    pub fn latest(&self) -> u64 {
        self.state.lock().latest
    }

    /// Smallest value ever set; zero before the first set.
    pub fn minimum(&self) -> u64 {
        self.state.lock().minimum.unwrap_or(0)
    }

    pub fn maximum(&self) -> u64 {
        self.state.lock().maximum
    }
}

/// Duration accumulator.
#[derive(Debug, Default)]
pub struct Timing {
    state: Mutex<TimingState>,
}

#[derive(Debug, Default)]
struct TimingState {
    count: u64,
    total: Duration,
    minimum: Option<Duration>,
    maximum: Duration,
}

impl Timing {
    pub fn record(&self, sample: Duration) {
        let mut state = self.state.lock();
        state.count += 1;
        state.total += sample;
        state.minimum = Some(state.minimum.map_or(sample, |minimum| minimum.min(sample)));
        if sample > state.maximum {
            state.maximum = sample;
        }
    }

    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn total(&self) -> Duration {
        self.state.lock().total
    }

    /// Shortest sample recorded; `None` before the first sample.
    pub fn minimum(&self) -> Option<Duration> {
        self.state.lock().minimum
    }

    pub fn maximum(&self) -> Duration {
        self.state.lock().maximum
    }

    pub fn mean(&self) -> Duration {
        let state = self.state.lock();
        if state.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((state.total.as_nanos() / u128::from(state.count)) as u64)
    }
}

/// Event counts partitioned by transaction.
///
/// Live transactions accumulate counts under their own key; `forget` folds
/// a completed transaction's count into the running aggregates and drops
/// the key, so the map only ever holds active transactions.
#[derive(Debug, Default)]
pub struct PartitionIncrement {
    state: Mutex<PartitionState>,
}

#[derive(Debug, Default)]
struct PartitionState {
    current: HashMap<TransactionId, u64>,
    maximum: u64,
    completed_total: u64,
    completed_partitions: u64,
}

impl PartitionIncrement {
    /// Count one event for the partition, returning its running count.
    pub fn increment(&self, key: TransactionId) -> u64 {
        let mut state = self.state.lock();
        let count = {
            let entry = state.current.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        if count > state.maximum {
            state.maximum = count;
        }
        count
    }

    /// Drop the partition, folding its count into the completed aggregates.
    /// Returns the dropped count, or `None` for an unknown partition.
    pub fn forget(&self, key: TransactionId) -> Option<u64> {
        let mut state = self.state.lock();
        let count = state.current.remove(&key)?;
        state.completed_total += count;
        state.completed_partitions += 1;
        Some(count)
    }

    /// Number of partitions currently accumulating.
    pub fn active_partitions(&self) -> usize {
        self.state.lock().current.len()
    }

    /// Largest count any partition ever reached, completed ones included.
    pub fn maximum(&self) -> u64 {
        self.state.lock().maximum
    }

    /// Mean count over completed partitions.
    pub fn mean(&self) -> f64 {
        let state = self.state.lock();
        if state.completed_partitions == 0 {
            return 0.0;
        }
        state.completed_total as f64 / state.completed_partitions as f64
    }
}
