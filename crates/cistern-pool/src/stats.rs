//! Pool and manager statistics
//!
//! `StatisticsListener` implements both listener traits and folds the event
//! streams into a small set of metric primitives: monotonic counts, up/down
//! counters with extremes, a gauge, a wait-time accumulator, and
//! per-transaction checkout counts.

mod listener;
mod metrics;

#[cfg(test)]
mod tests;

pub use listener::StatisticsListener;
pub use metrics::{Counter, Gauge, Increment, PartitionIncrement, Timing};
