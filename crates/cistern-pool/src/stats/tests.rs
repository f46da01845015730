//! Unit tests for the statistics metrics and listener

use std::time::Duration;

use cistern_core::TransactionId;

use super::*;
use crate::listener::{ConnectionManagerListener, PoolLifecycleListener};

mod increment_tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let increment = Increment::default();
        assert_eq!(increment.value(), 0);
    }

    #[test]
    fn test_counts_events() {
        let increment = Increment::default();
        increment.increment();
        increment.increment();
        increment.increment();
        assert_eq!(increment.value(), 3);
    }
}

mod counter_tests {
    use super::*;

    #[test]
    fn test_tracks_extremes_through_every_change() {
        let counter = Counter::default();
        counter.increment();
        counter.increment();
        counter.decrement();
        counter.increment();

        // The counter passed through 1, 2, 1, 2 and never reached 0
        assert_eq!(counter.latest(), 2);
        assert_eq!(counter.maximum(), 2);
        assert_eq!(counter.minimum(), 1);
    }

    #[test]
    fn test_rising_only_counter_reports_its_lowest_value() {
        let counter = Counter::default();
        assert_eq!(counter.minimum(), 0);

        counter.increment();
        counter.increment();
        counter.increment();

        assert_eq!(counter.minimum(), 1);
        assert_eq!(counter.maximum(), 3);
    }

    #[test]
    fn test_decrement_saturates_at_zero() {
        let counter = Counter::default();
        counter.decrement();
        counter.decrement();

        assert_eq!(counter.latest(), 0);
        assert_eq!(counter.minimum(), 0);
    }
}

mod gauge_tests {
    use super::*;

    #[test]
    fn test_remembers_extremes() {
        let gauge = Gauge::default();
        gauge.set(5);
        gauge.set(2);
        gauge.set(9);

        assert_eq!(gauge.latest(), 9);
        assert_eq!(gauge.minimum(), 2);
        assert_eq!(gauge.maximum(), 9);
    }

    #[test]
    fn test_minimum_is_over_set_values_only() {
        let gauge = Gauge::default();
        gauge.set(7);

        // Never saw a smaller value, so the minimum is 7, not 0
        assert_eq!(gauge.minimum(), 7);
    }
}

mod timing_tests {
    use super::*;

    #[test]
    fn test_empty_timing() {
        let timing = Timing::default();
        assert_eq!(timing.count(), 0);
        assert_eq!(timing.total(), Duration::ZERO);
        assert_eq!(timing.minimum(), None);
        assert_eq!(timing.maximum(), Duration::ZERO);
        assert_eq!(timing.mean(), Duration::ZERO);
    }

    #[test]
    fn test_accumulates_samples() {
        let timing = Timing::default();
        timing.record(Duration::from_millis(10));
        timing.record(Duration::from_millis(60));
        timing.record(Duration::from_millis(20));

        assert_eq!(timing.count(), 3);
        assert_eq!(timing.total(), Duration::from_millis(90));
        assert_eq!(timing.minimum(), Some(Duration::from_millis(10)));
        assert_eq!(timing.maximum(), Duration::from_millis(60));
        assert_eq!(timing.mean(), Duration::from_millis(30));
    }
}

mod partition_tests {
    use super::*;

    #[test]
    fn test_counts_per_partition() {
        let partition = PartitionIncrement::default();
        let first = TransactionId::new();
        let second = TransactionId::new();

        assert_eq!(partition.increment(first), 1);
        assert_eq!(partition.increment(first), 2);
        assert_eq!(partition.increment(second), 1);

        assert_eq!(partition.active_partitions(), 2);
        assert_eq!(partition.maximum(), 2);
    }

    #[test]
    fn test_forget_folds_into_the_aggregates() {
        let partition = PartitionIncrement::default();
        let first = TransactionId::new();
        let second = TransactionId::new();

        partition.increment(first);
        partition.increment(first);
        partition.increment(first);
        partition.increment(second);

        assert_eq!(partition.forget(first), Some(3));
        assert_eq!(partition.forget(second), Some(1));
        assert_eq!(partition.active_partitions(), 0);
        assert_eq!(partition.mean(), 2.0);
        // The maximum survives its partition
        assert_eq!(partition.maximum(), 3);
    }

    #[test]
    fn test_forget_unknown_partition() {
        let partition = PartitionIncrement::default();
        assert_eq!(partition.forget(TransactionId::new()), None);
        assert_eq!(partition.mean(), 0.0);
    }
}

mod listener_tests {
    use super::*;

    #[test]
    fn test_pool_events_reach_their_metrics() {
        let listener = StatisticsListener::new();

        listener.connection_created(0);
        listener.connection_created(1);
        listener.connection_destroyed(0);
        listener.connection_validated(1);
        listener.busy_connections(1);
        listener.waiter_start_waiting();
        listener.waiter_stop_waiting(Duration::from_millis(40), false);
        listener.waiter_rejected_timeout();
        listener.waiter_rejected_overflow();
        listener.waiter_rejected_failure();

        assert_eq!(listener.created().value(), 2);
        assert_eq!(listener.destroyed().value(), 1);
        assert_eq!(listener.validated().value(), 1);
        assert_eq!(listener.busy().latest(), 1);
        assert_eq!(listener.waiters().latest(), 0);
        assert_eq!(listener.waiters().maximum(), 1);
        assert_eq!(listener.wait_time().count(), 1);
        assert_eq!(listener.wait_time().mean(), Duration::from_millis(40));
        assert_eq!(listener.rejected_timeout().value(), 1);
        assert_eq!(listener.rejected_overflow().value(), 1);
        assert_eq!(listener.rejected_failure().value(), 1);
    }

    #[test]
    fn test_transaction_lifecycle_balances_the_counter() {
        let listener = StatisticsListener::new();
        let transaction = TransactionId::new();

        listener.connection_served();
        listener.connection_enlisted(transaction);
        listener.connection_reused_in_transaction(transaction);
        listener.connection_reused_in_transaction(transaction);
        assert_eq!(listener.in_transaction().latest(), 1);
        assert_eq!(listener.per_transaction().active_partitions(), 1);

        listener.connection_delisted(transaction);
        listener.connection_freed_after_transaction_completion(transaction);

        assert_eq!(listener.in_transaction().latest(), 0);
        assert_eq!(listener.in_transaction().maximum(), 1);
        assert_eq!(listener.completed_transactions().value(), 1);
        assert_eq!(listener.per_transaction().active_partitions(), 0);
        assert_eq!(listener.per_transaction().mean(), 3.0);
        assert_eq!(listener.served().value(), 1);
    }

    #[test]
    fn test_re_enlistment_does_not_double_count_the_transaction() {
        let listener = StatisticsListener::new();
        let transaction = TransactionId::new();

        listener.connection_enlisted(transaction);
        // A close inside the transaction delists, a re-open re-enlists
        listener.connection_delisted(transaction);
        listener.connection_reused_in_transaction(transaction);
        listener.connection_enlisted(transaction);

        assert_eq!(listener.in_transaction().latest(), 1);

        listener.connection_freed_after_transaction_completion(transaction);
        assert_eq!(listener.in_transaction().latest(), 0);
    }

    #[test]
    fn test_enlistment_errors_are_counted() {
        let listener = StatisticsListener::new();
        listener.connection_enlistment_error();
        listener.connection_enlistment_error();
        assert_eq!(listener.enlistment_errors().value(), 2);
    }

    #[test]
    fn test_observation_window_advances() {
        let listener = StatisticsListener::new();
        assert!(listener.to() >= listener.from());

        std::thread::sleep(Duration::from_millis(5));
        listener.connection_created(0);

        assert!(listener.to() > listener.from());
    }
}
