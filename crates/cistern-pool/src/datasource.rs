//! DataSource facade assembling the pooling stack

use std::sync::{Arc, Weak};
use std::time::Duration;

use cistern_core::{Credentials, Result, TransactionCoordinator, TransactionIsolation};
use serde::{Deserialize, Serialize};

use crate::builder::NativeConnectionBuilder;
use crate::factory::{CheckLevel, ManagedConnectionFactory};
use crate::managed::{ConnectionHandle, ConnectionObserver};
use crate::manager::ConnectionManager;
use crate::pool::{ManagedConnectionPool, PoolConfig, PoolStats};
use crate::stats::StatisticsListener;

const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Everything a `DataSource` needs, gathered in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Sizing and waiting knobs handed to the pool
    pool: PoolConfig,

    /// Validation applied to free connections before reuse
    check_level: CheckLevel,

    /// Statement run when validating at `CheckLevel::Query`
    test_statement: String,

    /// Isolation level applied to new connections
    isolation: TransactionIsolation,

    /// Account connections are opened under
    credentials: Credentials,

    /// Lifetime bound for connections, in milliseconds
    max_age_ms: u64,

    /// Inactivity bound before an open connection counts as leaked, in
    /// milliseconds
    max_open_time_ms: u64,

    /// Period of the background `adjust` task, in milliseconds; 0 disables
    /// the task
    adjust_interval_ms: u64,
}

impl DataSourceConfig {
    pub fn new(pool: PoolConfig) -> Self {
        Self {
            pool,
            check_level: CheckLevel::None,
            test_statement: String::new(),
            isolation: TransactionIsolation::Undefined,
            credentials: Credentials::default_account(),
            max_age_ms: ONE_DAY_MS,
            max_open_time_ms: ONE_DAY_MS,
            adjust_interval_ms: 60_000,
        }
    }

    /// Set the validation level for free connections.
    pub fn with_check_level(mut self, check_level: CheckLevel) -> Self {
        self.check_level = check_level;
        self
    }

    /// Set the statement run when validating at `CheckLevel::Query`.
    pub fn with_test_statement(mut self, sql: impl Into<String>) -> Self {
        self.test_statement = sql.into();
        self
    }

    /// Set the isolation level applied to new connections.
    pub fn with_isolation(mut self, isolation: TransactionIsolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the account connections are opened under.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the connection lifetime bound.
    pub fn with_max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = max_age_ms;
        self
    }

    /// Set the inactivity bound for leak detection.
    pub fn with_max_open_time_ms(mut self, max_open_time_ms: u64) -> Self {
        self.max_open_time_ms = max_open_time_ms;
        self
    }

    /// Set the period of the background `adjust` task. Zero disables it.
    pub fn with_adjust_interval_ms(mut self, adjust_interval_ms: u64) -> Self {
        self.adjust_interval_ms = adjust_interval_ms;
        self
    }

    /// Sizing and waiting knobs handed to the pool.
    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Validation applied to free connections before reuse.
    pub fn check_level(&self) -> CheckLevel {
        self.check_level
    }

    /// Statement run when validating at `CheckLevel::Query`.
    pub fn test_statement(&self) -> &str {
        &self.test_statement
    }

    /// Isolation level applied to new connections.
    pub fn isolation(&self) -> TransactionIsolation {
        self.isolation
    }

    /// Account connections are opened under.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Lifetime bound for connections.
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    /// Inactivity bound before an open connection counts as leaked.
    pub fn max_open_time(&self) -> Duration {
        Duration::from_millis(self.max_open_time_ms)
    }

    /// Period of the background `adjust` task; `None` when disabled.
    pub fn adjust_interval(&self) -> Option<Duration> {
        match self.adjust_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for DataSourceConfig {
    /// Default configuration: an unbounded pool with statement caching
    /// disabled, no validation, undefined isolation, the builder's default
    /// account, one-day age and leak bounds, and a one-minute adjust period.
    fn default() -> Self {
        Self::new(PoolConfig::default().with_statement_cache_size(0))
    }
}

/// Entry point tying builder, factory, pool, and manager together.
///
/// Construction assembles the components and wires a shared
/// `StatisticsListener` into both the pool and the manager; `start` fills
/// the pool to its minimum and spawns the periodic `adjust` task. Runtime
/// setters forward to the live components.
#[derive(Debug)]
pub struct DataSource {
    config: DataSourceConfig,
    factory: Arc<ManagedConnectionFactory>,
    pool: Arc<ManagedConnectionPool>,
    manager: Arc<ConnectionManager>,
    statistics: Arc<StatisticsListener>,
    adjust_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DataSource {
    pub fn new(
        config: DataSourceConfig,
        builder: Arc<dyn NativeConnectionBuilder>,
        coordinator: Arc<dyn TransactionCoordinator>,
    ) -> Self {
        let statistics = Arc::new(StatisticsListener::new());

        let factory = Arc::new(ManagedConnectionFactory::new(builder));
        factory.set_check_level(config.check_level());
        factory.set_test_statement(config.test_statement());
        factory.set_isolation(config.isolation());
        factory.set_max_age(config.max_age());
        factory.set_max_open_time(config.max_open_time());

        let manager = ConnectionManager::new(coordinator);
        manager.set_listener(statistics.clone());
        factory.set_observer(Arc::downgrade(&manager) as Weak<dyn ConnectionObserver>);

        let pool = Arc::new(ManagedConnectionPool::new(
            config.pool().clone(),
            factory.clone(),
        ));
        pool.set_listener(statistics.clone());
        manager.set_pool(pool.clone());

        Self {
            config,
            factory,
            pool,
            manager,
            statistics,
            adjust_task: parking_lot::Mutex::new(None),
        }
    }

    /// Fill the pool to its minimum and spawn the periodic `adjust` task.
    pub async fn start(&self) {
        if self.adjust_task.lock().is_some() {
            tracing::warn!("datasource already started");
            return;
        }
        self.pool.start().await;

        if let Some(period) = self.config.adjust_interval() {
            let pool = self.pool.clone();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately; start was already
                // one adjustment pass.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    pool.adjust().await;
                }
            });
            *self.adjust_task.lock() = Some(task);
            tracing::debug!(period_ms = period.as_millis() as u64, "adjust task started");
        }
    }

    /// Halt the `adjust` task and drain the pool.
    pub async fn stop(&self) {
        if let Some(task) = self.adjust_task.lock().take() {
            task.abort();
        }
        self.pool.stop().await;
    }

    /// Get a connection under the configured account.
    pub async fn get_connection(&self) -> Result<ConnectionHandle> {
        self.manager
            .get_connection_as(self.config.credentials())
            .await
    }

    /// Get a connection under a specific account.
    pub async fn get_connection_as(&self, user: &str, password: &str) -> Result<ConnectionHandle> {
        self.manager
            .get_connection_as(&Credentials::new(user, password))
            .await
    }

    /// Change the number of connections kept ready.
    pub async fn set_pool_min(&self, pool_min: usize) {
        self.pool.set_pool_min(pool_min).await;
    }

    /// Change the bound on open connections.
    pub async fn set_pool_max(&self, pool_max: Option<usize>) {
        self.pool.set_pool_max(pool_max).await;
    }

    /// Change how long a caller may wait for a free connection.
    pub fn set_waiter_timeout(&self, timeout: Duration) {
        self.pool.set_waiter_timeout(timeout);
    }

    /// Change how many callers may wait at the same time.
    pub fn set_max_waiters(&self, max_waiters: usize) {
        self.pool.set_max_waiters(max_waiters);
    }

    /// Change the per-connection statement cache bound, existing
    /// connections included.
    pub async fn set_statement_cache_size(&self, size: usize) {
        self.pool.set_statement_cache_size(size).await;
    }

    /// Change the validation level for free connections.
    pub fn set_check_level(&self, level: CheckLevel) {
        self.factory.set_check_level(level);
    }

    /// Change the statement run when validating at `CheckLevel::Query`.
    pub fn set_test_statement(&self, sql: impl Into<String>) {
        self.factory.set_test_statement(sql);
    }

    /// Change the isolation level applied to new connections.
    pub fn set_isolation(&self, isolation: TransactionIsolation) {
        self.factory.set_isolation(isolation);
    }

    /// Change the lifetime bound for connections created from now on.
    pub fn set_max_age(&self, max_age: Duration) {
        self.factory.set_max_age(max_age);
    }

    /// Change the inactivity bound for connections created from now on.
    pub fn set_max_open_time(&self, max_open_time: Duration) {
        self.factory.set_max_open_time(max_open_time);
    }

    /// The pool behind this datasource.
    pub fn pool(&self) -> &Arc<ManagedConnectionPool> {
        &self.pool
    }

    /// The connection manager behind this datasource.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// The statistics collected over this datasource's lifetime.
    pub fn statistics(&self) -> &Arc<StatisticsListener> {
        &self.statistics
    }

    /// A point-in-time snapshot of pool occupancy.
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use cistern_core::{
        CisternError, NativeConnection, NativeStatement, Transaction,
    };

    use super::*;

    struct MockNative {
        closed: AtomicBool,
    }

    #[async_trait]
    impl NativeConnection for MockNative {
        async fn prepare(&self, _sql: &str) -> Result<Box<dyn NativeStatement>> {
            Err(CisternError::Statement("no statements in this mock".into()))
        }

        async fn execute(&self, _sql: &str) -> Result<bool> {
            Ok(false)
        }

        async fn commit(&self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            Ok(())
        }

        async fn auto_commit(&self) -> Result<bool> {
            Ok(true)
        }

        async fn set_auto_commit(&self, _auto_commit: bool) -> Result<()> {
            Ok(())
        }

        async fn set_transaction_isolation(
            &self,
            _isolation: TransactionIsolation,
        ) -> Result<()> {
            Ok(())
        }

        async fn is_closed(&self) -> Result<bool> {
            Ok(self.closed.load(Ordering::SeqCst))
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBuilder;

    #[async_trait]
    impl NativeConnectionBuilder for MockBuilder {
        async fn build(&self, _credentials: &Credentials) -> Result<Arc<dyn NativeConnection>> {
            Ok(Arc::new(MockNative {
                closed: AtomicBool::new(false),
            }))
        }
    }

    #[derive(Default)]
    struct MockCoordinator;

    #[async_trait]
    impl TransactionCoordinator for MockCoordinator {
        async fn current_transaction(&self) -> Result<Option<Arc<dyn Transaction>>> {
            Ok(None)
        }
    }

    fn datasource(config: DataSourceConfig) -> DataSource {
        DataSource::new(
            config,
            Arc::new(MockBuilder),
            Arc::new(MockCoordinator),
        )
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[test]
    fn test_config_defaults() {
        let config = DataSourceConfig::default();

        assert_eq!(config.pool().pool_min(), 0);
        assert_eq!(config.pool().pool_max(), None);
        assert_eq!(config.pool().statement_cache_size(), 0);
        assert_eq!(config.check_level(), CheckLevel::None);
        assert_eq!(config.test_statement(), "");
        assert_eq!(config.isolation(), TransactionIsolation::Undefined);
        assert_eq!(config.max_age(), Duration::from_millis(ONE_DAY_MS));
        assert_eq!(config.max_open_time(), Duration::from_millis(ONE_DAY_MS));
        assert_eq!(config.adjust_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_config_builders() {
        let config = DataSourceConfig::new(PoolConfig::new(2, Some(8)))
            .with_check_level(CheckLevel::Query)
            .with_test_statement("select 1")
            .with_isolation(TransactionIsolation::Serializable)
            .with_credentials(Credentials::new("app", "secret"))
            .with_max_age_ms(5_000)
            .with_max_open_time_ms(2_500)
            .with_adjust_interval_ms(0);

        assert_eq!(config.pool().pool_min(), 2);
        assert_eq!(config.check_level(), CheckLevel::Query);
        assert_eq!(config.test_statement(), "select 1");
        assert_eq!(config.isolation(), TransactionIsolation::Serializable);
        assert_eq!(config.credentials().user(), Some("app"));
        assert_eq!(config.max_age(), Duration::from_secs(5));
        assert_eq!(config.max_open_time(), Duration::from_millis(2_500));
        // Zero disables the adjust task
        assert_eq!(config.adjust_interval(), None);
    }

    #[test]
    fn test_config_serialization() {
        let config = DataSourceConfig::new(PoolConfig::new(1, Some(4)))
            .with_check_level(CheckLevel::Liveness)
            .with_test_statement("select 1");

        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: DataSourceConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed.pool().pool_min(), 1);
        assert_eq!(parsed.pool().pool_max(), Some(4));
        assert_eq!(parsed.check_level(), CheckLevel::Liveness);
        assert_eq!(parsed.test_statement(), "select 1");
    }

    // ========================================================================
    // Assembly and lifecycle
    // ========================================================================

    #[tokio::test]
    async fn test_connections_flow_back_to_the_pool() {
        let source = datasource(DataSourceConfig::default());

        let handle = source.get_connection().await.expect("get connection");
        assert_eq!(source.stats().await.busy, 1);

        handle.close().await;
        let stats = source.stats().await;
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.free, 1);
    }

    #[tokio::test]
    async fn test_start_fills_the_pool_and_stop_drains_it() {
        let config = DataSourceConfig::new(PoolConfig::new(3, Some(8)))
            .with_adjust_interval_ms(0);
        let source = datasource(config);

        source.start().await;
        assert_eq!(source.stats().await.opened, 3);
        assert_eq!(source.stats().await.free, 3);

        source.stop().await;
        assert_eq!(source.stats().await.opened, 0);
    }

    #[tokio::test]
    async fn test_statistics_are_wired_into_both_components() {
        let source = datasource(DataSourceConfig::default());

        let handle = source.get_connection().await.expect("get connection");
        handle.close().await;

        assert_eq!(source.statistics().created().value(), 1);
        assert_eq!(source.statistics().served().value(), 1);
    }

    #[tokio::test]
    async fn test_setters_forward_to_the_live_components() {
        let source = datasource(DataSourceConfig::default());

        source.set_max_waiters(7);
        source.set_waiter_timeout(Duration::from_millis(250));
        source.set_pool_max(Some(5)).await;
        source.set_statement_cache_size(3).await;

        assert_eq!(source.pool().max_waiters(), 7);
        assert_eq!(source.pool().waiter_timeout(), Duration::from_millis(250));
        assert_eq!(source.pool().pool_max(), Some(5));
        assert_eq!(source.pool().statement_cache_size(), 3);
    }

    #[tokio::test]
    async fn test_credentials_reach_the_builder() {
        let source = datasource(
            DataSourceConfig::default().with_credentials(Credentials::new("app", "secret")),
        );

        // Both paths succeed against the mock; this exercises the plumbing
        let first = source.get_connection().await.expect("get connection");
        first.close().await;
        let second = source
            .get_connection_as("reporting", "other")
            .await
            .expect("get connection as");
        second.close().await;

        assert_eq!(source.manager().served(), 2);
    }

    #[tokio::test]
    async fn test_periodic_adjust_reclaims_aged_connections() {
        let config = DataSourceConfig::default()
            .with_max_age_ms(10)
            .with_adjust_interval_ms(20);
        let source = datasource(config);
        source.start().await;

        let handle = source.get_connection().await.expect("get connection");
        handle.close().await;
        assert_eq!(source.stats().await.opened, 1);

        // The background task runs adjust every 20ms; the connection ages
        // out after 10ms.
        let mut polls = 30;
        while source.stats().await.opened > 0 && polls > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            polls -= 1;
        }
        assert_eq!(source.stats().await.opened, 0);

        source.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_keeps_the_first_task() {
        let config = DataSourceConfig::default().with_adjust_interval_ms(60_000);
        let source = datasource(config);

        source.start().await;
        source.start().await;

        assert!(source.adjust_task.lock().is_some());
        source.stop().await;
        assert!(source.adjust_task.lock().is_none());
    }
}
