//! Managed connection factory

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cistern_core::{Credentials, Result, TransactionIsolation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::builder::NativeConnectionBuilder;
use crate::managed::{ConnectionObserver, ManagedConnection};
use crate::pool::PoolFactory;

/// Validation applied to a pooled connection before it is reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckLevel {
    /// Hand connections out without checking them
    #[default]
    None,
    /// Ask the driver whether the physical connection is still open
    Liveness,
    /// Liveness plus running a configured test statement
    Query,
}

impl CheckLevel {
    /// Numeric form of the check level.
    pub fn level(&self) -> u8 {
        match self {
            CheckLevel::None => 0,
            CheckLevel::Liveness => 1,
            CheckLevel::Query => 2,
        }
    }

    /// Check level for a numeric code, if the code is known.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(CheckLevel::None),
            1 => Some(CheckLevel::Liveness),
            2 => Some(CheckLevel::Query),
            _ => None,
        }
    }
}

/// Opens physical connections through a [`NativeConnectionBuilder`] and
/// wraps them into [`ManagedConnection`]s.
///
/// The factory stamps each new connection with the configured lifetime and
/// inactivity bounds, applies the configured isolation level, wires in the
/// observer, and assigns identifiers starting at 0. It also implements the
/// validation side of the pool's factory contract.
pub struct ManagedConnectionFactory {
    /// Builds physical connections
    builder: Arc<dyn NativeConnectionBuilder>,
    /// Observer wired into every connection created here
    observer: RwLock<Option<Weak<dyn ConnectionObserver>>>,
    /// Isolation applied to new connections. Falls back to `Undefined`
    /// permanently after the first driver refusal.
    isolation: RwLock<TransactionIsolation>,
    /// Validation level applied in `validate`
    check_level: RwLock<CheckLevel>,
    /// Statement run at `CheckLevel::Query`
    test_statement: RwLock<String>,
    /// Lifetime bound stamped on new connections
    max_age: RwLock<Duration>,
    /// Inactivity bound stamped on new connections
    max_open_time: RwLock<Duration>,
    /// Identifier for the next connection created
    next_id: AtomicU64,
}

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

impl std::fmt::Debug for ManagedConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnectionFactory")
            .field("isolation", &*self.isolation.read())
            .field("check_level", &*self.check_level.read())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl ManagedConnectionFactory {
    pub fn new(builder: Arc<dyn NativeConnectionBuilder>) -> Self {
        Self {
            builder,
            observer: RwLock::new(None),
            isolation: RwLock::new(TransactionIsolation::Undefined),
            check_level: RwLock::new(CheckLevel::None),
            test_statement: RwLock::new(String::new()),
            max_age: RwLock::new(ONE_DAY),
            max_open_time: RwLock::new(ONE_DAY),
            next_id: AtomicU64::new(0),
        }
    }

    /// Observer wired into every connection created from now on.
    pub fn set_observer(&self, observer: Weak<dyn ConnectionObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Isolation level applied to new connections.
    pub fn isolation(&self) -> TransactionIsolation {
        *self.isolation.read()
    }

    pub fn set_isolation(&self, isolation: TransactionIsolation) {
        *self.isolation.write() = isolation;
    }

    /// Validation level applied in `validate`.
    pub fn check_level(&self) -> CheckLevel {
        *self.check_level.read()
    }

    pub fn set_check_level(&self, level: CheckLevel) {
        *self.check_level.write() = level;
    }

    /// Statement run when validating at `CheckLevel::Query`.
    pub fn test_statement(&self) -> String {
        self.test_statement.read().clone()
    }

    pub fn set_test_statement(&self, sql: impl Into<String>) {
        *self.test_statement.write() = sql.into();
    }

    /// Lifetime bound stamped on new connections.
    pub fn max_age(&self) -> Duration {
        *self.max_age.read()
    }

    /// Change the lifetime bound for connections created from now on.
    ///
    /// Existing connections keep the deadline stamped at creation.
    pub fn set_max_age(&self, max_age: Duration) {
        *self.max_age.write() = max_age;
    }

    /// Inactivity bound stamped on new connections.
    pub fn max_open_time(&self) -> Duration {
        *self.max_open_time.read()
    }

    /// Change the inactivity bound for connections created from now on.
    pub fn set_max_open_time(&self, max_open_time: Duration) {
        *self.max_open_time.write() = max_open_time;
    }
}

#[async_trait]
impl PoolFactory for ManagedConnectionFactory {
    async fn create(&self, credentials: &Credentials) -> Result<Arc<ManagedConnection>> {
        let physical = self.builder.build(credentials).await?;

        let isolation = *self.isolation.read();
        if isolation != TransactionIsolation::Undefined {
            if let Err(e) = physical.set_transaction_isolation(isolation).await {
                tracing::error!(
                    %isolation,
                    error = %e,
                    "driver refused the isolation level, staying on its default from now on"
                );
                *self.isolation.write() = TransactionIsolation::Undefined;
            }
        }

        let identifier = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection = ManagedConnection::new(
            identifier,
            physical,
            *self.max_age.read(),
            *self.max_open_time.read(),
        );
        if let Some(observer) = self.observer.read().clone() {
            connection.add_observer(observer);
        }
        tracing::debug!(identifier, "created managed connection");
        Ok(connection)
    }

    async fn validate(&self, connection: &Arc<ManagedConnection>) -> bool {
        let level = *self.check_level.read();
        if level == CheckLevel::None {
            return true;
        }

        match connection.is_physically_closed().await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(
                    identifier = connection.identifier(),
                    "physical connection is closed"
                );
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    identifier = connection.identifier(),
                    error = %e,
                    "liveness check failed"
                );
                return false;
            }
        }
        if level == CheckLevel::Liveness {
            return true;
        }

        let sql = self.test_statement.read().clone();
        if sql.is_empty() {
            tracing::debug!("no test statement configured, skipping the query check");
            return true;
        }
        match connection.physical().execute(&sql).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    identifier = connection.identifier(),
                    error = %e,
                    "test statement failed"
                );
                false
            }
        }
    }

    async fn destroy(&self, connection: &Arc<ManagedConnection>) {
        if let Err(e) = connection.remove().await {
            tracing::error!(
                identifier = connection.identifier(),
                error = %e,
                "could not destroy connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use cistern_core::{CisternError, NativeConnection, NativeStatement};
    use parking_lot::Mutex;

    use super::*;

    struct MockNative {
        closed: AtomicBool,
        fail_execute: AtomicBool,
        fail_isolation: AtomicBool,
        fail_close: AtomicBool,
        isolation_calls: Mutex<Vec<TransactionIsolation>>,
        executed: Mutex<Vec<String>>,
    }

    impl MockNative {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
                fail_execute: AtomicBool::new(false),
                fail_isolation: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                isolation_calls: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NativeConnection for MockNative {
        async fn prepare(&self, _sql: &str) -> Result<Box<dyn NativeStatement>> {
            Err(CisternError::Statement("no statements in this mock".into()))
        }

        async fn execute(&self, sql: &str) -> Result<bool> {
            if self.fail_execute.load(Ordering::SeqCst) {
                return Err(CisternError::Statement("execute refused".into()));
            }
            self.executed.lock().push(sql.to_string());
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

        async fn set_transaction_isolation(&self, isolation: TransactionIsolation) -> Result<()> {
            if self.fail_isolation.load(Ordering::SeqCst) {
                return Err(CisternError::Connection("isolation refused".into()));
            }
            self.isolation_calls.lock().push(isolation);
            Ok(())
        }

        async fn is_closed(&self) -> Result<bool> {
            Ok(self.closed.load(Ordering::SeqCst))
        }

        async fn close(&self) -> Result<()> {
            if self.fail_close.load(Ordering::SeqCst) {
                return Err(CisternError::Connection("close refused".into()));
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBuilder {
        natives: Mutex<Vec<Arc<MockNative>>>,
        refuse_isolation: AtomicBool,
    }

    impl MockBuilder {
        fn native(&self, index: usize) -> Arc<MockNative> {
            self.natives.lock()[index].clone()
        }
    }

    #[async_trait]
    impl NativeConnectionBuilder for MockBuilder {
        async fn build(&self, _credentials: &Credentials) -> Result<Arc<dyn NativeConnection>> {
            let native = MockNative::new();
            if self.refuse_isolation.load(Ordering::SeqCst) {
                native.fail_isolation.store(true, Ordering::SeqCst);
            }
            self.natives.lock().push(native.clone());
            Ok(native)
        }
    }

    fn factory_with_builder() -> (ManagedConnectionFactory, Arc<MockBuilder>) {
        let builder = Arc::new(MockBuilder::default());
        let factory = ManagedConnectionFactory::new(builder.clone());
        (factory, builder)
    }

    #[tokio::test]
    async fn test_identifiers_start_at_zero_and_increase() {
        let (factory, _builder) = factory_with_builder();
        let account = Credentials::default_account();

        let a = factory.create(&account).await.expect("create");
        let b = factory.create(&account).await.expect("create");
        let c = factory.create(&account).await.expect("create");

        assert_eq!(a.identifier(), 0);
        assert_eq!(b.identifier(), 1);
        assert_eq!(c.identifier(), 2);
    }

    #[tokio::test]
    async fn test_isolation_applied_to_new_connections() {
        let (factory, builder) = factory_with_builder();
        factory.set_isolation(TransactionIsolation::Serializable);

        factory.create(&Credentials::default_account()).await.expect("create");

        let calls = builder.native(0).isolation_calls.lock().clone();
        assert_eq!(calls, vec![TransactionIsolation::Serializable]);
    }

    #[tokio::test]
    async fn test_undefined_isolation_is_not_applied() {
        let (factory, builder) = factory_with_builder();

        factory.create(&Credentials::default_account()).await.expect("create");

        assert!(builder.native(0).isolation_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_isolation_fallback_is_permanent() {
        let (factory, builder) = factory_with_builder();
        factory.set_isolation(TransactionIsolation::Serializable);
        builder.refuse_isolation.store(true, Ordering::SeqCst);

        // Creation still succeeds when the driver refuses the level
        let refused = factory.create(&Credentials::default_account()).await.expect("create");
        assert_eq!(refused.identifier(), 0);
        assert_eq!(factory.isolation(), TransactionIsolation::Undefined);

        // Later connections are never asked to change isolation again
        builder.refuse_isolation.store(false, Ordering::SeqCst);
        factory.create(&Credentials::default_account()).await.expect("create");
        assert!(builder.native(1).isolation_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_check_level_none_accepts_closed_connections() {
        let (factory, builder) = factory_with_builder();
        let connection = factory.create(&Credentials::default_account()).await.expect("create");
        builder.native(0).closed.store(true, Ordering::SeqCst);

        assert!(factory.validate(&connection).await);
    }

    #[tokio::test]
    async fn test_check_level_liveness() {
        let (factory, builder) = factory_with_builder();
        factory.set_check_level(CheckLevel::Liveness);
        let connection = factory.create(&Credentials::default_account()).await.expect("create");

        assert!(factory.validate(&connection).await);

        builder.native(0).closed.store(true, Ordering::SeqCst);
        assert!(!factory.validate(&connection).await);
    }

    #[tokio::test]
    async fn test_check_level_query_runs_test_statement() {
        let (factory, builder) = factory_with_builder();
        factory.set_check_level(CheckLevel::Query);
        factory.set_test_statement("select 1");
        let connection = factory.create(&Credentials::default_account()).await.expect("create");

        assert!(factory.validate(&connection).await);
        assert_eq!(builder.native(0).executed.lock().clone(), vec!["select 1".to_string()]);

        builder.native(0).fail_execute.store(true, Ordering::SeqCst);
        assert!(!factory.validate(&connection).await);
    }

    #[tokio::test]
    async fn test_check_level_query_without_statement_passes_liveness_only() {
        let (factory, builder) = factory_with_builder();
        factory.set_check_level(CheckLevel::Query);
        let connection = factory.create(&Credentials::default_account()).await.expect("create");

        assert!(factory.validate(&connection).await);
        assert!(builder.native(0).executed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_swallows_close_errors() {
        let (factory, builder) = factory_with_builder();
        let connection = factory.create(&Credentials::default_account()).await.expect("create");
        builder.native(0).fail_close.store(true, Ordering::SeqCst);

        factory.destroy(&connection).await;
        // A second destroy is also absorbed
        factory.destroy(&connection).await;
    }

    #[tokio::test]
    async fn test_max_age_is_stamped_at_creation() {
        let (factory, _builder) = factory_with_builder();
        factory.set_max_age(Duration::from_millis(10));
        let old = factory.create(&Credentials::default_account()).await.expect("create");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(old.is_aged());

        // Raising the bound later does not resurrect existing connections
        factory.set_max_age(Duration::from_secs(60));
        assert!(old.is_aged());

        let fresh = factory.create(&Credentials::default_account()).await.expect("create");
        assert!(!fresh.is_aged());
    }

    #[test]
    fn test_check_level_codes() {
        assert_eq!(CheckLevel::None.level(), 0);
        assert_eq!(CheckLevel::Query.level(), 2);
        assert_eq!(CheckLevel::from_level(1), Some(CheckLevel::Liveness));
        assert_eq!(CheckLevel::from_level(9), None);
    }

    #[test]
    fn test_check_level_serialization() {
        let json = serde_json::to_string(&CheckLevel::Liveness).expect("serialize");
        assert_eq!(json, "\"liveness\"");

        let level: CheckLevel = serde_json::from_str("\"query\"").expect("deserialize");
        assert_eq!(level, CheckLevel::Query);
    }
}
