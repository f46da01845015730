//! Transaction-aware connection manager

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use cistern_core::{
    CisternError, Credentials, EnlistError, Result, Synchronization, SynchronizationError,
    Transaction, TransactionCoordinator, TransactionId, TransactionStatus, XaEndFlag, XaResource,
};
use tokio::sync::Mutex;

use crate::listener::{ConnectionManagerListener, NoopListener};
use crate::managed::{ConnectionHandle, ConnectionObserver, ManagedConnection};
use crate::pool::ManagedConnectionPool;

/// Hands pooled connections out with transaction affinity.
///
/// Every checkout consults the coordinator for the caller's current
/// transaction. Inside a transaction, the first checkout reserves one
/// connection, enlists it, and every further checkout in the same
/// transaction is served that same connection; it only returns to the pool
/// once the transaction has completed and the caller has closed its
/// handles. Outside a transaction, checkouts are plain pool checkouts with
/// auto-commit forced on.
pub struct ConnectionManager {
    /// External transaction service
    coordinator: Arc<dyn TransactionCoordinator>,
    /// Pool this manager hands connections out of; set once at assembly
    pool: OnceLock<Arc<ManagedConnectionPool>>,
    /// Transaction identity to the connection reserved for it
    affinity: Mutex<HashMap<TransactionId, Arc<ManagedConnection>>>,
    /// Checkouts served, over both the affinity and the pool path
    served: AtomicU64,
    /// Manager event listener; must not block
    listener: parking_lot::RwLock<Arc<dyn ConnectionManagerListener>>,
    /// Self reference for completion callbacks and observer wiring
    weak_self: Weak<ConnectionManager>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("served", &self.served.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(coordinator: Arc<dyn TransactionCoordinator>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            coordinator,
            pool: OnceLock::new(),
            affinity: Mutex::new(HashMap::new()),
            served: AtomicU64::new(0),
            listener: parking_lot::RwLock::new(Arc::new(NoopListener)),
            weak_self: weak_self.clone(),
        })
    }

    /// Attach the pool this manager hands connections out of.
    pub fn set_pool(&self, pool: Arc<ManagedConnectionPool>) {
        if self.pool.set(pool).is_err() {
            tracing::warn!("pool already attached to this connection manager");
        }
    }

    /// Replace the manager event listener.
    pub fn set_listener(&self, listener: Arc<dyn ConnectionManagerListener>) {
        *self.listener.write() = listener;
    }

    /// Checkouts served so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    fn pool(&self) -> Result<&Arc<ManagedConnectionPool>> {
        self.pool.get().ok_or_else(|| {
            CisternError::Configuration("connection manager has no pool attached".into())
        })
    }

    /// Get a connection handle for the caller's current context, using the
    /// default account.
    pub async fn get_connection(&self) -> Result<ConnectionHandle> {
        self.get_connection_as(&Credentials::default_account()).await
    }

    /// Get a connection handle for the caller's current context.
    ///
    /// Inside a transaction every call returns a handle to the same
    /// managed connection; outside one, a free pooled connection with
    /// auto-commit forced on. A coordinator failure is treated as "no
    /// transaction".
    #[tracing::instrument(skip_all, fields(user = credentials.user().unwrap_or("")))]
    pub async fn get_connection_as(&self, credentials: &Credentials) -> Result<ConnectionHandle> {
        let transaction = match self.coordinator.current_transaction().await {
            Ok(transaction) => transaction,
            Err(e) => {
                tracing::error!(error = %e, "cannot get the current transaction");
                None
            }
        };
        let connection = self.open_connection(credentials, transaction).await?;
        self.served.fetch_add(1, Ordering::SeqCst);
        self.listener.read().connection_served();
        Ok(ConnectionHandle::new(connection))
    }

    async fn open_connection(
        &self,
        credentials: &Credentials,
        transaction: Option<Arc<dyn Transaction>>,
    ) -> Result<Arc<ManagedConnection>> {
        let mut affinity = self.affinity.lock().await;
        let mut transaction = transaction;

        let reserved = transaction
            .as_ref()
            .and_then(|tx| affinity.get(&tx.id()))
            .cloned();
        let connection = match reserved {
            Some(existing) => {
                existing.hold();
                if let Some(tx) = &transaction {
                    tracing::debug!(
                        identifier = existing.identifier(),
                        transaction = %tx.id(),
                        "reusing the transaction's connection"
                    );
                    self.listener.read().connection_reused_in_transaction(tx.id());
                }
                existing
            }
            None => {
                let connection = self.pool()?.get(credentials).await?;
                connection.hold();
                if let Some(tx) = transaction.clone() {
                    // The completion callback must be in place before the
                    // mapping is published, otherwise a transaction that
                    // completes early would leave a stale entry behind.
                    let callback = CompletionSynchronization {
                        manager: self.weak_self.clone(),
                        transaction_id: tx.id(),
                    };
                    match tx.register_synchronization(Arc::new(callback)).await {
                        Ok(()) => {
                            connection.set_transaction(Some(tx.clone()));
                            affinity.insert(tx.id(), connection.clone());
                        }
                        Err(SynchronizationError::RollbackOnly) => {
                            // The callback is registered; the connection is
                            // bound so the rollback reaches its work, but the
                            // mapping is never published.
                            tracing::warn!(
                                transaction = %tx.id(),
                                "transaction is already marked rollback-only"
                            );
                            connection.set_transaction(Some(tx.clone()));
                        }
                        Err(SynchronizationError::Completed) => {
                            tracing::warn!(
                                transaction = %tx.id(),
                                "transaction completed before the connection could join it"
                            );
                            transaction = None;
                        }
                        Err(SynchronizationError::SystemError(message)) => {
                            tracing::error!(
                                transaction = %tx.id(),
                                error = %message,
                                "cannot register the completion callback"
                            );
                            transaction = None;
                        }
                    }
                }
                connection
            }
        };

        match &transaction {
            // First logical open under a transaction: enlist the resource
            Some(tx) if connection.open_count() == 1 => {
                let resource: Arc<dyn XaResource> = connection.clone();
                match tx.enlist_resource(resource).await {
                    Ok(()) => {
                        self.listener.read().connection_enlisted(tx.id());
                        if let Err(e) = connection.physical().set_auto_commit(false).await {
                            tracing::error!(
                                identifier = connection.identifier(),
                                error = %e,
                                "cannot disable auto-commit"
                            );
                            connection.notify_error(&e).await;
                            return Err(e);
                        }
                    }
                    Err(EnlistError::RollbackOnly) => {
                        tracing::error!(
                            transaction = %tx.id(),
                            "transaction marked rollback-only, its work will be rolled back"
                        );
                    }
                    Err(EnlistError::Completed) => {
                        tracing::warn!(
                            transaction = %tx.id(),
                            "transaction completed before enlistment"
                        );
                        affinity.remove(&tx.id());
                        connection.set_transaction(None);
                        self.force_auto_commit(&connection).await?;
                    }
                    Err(EnlistError::Failed(message)) => {
                        tracing::error!(
                            transaction = %tx.id(),
                            error = %message,
                            "cannot enlist connection"
                        );
                        self.listener.read().connection_enlistment_error();
                        // Not returned to the pool here; the connection's own
                        // error path or leak reclamation cleans up.
                        return Err(CisternError::Enlistment(message));
                    }
                }
            }
            Some(_) => {}
            None => {
                self.force_auto_commit(&connection).await?;
            }
        }

        Ok(connection)
    }

    async fn force_auto_commit(&self, connection: &Arc<ManagedConnection>) -> Result<()> {
        match connection.physical().auto_commit().await {
            Ok(true) => Ok(()),
            Ok(false) => {
                if let Err(e) = connection.physical().set_auto_commit(true).await {
                    tracing::error!(
                        identifier = connection.identifier(),
                        error = %e,
                        "cannot force auto-commit on"
                    );
                    connection.notify_error(&e).await;
                    return Err(e);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    identifier = connection.identifier(),
                    error = %e,
                    "cannot read auto-commit mode"
                );
                connection.notify_error(&e).await;
                Err(e)
            }
        }
    }

    /// Shared tail of the close and error notification paths.
    ///
    /// The last logical close either reserves the connection for its
    /// transaction (delisting it now, releasing at completion) or returns
    /// it to the pool straight away.
    async fn close_connection(&self, connection: &Arc<ManagedConnection>, flag: XaEndFlag) {
        if !connection.release() {
            return;
        }
        match connection.transaction() {
            Some(tx) => {
                let resource: Arc<dyn XaResource> = connection.clone();
                if let Err(e) = tx.delist_resource(resource, flag).await {
                    tracing::error!(
                        identifier = connection.identifier(),
                        error = %e,
                        "cannot delist connection"
                    );
                }
                self.listener.read().connection_delisted(tx.id());
            }
            None => match self.pool.get() {
                Some(pool) => pool.release(connection).await,
                None => tracing::error!("no pool attached, dropping the closed connection"),
            },
        }
    }

    /// A transaction completed: unbind its connection and, if the caller
    /// has already closed every handle, release it back to the pool.
    async fn free_connections(&self, transaction_id: TransactionId) {
        tracing::debug!(transaction = %transaction_id, "transaction completed, freeing its connection");
        let removed = self.affinity.lock().await.remove(&transaction_id);
        match removed {
            Some(connection) => {
                connection.set_transaction(None);
                if connection.is_closed() {
                    match self.pool.get() {
                        Some(pool) => pool.release(&connection).await,
                        None => tracing::error!("no pool attached, dropping the freed connection"),
                    }
                }
                self.listener
                    .read()
                    .connection_freed_after_transaction_completion(transaction_id);
            }
            None => {
                tracing::warn!(
                    transaction = %transaction_id,
                    "no connection reserved for the completed transaction"
                );
            }
        }
    }
}

#[async_trait]
impl ConnectionObserver for ConnectionManager {
    async fn connection_closed(&self, connection: Arc<ManagedConnection>) {
        self.close_connection(&connection, XaEndFlag::Success).await;
    }

    async fn connection_errored(&self, connection: Arc<ManagedConnection>, error: &CisternError) {
        tracing::warn!(
            identifier = connection.identifier(),
            %error,
            "connection reported an error"
        );
        self.close_connection(&connection, XaEndFlag::Fail).await;
    }
}

/// Registered with the coordinator once per transaction; routes the
/// completion callback back to the manager.
struct CompletionSynchronization {
    manager: Weak<ConnectionManager>,
    transaction_id: TransactionId,
}

#[async_trait]
impl Synchronization for CompletionSynchronization {
    async fn before_completion(&self) {}

    async fn after_completion(&self, status: TransactionStatus) {
        tracing::debug!(transaction = %self.transaction_id, ?status, "transaction completed");
        if let Some(manager) = self.manager.upgrade() {
            manager.free_connections(self.transaction_id).await;
        }
    }
}
