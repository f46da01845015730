//! Transaction coordination contracts
//!
//! The pooling engine never drives transactions itself; it enlists managed
//! connections with an external coordinator and reacts to the completion
//! callbacks that coordinator delivers. These traits are the whole surface
//! the engine needs from such a service.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::xa::{XaEndFlag, XaResource};
use crate::Result;

/// Identity of a transaction as known to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Mint a fresh transaction identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a transaction as reported to synchronizations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Still running
    Active,
    /// Doomed to roll back but not yet resolved
    MarkedRollback,
    Committed,
    RolledBack,
    /// The coordinator could not determine the outcome
    Unknown,
}

/// Failure modes when enlisting a resource with a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnlistError {
    /// The transaction is live but already doomed; the resource was still
    /// enlisted and will see the rollback.
    #[error("transaction is marked rollback-only")]
    RollbackOnly,
    /// The transaction already finished; nothing was enlisted.
    #[error("transaction already completed")]
    Completed,
    /// The coordinator rejected the enlistment.
    #[error("enlistment failed: {0}")]
    Failed(String),
}

/// Failure modes when registering a completion synchronization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynchronizationError {
    /// The transaction is live but already doomed; the callback was still
    /// registered and will run at completion.
    #[error("transaction is marked rollback-only")]
    RollbackOnly,
    /// The transaction already finished; the callback will never run.
    #[error("transaction already completed")]
    Completed,
    /// The coordinator itself failed.
    #[error("coordinator error: {0}")]
    SystemError(String),
}

/// Completion callbacks delivered by the coordinator
#[async_trait]
pub trait Synchronization: Send + Sync {
    /// Runs before the transaction outcome is decided
    async fn before_completion(&self);

    /// Runs after the transaction has committed or rolled back
    async fn after_completion(&self, status: TransactionStatus);
}

/// A live transaction managed by the coordinator
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Coordinator-assigned identity of this transaction
    fn id(&self) -> TransactionId;

    /// Enlist a two-phase-commit resource with this transaction
    async fn enlist_resource(
        &self,
        resource: Arc<dyn XaResource>,
    ) -> std::result::Result<(), EnlistError>;

    /// Dissociate a previously enlisted resource.
    ///
    /// `flag` tells the coordinator whether the resource's work completed
    /// normally or failed.
    async fn delist_resource(&self, resource: Arc<dyn XaResource>, flag: XaEndFlag) -> Result<()>;

    /// Register a callback to run when this transaction completes
    async fn register_synchronization(
        &self,
        synchronization: Arc<dyn Synchronization>,
    ) -> std::result::Result<(), SynchronizationError>;
}

/// The external transaction service connections are coordinated with
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// The transaction bound to the calling context, if any
    async fn current_transaction(&self) -> Result<Option<Arc<dyn Transaction>>>;
}
