//! Two-phase-commit resource contract
//!
//! A managed connection takes part in coordinated transactions by exposing
//! this resource interface. The vocabulary follows the classic distributed
//! transaction shape: branches named by an `Xid`, a prepare vote, and a
//! commit/rollback second phase.

use async_trait::async_trait;
use thiserror::Error;

/// Transaction branch identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: u32,
    global_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Create a branch identifier
    pub fn new(
        format_id: u32,
        global_id: impl Into<Vec<u8>>,
        branch_qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            format_id,
            global_id: global_id.into(),
            branch_qualifier: branch_qualifier.into(),
        }
    }

    pub fn format_id(&self) -> u32 {
        self.format_id
    }

    pub fn global_id(&self) -> &[u8] {
        &self.global_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

/// How a resource joins a transaction branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaStartFlag {
    /// Start a brand new branch
    NoFlags,
    /// Join work already started on this branch
    Join,
    /// Resume a suspended branch
    Resume,
}

/// How a resource leaves a transaction branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaEndFlag {
    /// The work completed normally
    Success,
    /// The work failed; the branch should roll back
    Fail,
    /// The branch is suspended and may be resumed later
    Suspend,
}

/// A resource's vote in the prepare phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaVote {
    /// Ready to commit
    Ok,
    /// No work was done; the resource drops out of phase two
    ReadOnly,
}

/// Error classes of the two-phase-commit protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaErrorCode {
    /// The branch was committed outside the protocol
    HeuristicCommit,
    /// The resource manager failed; the branch outcome is in doubt
    ResourceError,
    /// The call violated the protocol state machine
    Protocol,
}

/// Protocol error raised by a two-phase-commit resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("xa failure ({code:?}): {message}")]
pub struct XaError {
    code: XaErrorCode,
    message: String,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The branch was committed outside the protocol
    pub fn heuristic_commit(message: impl Into<String>) -> Self {
        Self::new(XaErrorCode::HeuristicCommit, message)
    }

    /// The resource manager failed
    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(XaErrorCode::ResourceError, message)
    }

    /// The call violated the protocol state machine
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(XaErrorCode::Protocol, message)
    }

    pub fn code(&self) -> XaErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for two-phase-commit resource operations
pub type XaResult<T> = std::result::Result<T, XaError>;

/// The two-phase-commit contract a resource exposes to the coordinator
#[async_trait]
pub trait XaResource: Send + Sync {
    /// Stable identity used to compare resource managers
    fn resource_id(&self) -> u64;

    /// Associate the resource with a transaction branch
    async fn start(&self, xid: &Xid, flag: XaStartFlag) -> XaResult<()>;

    /// Dissociate the resource from a transaction branch
    async fn end(&self, xid: &Xid, flag: XaEndFlag) -> XaResult<()>;

    /// Phase one: vote on the branch outcome
    async fn prepare(&self, xid: &Xid) -> XaResult<XaVote>;

    /// Phase two: commit the branch
    async fn commit(&self, xid: &Xid, one_phase: bool) -> XaResult<()>;

    /// Phase two: roll back the branch
    async fn rollback(&self, xid: &Xid) -> XaResult<()>;

    /// Discard knowledge of a heuristically completed branch
    async fn forget(&self, xid: &Xid) -> XaResult<()>;

    /// List prepared or heuristically completed branches after a crash
    async fn recover(&self) -> XaResult<Vec<Xid>>;

    /// Whether two handles reach the same resource manager
    fn is_same_rm(&self, other: &dyn XaResource) -> bool {
        self.resource_id() == other.resource_id()
    }

    /// Current branch timeout in seconds
    fn transaction_timeout(&self) -> u32;

    /// Set the branch timeout in seconds; returns whether the resource
    /// accepted the new value
    fn set_transaction_timeout(&self, seconds: u32) -> bool;
}
