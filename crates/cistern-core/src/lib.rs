//! Cistern Core - Shared contracts for the managed connection pool
//!
//! This crate defines the trait seams and vocabulary the pooling engine
//! is built against:
//!
//! - `NativeConnection` / `NativeStatement` - capability sets of the opaque
//!   physical connection and its prepared statements
//! - `TransactionCoordinator` / `Transaction` / `Synchronization` - the
//!   external transaction service connections are enlisted with
//! - `XaResource` - the two-phase-commit resource contract a managed
//!   connection exposes to that service
//! - Common types like `Credentials`, `TransactionIsolation`, `Xid`, and
//!   the crate-wide `CisternError`/`Result` pair

mod connection;
mod credentials;
mod error;
mod isolation;
mod statement;
pub mod transaction;
pub mod xa;

pub use connection::*;
pub use credentials::*;
pub use error::*;
pub use isolation::*;
pub use statement::*;
pub use transaction::*;
pub use xa::*;
