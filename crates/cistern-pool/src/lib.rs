//! Cistern Pool - Managed database connection pooling
//!
//! This crate turns a driver's raw connections into a managed pool with
//! transaction awareness. The pieces, from the outside in:
//!
//! - [`DataSource`] - the facade an application configures and asks for
//!   connections; owns the periodic adjustment task
//! - [`ConnectionManager`] - serves checkouts, keeps at most one connection
//!   per transaction, and enlists that connection with the coordinator
//! - [`pool::ManagedConnectionPool`] - the bounded pool with its waiter
//!   queue, validation, aging, and leak reclamation
//! - [`managed::ManagedConnection`] - one physical connection plus open
//!   counting, deadlines, the prepared statement cache, and a
//!   two-phase-commit face emulated over local commit and rollback
//!
//! The host environment plugs in at two seams: [`NativeConnectionBuilder`]
//! for opening physical connections and
//! [`cistern_core::TransactionCoordinator`] for the transaction service.

mod builder;
mod datasource;
mod factory;
mod listener;
pub mod managed;
mod manager;
pub mod pool;
pub mod stats;

pub use builder::NativeConnectionBuilder;
pub use datasource::{DataSource, DataSourceConfig};
pub use factory::{CheckLevel, ManagedConnectionFactory};
pub use listener::{ConnectionManagerListener, NoopListener, PoolLifecycleListener};
pub use managed::{ConnectionHandle, ConnectionObserver, ManagedConnection, ReusableStatement};
pub use manager::ConnectionManager;
pub use pool::{ManagedConnectionPool, PoolConfig, PoolFactory, PoolStats};
pub use stats::StatisticsListener;
