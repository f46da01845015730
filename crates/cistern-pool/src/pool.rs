//! Connection pooling
//!
//! The pool owns every managed connection it has opened and keeps the free
//! ones in a dequeue ordered by statement-cache reuse count. Checkouts that
//! find the pool full and at its bound park on a waiter queue with a
//! timeout and a slot budget; sizing can be changed while the pool runs
//! and a periodic adjustment pass handles aging, leak reclamation, and
//! prefill.
//!
//! # Example
//!
//! ```ignore
//! use cistern_pool::pool::{ManagedConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(2, Some(10))
//!     .with_waiter_timeout_ms(5000)
//!     .with_statement_cache_size(16);
//!
//! let pool = ManagedConnectionPool::new(config, factory);
//! pool.start().await;
//!
//! let connection = pool.get(&Credentials::default_account()).await?;
//! // Use connection...
//! pool.release(&connection).await;
//! ```

mod config;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use pool::{ManagedConnectionPool, PoolFactory};
pub use stats::PoolStats;
