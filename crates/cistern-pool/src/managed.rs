//! Managed connection layer
//!
//! A [`ManagedConnection`] wraps one physical connection with the state the
//! pool and the connection manager care about: logical open counting,
//! transaction binding, age and inactivity deadlines, the prepared
//! statement reuse cache, and the two-phase-commit resource face.
//! Application code never touches it directly; it works through a
//! [`ConnectionHandle`].

mod connection;
mod handle;
mod statement;


pub use connection::{ConnectionObserver, ManagedConnection};
pub use handle::ConnectionHandle;
pub use statement::ReusableStatement;
