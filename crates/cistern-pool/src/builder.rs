//! Native connection builder trait

use std::sync::Arc;

use async_trait::async_trait;
use cistern_core::{Credentials, NativeConnection, Result};

/// Produces physical connections for the pool.
///
/// This is the seam the host environment implements. Everything above it
/// works purely in terms of [`NativeConnection`], so a driver binding only
/// has to know how to open one connection for a given account.
#[async_trait]
pub trait NativeConnectionBuilder: Send + Sync + 'static {
    /// Open one new physical connection.
    async fn build(&self, credentials: &Credentials) -> Result<Arc<dyn NativeConnection>>;
}

#[async_trait]
impl<B: NativeConnectionBuilder> NativeConnectionBuilder for Arc<B> {
    async fn build(&self, credentials: &Credentials) -> Result<Arc<dyn NativeConnection>> {
        (**self).build(credentials).await
    }
}
