use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::client::Client;
use super::connection::ConnectionManager;
use super::connection_args::ConnectionArgs;
use super::errors::ArgsError;
use super::proxy::ConnectionProxy;

/// Assembles a `ConnectionManager` from a validated proxy and hands out
/// registered clients.
pub struct ConnectionBuilder<P: ConnectionProxy> {
    manager: Arc<ConnectionManager<P>>,
    args: ConnectionArgs,
    ctx: CancellationToken,
}

impl<P: ConnectionProxy> ConnectionBuilder<P> {
    /// Validates `args` through the proxy. Configuration errors surface
    /// here, before any connection is attempted.
    pub fn new(ctx: CancellationToken, args: P::Args) -> Result<Self, ArgsError> {
        let proxy = P::validate(args)?;
        Ok(Self::with_proxy(ctx, proxy))
    }

    pub fn with_proxy(ctx: CancellationToken, proxy: P) -> Self {
        let args = proxy.connection_args().clone();
        let manager = ConnectionManager::new(proxy, args.connection_retry_wait(), ctx.clone());
        Self { manager, args, ctx }
    }

    /// Creates a client and registers it, which triggers its first
    /// connection attempt.
    pub async fn build_client(&self) -> Client<P> {
        let client = Client::new(&self.manager, &self.args, self.ctx.clone());
        self.manager.register_client(client.clone()).await;
        client
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<P>> {
        &self.manager
    }

    pub fn args(&self) -> &ConnectionArgs {
        &self.args
    }

    pub async fn destroy(&self) {
        self.manager.destroy().await;
    }
}
