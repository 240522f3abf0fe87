use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::connection_args::RabbitMQConnectionArgs;
use super::proxy::RabbitMQConnectionProxy;
use crate::common::builder::ConnectionBuilder;
use crate::common::client::Client;
use crate::common::connection::ConnectionManager;
use crate::common::errors::ArgsError;
use crate::common::proxy::ConnectionProxy;

/// Broker client. Dereferences to the generic `Client`, whose connection
/// type is the channel of the proxy.
pub struct RabbitMQClient<P: ConnectionProxy = RabbitMQConnectionProxy> {
    client: Client<P>,
    declare_timeout: Duration,
}

impl<P: ConnectionProxy> Clone for RabbitMQClient<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            declare_timeout: self.declare_timeout,
        }
    }
}

impl<P: ConnectionProxy> Deref for RabbitMQClient<P> {
    type Target = Client<P>;

    fn deref(&self) -> &Client<P> {
        &self.client
    }
}

impl<P: ConnectionProxy> RabbitMQClient<P> {
    pub fn declare_timeout(&self) -> Duration {
        self.declare_timeout
    }
}

pub struct RabbitMQConnectionBuilder<P: ConnectionProxy = RabbitMQConnectionProxy> {
    inner: ConnectionBuilder<P>,
    declare_timeout: Duration,
}

impl RabbitMQConnectionBuilder<RabbitMQConnectionProxy> {
    pub fn new(ctx: CancellationToken, args: RabbitMQConnectionArgs) -> Result<Self, ArgsError> {
        let declare_timeout = args.declare_timeout();
        Ok(Self {
            inner: ConnectionBuilder::new(ctx, args)?,
            declare_timeout,
        })
    }
}

impl<P: ConnectionProxy> RabbitMQConnectionBuilder<P> {
    pub fn with_proxy(ctx: CancellationToken, proxy: P, declare_timeout: Duration) -> Self {
        Self {
            inner: ConnectionBuilder::with_proxy(ctx, proxy),
            declare_timeout,
        }
    }

    pub async fn build_client(&self) -> RabbitMQClient<P> {
        RabbitMQClient {
            client: self.inner.build_client().await,
            declare_timeout: self.declare_timeout,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<P>> {
        self.inner.manager()
    }

    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }
}
