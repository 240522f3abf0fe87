use std::ops::Deref;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::connection_args::MongoConnectionArgs;
use super::proxy::MongoConnectionProxy;
use crate::common::builder::ConnectionBuilder;
use crate::common::client::Client;
use crate::common::connection::ConnectionManager;
use crate::common::errors::ArgsError;
use crate::common::proxy::ConnectionProxy;

/// Document-store client. Its connection is a `mongodb::Client`.
pub struct MongoClient<P: ConnectionProxy = MongoConnectionProxy> {
    client: Client<P>,
}

impl<P: ConnectionProxy> Clone for MongoClient<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<P: ConnectionProxy> Deref for MongoClient<P> {
    type Target = Client<P>;

    fn deref(&self) -> &Client<P> {
        &self.client
    }
}

pub struct MongoConnectionBuilder<P: ConnectionProxy = MongoConnectionProxy> {
    inner: ConnectionBuilder<P>,
}

impl MongoConnectionBuilder<MongoConnectionProxy> {
    pub fn new(ctx: CancellationToken, args: MongoConnectionArgs) -> Result<Self, ArgsError> {
        Ok(Self {
            inner: ConnectionBuilder::new(ctx, args)?,
        })
    }
}

impl<P: ConnectionProxy> MongoConnectionBuilder<P> {
    pub fn with_proxy(ctx: CancellationToken, proxy: P) -> Self {
        Self {
            inner: ConnectionBuilder::with_proxy(ctx, proxy),
        }
    }

    pub async fn build_client(&self) -> MongoClient<P> {
        MongoClient {
            client: self.inner.build_client().await,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<P>> {
        self.inner.manager()
    }

    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }
}
