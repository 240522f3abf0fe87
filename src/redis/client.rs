use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::connection_args::{LockSettings, RedisConnectionArgs};
use super::errors::LockError;
use super::lock::DistributedLock;
use super::lock_store::LockStore;
use super::proxy::RedisConnectionProxy;
use crate::common::builder::ConnectionBuilder;
use crate::common::client::Client;
use crate::common::connection::ConnectionManager;
use crate::common::errors::ArgsError;
use crate::common::proxy::ConnectionProxy;

/// Cache-store client. Dereferences to the generic `Client`.
pub struct RedisClient<P: ConnectionProxy = RedisConnectionProxy> {
    client: Client<P>,
    lock: LockSettings,
}

impl<P: ConnectionProxy> Clone for RedisClient<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            lock: self.lock,
        }
    }
}

impl<P: ConnectionProxy> Deref for RedisClient<P> {
    type Target = Client<P>;

    fn deref(&self) -> &Client<P> {
        &self.client
    }
}

impl<P: ConnectionProxy> RedisClient<P> {
    pub fn lock_settings(&self) -> LockSettings {
        self.lock
    }
}

impl<P> RedisClient<P>
where
    P: ConnectionProxy,
    P::Connection: LockStore<Error = P::Error>,
{
    /// Runs `closure` while holding a `DistributedLock` over `keys`.
    ///
    /// The lock is released whatever the closure returns, even when `ctx`
    /// was canceled meanwhile; a failed release is logged and left to the
    /// lock TTL.
    pub async fn execute_closure_with_locks<T, F, Fut, K>(
        &self,
        ctx: &CancellationToken,
        keys: impl IntoIterator<Item = K>,
        closure: F,
    ) -> Result<T, LockError<P::Error>>
    where
        K: Into<String>,
        F: FnMut(P::Connection) -> Fut + Send,
        Fut: Future<Output = Result<T, P::Error>> + Send,
        T: Send,
    {
        let lock = DistributedLock::new(self.clone(), keys)?;
        lock.acquire_lock(ctx).await?;

        let result = self.execute_closure(self.default_timeout(), closure).await;

        if let Err(err) = lock.release().await {
            warn!(keys = ?lock.resource_keys(), error = %err, "Releasing locks failed, leaving them to expire");
        }
        Ok(result?)
    }
}

pub struct RedisConnectionBuilder<P: ConnectionProxy = RedisConnectionProxy> {
    inner: ConnectionBuilder<P>,
    lock: LockSettings,
}

impl RedisConnectionBuilder<RedisConnectionProxy> {
    pub fn new(ctx: CancellationToken, args: RedisConnectionArgs) -> Result<Self, ArgsError> {
        let lock = args.lock_settings();
        Ok(Self {
            inner: ConnectionBuilder::new(ctx, args)?,
            lock,
        })
    }
}

impl<P: ConnectionProxy> RedisConnectionBuilder<P> {
    pub fn with_proxy(ctx: CancellationToken, proxy: P, lock: LockSettings) -> Self {
        Self {
            inner: ConnectionBuilder::with_proxy(ctx, proxy),
            lock,
        }
    }

    pub async fn build_client(&self) -> RedisClient<P> {
        RedisClient {
            client: self.inner.build_client().await,
            lock: self.lock,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<P>> {
        self.inner.manager()
    }

    pub async fn destroy(&self) {
        self.inner.destroy().await;
    }
}
