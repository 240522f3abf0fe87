use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::connection::ConnectionManager;
use super::connection_args::ConnectionArgs;
use super::errors::ClientError;
use super::proxy::ConnectionProxy;

/// Logical handle bound to one `ConnectionManager`.
///
/// A client never owns a raw connection; every call asks the manager for
/// the current one. The manager reference is weak, so a client outliving
/// its manager fails with `ClientError::ClientDetached`.
pub struct Client<P: ConnectionProxy> {
    id: Uuid,
    manager: Weak<ConnectionManager<P>>,
    read_timeout: Duration,
    write_timeout: Duration,
    retry_wait: Duration,
    ctx: CancellationToken,
}

impl<P: ConnectionProxy> Clone for Client<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            manager: Weak::clone(&self.manager),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            retry_wait: self.retry_wait,
            ctx: self.ctx.clone(),
        }
    }
}

impl<P: ConnectionProxy> std::fmt::Debug for Client<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("retry_wait", &self.retry_wait)
            .finish()
    }
}

impl<P: ConnectionProxy> Client<P> {
    /// Timeouts are copied from `args`; the client is not registered yet.
    pub fn new(manager: &Arc<ConnectionManager<P>>, args: &ConnectionArgs, ctx: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            manager: Arc::downgrade(manager),
            read_timeout: args.read_timeout(),
            write_timeout: args.write_timeout(),
            retry_wait: args.operation_retry_wait(),
            ctx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn default_timeout(&self) -> Duration {
        self.read_timeout.max(self.write_timeout)
    }

    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    pub fn get_connection(&self) -> Option<P::Connection> {
        self.manager.upgrade()?.get_client_connection(&self.id)
    }

    pub fn is_network_error(&self, err: &P::Error) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|manager| manager.is_network_error(err))
    }

    pub fn notify_network_failure(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.notify_network_failure();
        }
    }

    pub async fn renew_connection(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.renew_client_connection(&self.id).await;
        }
    }

    pub fn subscribe_reconnected(&self) -> Option<watch::Receiver<u64>> {
        self.manager
            .upgrade()
            .map(|manager| manager.subscribe_reconnected())
    }

    /// Runs `closure` against the manager's current connection.
    ///
    /// Network errors are retried after `retry_wait` until the closure
    /// succeeds, returns an application error, `timeout` elapses or the
    /// process context is canceled. On timeout or cancellation the
    /// in-flight closure future is dropped.
    pub async fn execute_closure<T, F, Fut>(
        &self,
        timeout: Duration,
        mut closure: F,
    ) -> Result<T, ClientError<P::Error>>
    where
        F: FnMut(P::Connection) -> Fut + Send,
        Fut: Future<Output = Result<T, P::Error>> + Send,
        T: Send,
    {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(ClientError::ContextCanceled),
            result = time::timeout(timeout, self.retry_loop(&mut closure)) => {
                result.unwrap_or(Err(ClientError::OperationTimeout))
            }
        }
    }

    async fn retry_loop<T, F, Fut>(&self, closure: &mut F) -> Result<T, ClientError<P::Error>>
    where
        F: FnMut(P::Connection) -> Fut + Send,
        Fut: Future<Output = Result<T, P::Error>> + Send,
        T: Send,
    {
        loop {
            let manager = self.manager.upgrade().ok_or(ClientError::ClientDetached)?;

            if let Some(connection) = manager.get_client_connection(&self.id) {
                match closure(connection).await {
                    Ok(value) => return Ok(value),
                    Err(err) if manager.is_network_error(&err) => {
                        debug!(
                            connection = manager.connection_name(),
                            client_id = %self.id,
                            error = %err,
                            "Network error, waiting for recovery"
                        );
                        manager.notify_network_failure();
                    }
                    Err(err) => return Err(ClientError::Operation(err)),
                }
            }

            drop(manager);
            sleep(self.retry_wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ClientError;
    use crate::testing::{FakeConn, FakeConnectionProxy, FakeError, FakeNetwork};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    type Proxy = FakeConnectionProxy<FakeConn>;

    fn args() -> ConnectionArgs {
        ConnectionArgs::builder()
            .connection_retry_wait(Duration::from_millis(25))
            .operation_retry_wait(Duration::from_millis(25))
            .build()
    }

    async fn setup(network: &Arc<FakeNetwork>, ctx: CancellationToken) -> (Arc<ConnectionManager<Proxy>>, Client<Proxy>) {
        let proxy = FakeConnectionProxy::simple(args(), Arc::clone(network));
        let manager = ConnectionManager::new(proxy, Duration::from_millis(25), ctx.clone());
        let client = Client::new(&manager, &args(), ctx);
        manager.register_client(client.clone()).await;
        (manager, client)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let network = FakeNetwork::online();
        let (_manager, client) = setup(&network, CancellationToken::new()).await;

        let value = client
            .execute_closure(Duration::from_secs(1), |conn| async move { Ok(conn.serial() + 41) })
            .await
            .unwrap();

        assert!(value >= 41);
    }

    #[tokio::test]
    async fn test_application_error_is_returned_without_retry() {
        let network = FakeNetwork::online();
        let (manager, client) = setup(&network, CancellationToken::new()).await;
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = client
            .execute_closure(Duration::from_secs(2), |_conn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Application("malformed command".into())) }
            })
            .await;

        match result {
            Err(ClientError::Operation(FakeError::Application(msg))) => {
                assert_eq!(msg, "malformed command")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_recovering());
        assert_eq!(manager.recovery_cycles(), 0);
    }

    #[tokio::test]
    async fn test_network_error_is_retried_transparently() {
        let network = FakeNetwork::online();
        let (manager, client) = setup(&network, CancellationToken::new()).await;
        let calls = AtomicUsize::new(0);

        let value = client
            .execute_closure(Duration::from_secs(3), |_conn| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(FakeError::Network)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert!(value >= 1);
        assert_eq!(manager.recovery_cycles(), 1);
    }

    #[tokio::test]
    async fn test_waits_out_a_two_second_outage() {
        let network = FakeNetwork::online();
        network.fail_for(Duration::from_secs(2));
        let started = Instant::now();
        let (_manager, client) = setup(&network, CancellationToken::new()).await;

        let result = client
            .execute_closure(Duration::from_secs(5), |conn| async move { Ok(conn.generation()) })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_timeout_during_outage() {
        let network = FakeNetwork::online();
        let (_manager, client) = setup(&network, CancellationToken::new()).await;
        network.set_online(false);

        let started = Instant::now();
        let result = client
            .execute_closure(Duration::from_millis(300), |conn| async move {
                conn.check()?;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ClientError::OperationTimeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_slow_closure_times_out() {
        let network = FakeNetwork::online();
        let (_manager, client) = setup(&network, CancellationToken::new()).await;

        let result = client
            .execute_closure(Duration::from_millis(100), |_conn| async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_timeout() {
        let network = FakeNetwork::online();
        let ctx = CancellationToken::new();
        let (_manager, client) = setup(&network, ctx.clone()).await;
        network.set_online(false);

        let canceler = ctx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceler.cancel();
        });

        let result = client
            .execute_closure(Duration::from_secs(5), |conn| async move {
                conn.check()?;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_detached_client() {
        let network = FakeNetwork::online();
        let (manager, client) = setup(&network, CancellationToken::new()).await;
        drop(manager);

        let result = client
            .execute_closure(Duration::from_secs(1), |_conn| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(ClientError::ClientDetached)));
        assert!(client.get_connection().is_none());
    }
}
