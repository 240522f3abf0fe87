use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::Client;
use super::proxy::ConnectionProxy;

struct Registry<P: ConnectionProxy> {
    clients: HashMap<Uuid, Client<P>>,
    // None while the client is disconnected or the manager is recovering
    connections: HashMap<Uuid, Option<P::Connection>>,
}

impl<P: ConnectionProxy> Registry<P> {
    fn pending(&self) -> Vec<Uuid> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.is_none())
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Owns the raw connections of every registered client and runs the single
/// reconnection supervisor they share.
///
/// The registry mutex is only held for map operations, never across a call
/// into the proxy.
pub struct ConnectionManager<P: ConnectionProxy> {
    proxy: P,
    retry_wait: Duration,
    registry: Mutex<Registry<P>>,
    resetting: AtomicBool,
    recovery_cycles: AtomicU64,
    reconnected: watch::Sender<u64>,
    ctx: CancellationToken,
}

impl<P: ConnectionProxy> ConnectionManager<P> {
    pub fn new(proxy: P, retry_wait: Duration, ctx: CancellationToken) -> Arc<Self> {
        let (reconnected, _) = watch::channel(0);
        Arc::new(Self {
            proxy,
            retry_wait,
            registry: Mutex::new(Registry {
                clients: HashMap::new(),
                connections: HashMap::new(),
            }),
            resetting: AtomicBool::new(false),
            recovery_cycles: AtomicU64::new(0),
            reconnected,
            ctx,
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry<P>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    pub fn connection_name(&self) -> &'static str {
        self.proxy.name()
    }

    pub fn is_network_error(&self, err: &P::Error) -> bool {
        self.proxy.is_network_error(err)
    }

    pub fn is_recovering(&self) -> bool {
        self.resetting.load(Ordering::SeqCst)
    }

    /// Number of recovery routines started since the manager was created.
    pub fn recovery_cycles(&self) -> u64 {
        self.recovery_cycles.load(Ordering::SeqCst)
    }

    /// Receives the transport generation, bumped every time a recovery
    /// cycle republishes connections.
    pub fn subscribe_reconnected(&self) -> watch::Receiver<u64> {
        self.reconnected.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.registry().clients.len()
    }

    /// Adds the client and attempts its first connection. A failed attempt
    /// starts recovery instead of failing the registration.
    pub async fn register_client(self: &Arc<Self>, client: Client<P>) {
        let id = client.id();
        let created = self.proxy.create_connection().await;

        let (failed, stale) = {
            let mut registry = self.registry();
            registry.clients.insert(id, client);
            match created {
                Ok(connection) if !self.is_recovering() => {
                    registry.connections.insert(id, Some(connection));
                    (false, None)
                }
                // opened on the generation being discarded
                Ok(connection) => {
                    registry.connections.insert(id, None);
                    (false, Some(connection))
                }
                Err(err) => {
                    debug!(connection = self.connection_name(), client_id = %id, error = %err, "Initial connection failed");
                    registry.connections.insert(id, None);
                    (true, None)
                }
            }
        };

        if let Some(connection) = stale {
            self.proxy.close_connection(connection);
        }

        info!(connection = self.connection_name(), client_id = %id, "Client registered");

        if failed {
            self.notify_network_failure();
        }
    }

    /// Current connection of the client, `None` while recovering.
    pub fn get_client_connection(&self, client_id: &Uuid) -> Option<P::Connection> {
        let registry = self.registry();
        if self.is_recovering() {
            return None;
        }
        registry.connections.get(client_id).cloned().flatten()
    }

    pub fn remove_client(&self, client_id: &Uuid) {
        let connection = {
            let mut registry = self.registry();
            registry.clients.remove(client_id);
            registry.connections.remove(client_id).flatten()
        };

        if let Some(connection) = connection {
            self.proxy.close_connection(connection);
        }
        info!(connection = self.connection_name(), client_id = %client_id, "Client removed");
    }

    pub fn remove_all_clients(&self) {
        let connections: Vec<_> = {
            let mut registry = self.registry();
            registry.clients.clear();
            registry.connections.drain().filter_map(|(_, c)| c).collect()
        };

        let closed = connections.len();
        for connection in connections {
            self.proxy.close_connection(connection);
        }
        info!(connection = self.connection_name(), closed, "All clients removed");
    }

    /// Replaces the client's connection with a fresh one.
    pub async fn renew_client_connection(self: &Arc<Self>, client_id: &Uuid) {
        let old = {
            let mut registry = self.registry();
            if self.is_recovering() {
                return;
            }
            match registry.connections.get_mut(client_id) {
                Some(slot) => slot.take(),
                None => return,
            }
        };

        if let Some(old) = old {
            self.proxy.close_connection(old);
        }

        match self.proxy.create_connection().await {
            Ok(connection) => {
                let leftover = {
                    let mut registry = self.registry();
                    match registry.connections.get_mut(client_id) {
                        Some(slot) if slot.is_none() && !self.is_recovering() => {
                            *slot = Some(connection);
                            None
                        }
                        _ => Some(connection),
                    }
                };
                if let Some(leftover) = leftover {
                    self.proxy.close_connection(leftover);
                }
                debug!(connection = self.connection_name(), client_id = %client_id, "Connection renewed");
            }
            Err(err) => {
                debug!(connection = self.connection_name(), client_id = %client_id, error = %err, "Renewing connection failed");
                self.notify_network_failure();
            }
        }
    }

    /// Starts the shared recovery routine unless one is already running.
    pub fn notify_network_failure(self: &Arc<Self>) {
        if self
            .resetting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        warn!(connection = self.connection_name(), "Network failure detected, resetting connections");
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.recover().await });
    }

    async fn recover(self: Arc<Self>) {
        let cycle = self.recovery_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.discard_connections();

        loop {
            if !self.wait_for_network().await {
                self.resetting.store(false, Ordering::SeqCst);
                info!(connection = self.connection_name(), "Recovery stopped, context canceled");
                return;
            }

            if self.republish().await {
                break;
            }

            if !self.pause().await {
                self.resetting.store(false, Ordering::SeqCst);
                return;
            }
        }

        self.reconnected.send_modify(|generation| *generation += 1);
        info!(connection = self.connection_name(), cycle, "Connections reset");
    }

    fn discard_connections(&self) {
        let stale: Vec<_> = {
            let mut registry = self.registry();
            registry
                .connections
                .values_mut()
                .filter_map(Option::take)
                .collect()
        };

        let discarded = stale.len();
        for connection in stale {
            self.proxy.close_connection(connection);
        }
        info!(connection = self.connection_name(), discarded, "All connections discarded");
    }

    /// Probes until a fresh connection answers a ping. Returns false when
    /// the context was canceled first.
    async fn wait_for_network(&self) -> bool {
        loop {
            if self.ctx.is_cancelled() {
                return false;
            }

            match self.probe().await {
                Ok(()) => {
                    info!(connection = self.connection_name(), "Network recovered");
                    return true;
                }
                Err(err) => {
                    debug!(connection = self.connection_name(), error = %err, "Waiting for network recovery");
                }
            }

            if !self.pause().await {
                return false;
            }
        }
    }

    async fn probe(&self) -> Result<(), P::Error> {
        let connection = self.proxy.create_connection().await?;
        let result = self.proxy.ping(&connection).await;
        self.proxy.close_connection(connection);
        result
    }

    /// Opens one connection per waiting client and publishes them under a
    /// single lock. Clears the recovery flag in the same critical section
    /// once no client is left waiting.
    async fn republish(&self) -> bool {
        loop {
            let pending = self.registry().pending();

            let mut fresh = Vec::with_capacity(pending.len());
            let mut failure = None;
            for id in pending {
                match self.proxy.create_connection().await {
                    Ok(connection) => fresh.push((id, connection)),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            if let Some(err) = failure {
                debug!(connection = self.connection_name(), error = %err, "Reopening client connections failed");
                for (_, connection) in fresh {
                    self.proxy.close_connection(connection);
                }
                return false;
            }

            let (unused, done) = {
                let mut registry = self.registry();
                let mut unused = Vec::new();
                for (id, connection) in fresh {
                    match registry.connections.get_mut(&id) {
                        Some(slot) if slot.is_none() => *slot = Some(connection),
                        _ => unused.push(connection),
                    }
                }
                let done = registry.connections.values().all(Option::is_some);
                if done {
                    self.resetting.store(false, Ordering::SeqCst);
                }
                (unused, done)
            };

            for connection in unused {
                self.proxy.close_connection(connection);
            }

            if done {
                return true;
            }
        }
    }

    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.ctx.cancelled() => false,
            _ = sleep(self.retry_wait) => true,
        }
    }

    /// Force-closes every client connection and the driver's transport.
    pub async fn destroy(&self) {
        self.remove_all_clients();
        self.proxy.close_all().await;
    }
}
