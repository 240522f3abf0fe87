//! In-memory stand-ins for the backing stores, used by unit tests.

pub mod broker;
pub mod lock_store;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::common::connection_args::ConnectionArgs;
use crate::common::errors::ArgsError;
use crate::common::proxy::ConnectionProxy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FakeError {
    #[error("connection reset by peer")]
    Network,
    #[error("{0}")]
    Application(String),
}

/// Shared switch deciding whether fake connections can reach their store.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    offline: AtomicBool,
    offline_until: Mutex<Option<Instant>>,
    epoch: AtomicU64,
    serial: AtomicU64,
    created: AtomicU64,
    closed: AtomicU64,
    pings: AtomicU64,
}

impl FakeNetwork {
    pub fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_online(&self, online: bool) {
        if !online {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Takes the network down for `outage`, starting now.
    pub fn fail_for(&self, outage: Duration) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.offline_until.lock().unwrap() = Some(Instant::now() + outage);
    }

    pub fn is_up(&self) -> bool {
        if self.offline.load(Ordering::SeqCst) {
            return false;
        }
        self.offline_until
            .lock()
            .unwrap()
            .map_or(true, |until| Instant::now() >= until)
    }

    pub fn check(&self) -> Result<(), FakeError> {
        if self.is_up() {
            Ok(())
        } else {
            Err(FakeError::Network)
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Connection type handed out by `FakeConnectionProxy`.
pub trait FakeConnection: Clone + Send + Sync + 'static {
    fn on_close(&self) {}
}

type Opener<C> = Arc<dyn Fn(&Arc<FakeNetwork>) -> C + Send + Sync>;

/// Bare connection carrying its serial number and the network epoch it was
/// opened in.
#[derive(Debug, Clone)]
pub struct FakeConn {
    serial: u64,
    generation: u64,
    network: Arc<FakeNetwork>,
}

impl FakeConn {
    fn open(network: &Arc<FakeNetwork>) -> Self {
        Self {
            serial: network.next_serial(),
            generation: network.epoch(),
            network: Arc::clone(network),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn check(&self) -> Result<(), FakeError> {
        self.network.check()
    }
}

impl FakeConnection for FakeConn {}

pub struct FakeProxyArgs<C> {
    base: ConnectionArgs,
    host: String,
    network: Arc<FakeNetwork>,
    open: Opener<C>,
}

impl FakeProxyArgs<FakeConn> {
    pub fn simple(base: ConnectionArgs, network: Arc<FakeNetwork>) -> Self {
        Self {
            base,
            host: "fake.local".to_string(),
            network,
            open: Arc::new(FakeConn::open),
        }
    }
}

impl<C> FakeProxyArgs<C> {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

pub struct FakeConnectionProxy<C> {
    base: ConnectionArgs,
    network: Arc<FakeNetwork>,
    open: Opener<C>,
}

impl<C: FakeConnection> FakeConnectionProxy<C> {
    /// Proxy whose connections are produced by `open`, typically bound to
    /// an in-memory store.
    pub fn with_opener(
        base: ConnectionArgs,
        network: Arc<FakeNetwork>,
        open: impl Fn(&Arc<FakeNetwork>) -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            base,
            network,
            open: Arc::new(open),
        }
    }

    pub fn network(&self) -> &Arc<FakeNetwork> {
        &self.network
    }
}

impl FakeConnectionProxy<FakeConn> {
    pub fn simple(base: ConnectionArgs, network: Arc<FakeNetwork>) -> Self {
        Self::with_opener(base, network, FakeConn::open)
    }
}

#[async_trait]
impl<C: FakeConnection> ConnectionProxy for FakeConnectionProxy<C> {
    type Args = FakeProxyArgs<C>;
    type Connection = C;
    type Error = FakeError;

    fn validate(args: FakeProxyArgs<C>) -> Result<Self, ArgsError> {
        if args.host.is_empty() {
            return Err(ArgsError::MissingHostOrPort { driver: "fake" });
        }
        Ok(Self {
            base: args.base,
            network: args.network,
            open: args.open,
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    fn connection_args(&self) -> &ConnectionArgs {
        &self.base
    }

    async fn create_connection(&self) -> Result<C, FakeError> {
        self.network.check()?;
        self.network.created.fetch_add(1, Ordering::SeqCst);
        Ok((self.open)(&self.network))
    }

    async fn ping(&self, _connection: &C) -> Result<(), FakeError> {
        self.network.pings.fetch_add(1, Ordering::SeqCst);
        self.network.check()
    }

    fn is_network_error(&self, err: &FakeError) -> bool {
        matches!(err, FakeError::Network)
    }

    fn close_connection(&self, connection: C) {
        self.network.closed.fetch_add(1, Ordering::SeqCst);
        connection.on_close();
    }
}
