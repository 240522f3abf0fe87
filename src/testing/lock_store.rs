//! In-memory lock store with key expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{FakeConnection, FakeConnectionProxy, FakeError, FakeNetwork};
use crate::common::connection_args::ConnectionArgs;
use crate::redis::client::RedisConnectionBuilder;
use crate::redis::connection_args::LockSettings;
use crate::redis::lock_store::LockStore;

pub type LockProxy = FakeConnectionProxy<FakeLockStore>;
pub type LockBuilder = RedisConnectionBuilder<LockProxy>;

/// Lock timings short enough for unit tests.
pub fn quick_settings() -> LockSettings {
    LockSettings {
        acquire_timeout: Duration::from_secs(1),
        retry_wait_min: Duration::from_millis(5),
        retry_wait_max: Duration::from_millis(15),
        ttl: Duration::from_secs(5),
    }
}

pub fn lock_builder(store: &FakeLockStore, settings: LockSettings) -> LockBuilder {
    let args = ConnectionArgs::builder()
        .connection_retry_wait(Duration::from_millis(20))
        .operation_retry_wait(Duration::from_millis(20))
        .read_timeout(Duration::from_secs(2))
        .write_timeout(Duration::from_secs(2))
        .build();
    let owner = store.clone();
    let proxy = FakeConnectionProxy::with_opener(args, Arc::clone(store.network()), move |_| owner.clone());
    RedisConnectionBuilder::with_proxy(CancellationToken::new(), proxy, settings)
}

/// Key/value store shared by every connection opened on it.
#[derive(Clone)]
pub struct FakeLockStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    network: Arc<FakeNetwork>,
}

impl FakeLockStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            network: FakeNetwork::online(),
        }
    }

    pub fn network(&self) -> &Arc<FakeNetwork> {
        &self.network
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.entries().get(key).map(|(value, _)| value.clone())
    }

    /// Expires `key` now, as if its TTL had run out.
    pub fn expire(&self, key: &str) {
        self.entries().remove(key);
    }
}

impl Default for FakeLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConnection for FakeLockStore {}

// Mirrors ACQUIRE_LUA and RELEASE_LUA in redis/lock_store.rs; the tests
// there pin the script structure these two methods reproduce.
#[async_trait]
impl LockStore for FakeLockStore {
    type Error = FakeError;

    async fn acquire(&self, keys: &[String], token: &str, ttl: Duration) -> Result<bool, FakeError> {
        self.network.check()?;
        let mut entries = self.entries();
        if keys.iter().any(|key| entries.contains_key(key)) {
            return Ok(false);
        }
        let expires_at = Instant::now() + ttl;
        for key in keys {
            entries.insert(key.clone(), (token.to_string(), expires_at));
        }
        Ok(true)
    }

    async fn release(&self, keys: &[String], token: &str) -> Result<usize, FakeError> {
        self.network.check()?;
        let mut entries = self.entries();
        let mut released = 0;
        for key in keys {
            if entries.get(key).is_some_and(|(value, _)| value == token) {
                entries.remove(key);
                released += 1;
            }
        }
        Ok(released)
    }
}
