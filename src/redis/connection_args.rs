use std::time::Duration;

use crate::common::connection_args::{check_uri, ConnectionArgs, Endpoint};
use crate::common::errors::ArgsError;

pub const DRIVER: &str = "redis";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_LOCK_RETRY_WAIT_MIN: Duration = Duration::from_millis(10);
pub const DEFAULT_LOCK_RETRY_WAIT_MAX: Duration = Duration::from_millis(100);
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);

/// Timing of `DistributedLock` acquisition and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub acquire_timeout: Duration,
    pub retry_wait_min: Duration,
    pub retry_wait_max: Duration,
    pub ttl: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_LOCK_ACQUIRE_TIMEOUT,
            retry_wait_min: DEFAULT_LOCK_RETRY_WAIT_MIN,
            retry_wait_max: DEFAULT_LOCK_RETRY_WAIT_MAX,
            ttl: DEFAULT_LOCK_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConnectionArgs {
    base: ConnectionArgs,
    endpoint: Endpoint,
    uri: Option<String>,
    database: u8,
    lock: LockSettings,
}

impl Default for RedisConnectionArgs {
    fn default() -> Self {
        Self {
            base: ConnectionArgs::default(),
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            uri: None,
            database: 0,
            lock: LockSettings::default(),
        }
    }
}

impl RedisConnectionArgs {
    pub fn builder() -> RedisConnectionArgsBuilder {
        RedisConnectionArgsBuilder::default()
    }

    pub fn base(&self) -> &ConnectionArgs {
        &self.base
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn database(&self) -> u8 {
        self.database
    }

    pub fn lock_settings(&self) -> LockSettings {
        self.lock
    }

    pub fn uri(&self) -> Result<String, ArgsError> {
        if let Some(uri) = &self.uri {
            check_uri(DRIVER, uri, &["redis", "rediss"])?;
            return Ok(uri.clone());
        }
        self.endpoint.to_uri(DRIVER, "redis", &self.database.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RedisConnectionArgsBuilder {
    args: RedisConnectionArgs,
}

impl RedisConnectionArgsBuilder {
    pub fn base(mut self, base: ConnectionArgs) -> Self {
        self.args.base = base;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.args.endpoint.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.args.endpoint.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.args.endpoint = self.args.endpoint.with_credentials(username, password);
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.args.uri = Some(uri.into());
        self
    }

    pub fn database(mut self, database: u8) -> Self {
        self.args.database = database;
        self
    }

    pub fn lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.args.lock.acquire_timeout = timeout;
        self
    }

    /// Bounds of the random pause between two acquisition attempts.
    pub fn lock_retry_wait(mut self, min: Duration, max: Duration) -> Self {
        self.args.lock.retry_wait_min = min.min(max);
        self.args.lock.retry_wait_max = max.max(min);
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.args.lock.ttl = ttl;
        self
    }

    pub fn build(self) -> RedisConnectionArgs {
        self.args
    }
}
