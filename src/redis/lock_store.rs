use std::error::Error as StdError;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};

/// Prefix of every key written by a `DistributedLock`.
pub const LOCK_KEY_PREFIX: &str = "distributed_lock:";

pub fn lock_key(resource: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{resource}")
}

/// Atomic primitives the distributed lock needs from its store.
#[async_trait]
pub trait LockStore: Clone + Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    /// Sets every key to `token` with `ttl`, only if none of them exists.
    /// Returns whether the keys were taken.
    async fn acquire(&self, keys: &[String], token: &str, ttl: Duration) -> Result<bool, Self::Error>;

    /// Deletes the keys still holding `token` and returns how many were
    /// deleted.
    async fn release(&self, keys: &[String], token: &str) -> Result<usize, Self::Error>;
}

/// Takes every key or none: bails out on the first existing key, then
/// sets all of them to ARGV[1] with a PX of ARGV[2].
pub(crate) const ACQUIRE_LUA: &str = r#"
        for _, key in ipairs(KEYS) do
            if redis.call("EXISTS", key) == 1 then
                return 0
            end
        end
        for _, key in ipairs(KEYS) do
            redis.call("SET", key, ARGV[1], "PX", ARGV[2])
        end
        return 1
        "#;

/// Deletes only the keys whose value is still ARGV[1] and returns how many.
pub(crate) const RELEASE_LUA: &str = r#"
        local released = 0
        for _, key in ipairs(KEYS) do
            if redis.call("GET", key) == ARGV[1] then
                redis.call("DEL", key)
                released = released + 1
            end
        end
        return released
        "#;

static ACQUIRE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(ACQUIRE_LUA));
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(RELEASE_LUA));

#[async_trait]
impl LockStore for MultiplexedConnection {
    type Error = RedisError;

    async fn acquire(&self, keys: &[String], token: &str, ttl: Duration) -> Result<bool, RedisError> {
        let mut connection = self.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut invocation = ACQUIRE_SCRIPT.prepare_invoke();
        invocation.key(keys).arg(token).arg(ttl_ms);
        let acquired: i64 = invocation.invoke_async(&mut connection).await?;
        Ok(acquired == 1)
    }

    async fn release(&self, keys: &[String], token: &str) -> Result<usize, RedisError> {
        let mut connection = self.clone();
        let mut invocation = RELEASE_SCRIPT.prepare_invoke();
        invocation.key(keys).arg(token);
        let released: usize = invocation.invoke_async(&mut connection).await?;
        Ok(released)
    }
}
