//! Cache-store driver and the distributed lock built on it.

pub mod client;
pub mod connection_args;
pub mod errors;
pub mod lock;
pub mod lock_store;
pub mod proxy;

pub use client::{RedisClient, RedisConnectionBuilder};
pub use connection_args::{LockSettings, RedisConnectionArgs};
pub use errors::LockError;
pub use lock::DistributedLock;
pub use lock_store::LockStore;
pub use proxy::RedisConnectionProxy;
