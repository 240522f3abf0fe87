//! Document-store driver.

pub mod client;
pub mod connection_args;
pub mod proxy;

pub use client::{MongoClient, MongoConnectionBuilder};
pub use connection_args::MongoConnectionArgs;
pub use proxy::MongoConnectionProxy;
