//! Resilient connections to a message broker, a cache store and a document
//! store, plus the messaging patterns and distributed lock built on them.

pub mod common;
pub mod config;
pub mod env;
pub mod mongodb;
pub mod provider;
pub mod rabbitmq;
pub mod redis;

#[cfg(test)]
mod testing;

pub use provider::ConnectionProvider;
