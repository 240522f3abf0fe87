use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tracing::debug;

use crate::config::NotiConnectionsConfig;

/// Connection settings taken from the environment (and `.env`), applied on
/// top of the configuration file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EnvOverrides {
    pub rabbitmq_host: Option<String>,
    pub rabbitmq_port: Option<u16>,
    pub rabbitmq_username: Option<String>,
    pub rabbitmq_password: Option<String>,
    pub rabbitmq_prefetch_count: Option<u16>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_password: Option<String>,
    pub mongodb_host: Option<String>,
    pub mongodb_port: Option<u16>,
    pub mongodb_username: Option<String>,
    pub mongodb_password: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| value.parse::<T>().with_context(|| format!("{name} is not a valid number: {value}")))
        .transpose()
}

impl EnvOverrides {
    /// Reads `.env` if present, then the process environment.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rabbitmq_host: var("RABBITMQ_HOST"),
            rabbitmq_port: parsed("RABBITMQ_PORT")?,
            rabbitmq_username: var("RABBITMQ_USERNAME"),
            rabbitmq_password: var("RABBITMQ_PASSWORD"),
            rabbitmq_prefetch_count: parsed("RABBITMQ_PREFETCH_COUNT")?,
            redis_host: var("REDIS_HOST"),
            redis_port: parsed("REDIS_PORT")?,
            redis_password: var("REDIS_PASSWORD"),
            mongodb_host: var("MONGODB_HOST"),
            mongodb_port: parsed("MONGODB_PORT")?,
            mongodb_username: var("MONGODB_USERNAME"),
            mongodb_password: var("MONGODB_PASSWORD"),
        })
    }

    pub fn apply(&self, config: &mut NotiConnectionsConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.rabbitmq.host, &self.rabbitmq_host);
        set(&mut config.rabbitmq.port, &self.rabbitmq_port);
        set(&mut config.rabbitmq.username, &self.rabbitmq_username);
        set(&mut config.rabbitmq.password, &self.rabbitmq_password);
        set(&mut config.rabbitmq.prefetch_count, &self.rabbitmq_prefetch_count);
        set(&mut config.redis.host, &self.redis_host);
        set(&mut config.redis.port, &self.redis_port);
        set(&mut config.redis.password, &self.redis_password);
        set(&mut config.mongodb.host, &self.mongodb_host);
        set(&mut config.mongodb.port, &self.mongodb_port);
        set(&mut config.mongodb.username, &self.mongodb_username);
        set(&mut config.mongodb.password, &self.mongodb_password);

        if *self != Self::default() {
            debug!("Applied connection overrides from the environment");
        }
    }
}
