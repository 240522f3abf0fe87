// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::connection_args::{self as defaults, ConnectionArgs};
use crate::mongodb::connection_args::{self as mongo_defaults, MongoConnectionArgs};
use crate::rabbitmq::connection_args::{self as rabbit_defaults, RabbitMQConnectionArgs};
use crate::redis::connection_args::{self as redis_defaults, RedisConnectionArgs};

pub const CONFIG_FILE_NAME: &str = "NotiConnections.json";

// Configuration structures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotiConnectionsConfig {
    #[serde(default)]
    pub rabbitmq: RabbitMQConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub mongodb: MongoConfig,
}

/// Timeouts shared by every driver section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_connection_retry_wait")]
    pub connection_retry_wait_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_operation_retry_wait")]
    pub operation_retry_wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RabbitMQConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Full `amqp://` or `amqps://` URI. Takes precedence over host and port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_seconds: u16,
    #[serde(default = "default_declare_timeout")]
    pub declare_timeout_ms: u64,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default)]
    pub database: u8,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_acquire_timeout")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_lock_retry_wait_min")]
    pub retry_wait_min_ms: u64,
    #[serde(default = "default_lock_retry_wait_max")]
    pub retry_wait_max_ms: u64,
    #[serde(default = "default_lock_ttl")]
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MongoConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_mongodb_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

// Default values
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
fn default_connection_timeout() -> u64 { millis(defaults::DEFAULT_CONNECTION_TIMEOUT) }
fn default_connection_retry_wait() -> u64 { millis(defaults::DEFAULT_CONNECTION_RETRY_WAIT) }
fn default_read_timeout() -> u64 { millis(defaults::DEFAULT_READ_TIMEOUT) }
fn default_write_timeout() -> u64 { millis(defaults::DEFAULT_WRITE_TIMEOUT) }
fn default_operation_retry_wait() -> u64 { millis(defaults::DEFAULT_OPERATION_RETRY_WAIT) }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_rabbitmq_port() -> u16 { rabbit_defaults::DEFAULT_PORT }
fn default_redis_port() -> u16 { redis_defaults::DEFAULT_PORT }
fn default_mongodb_port() -> u16 { mongo_defaults::DEFAULT_PORT }
fn default_vhost() -> String { "/".to_string() }
fn default_heartbeat() -> u16 {
    u16::try_from(rabbit_defaults::DEFAULT_HEARTBEAT.as_secs()).unwrap_or(u16::MAX)
}
fn default_declare_timeout() -> u64 { millis(rabbit_defaults::DEFAULT_DECLARE_TIMEOUT) }
fn default_prefetch_count() -> u16 { rabbit_defaults::DEFAULT_PREFETCH_COUNT }
fn default_lock_acquire_timeout() -> u64 { millis(redis_defaults::DEFAULT_LOCK_ACQUIRE_TIMEOUT) }
fn default_lock_retry_wait_min() -> u64 { millis(redis_defaults::DEFAULT_LOCK_RETRY_WAIT_MIN) }
fn default_lock_retry_wait_max() -> u64 { millis(redis_defaults::DEFAULT_LOCK_RETRY_WAIT_MAX) }
fn default_lock_ttl() -> u64 { millis(redis_defaults::DEFAULT_LOCK_TTL) }

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_connection_timeout(),
            connection_retry_wait_ms: default_connection_retry_wait(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            operation_retry_wait_ms: default_operation_retry_wait(),
        }
    }
}

impl Default for RabbitMQConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_rabbitmq_port(),
            username: String::new(),
            password: String::new(),
            uri: None,
            vhost: default_vhost(),
            heartbeat_seconds: default_heartbeat(),
            declare_timeout_ms: default_declare_timeout(),
            prefetch_count: default_prefetch_count(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_redis_port(),
            username: String::new(),
            password: String::new(),
            uri: None,
            database: 0,
            lock: LockConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_lock_acquire_timeout(),
            retry_wait_min_ms: default_lock_retry_wait_min(),
            retry_wait_max_ms: default_lock_retry_wait_max(),
            ttl_ms: default_lock_ttl(),
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_mongodb_port(),
            username: String::new(),
            password: String::new(),
            uri: None,
            app_name: None,
            timeouts: TimeoutsConfig::default(),
        }
    }
}

// Conversion into driver arguments
impl TimeoutsConfig {
    pub fn to_args(&self) -> ConnectionArgs {
        ConnectionArgs::builder()
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .connection_retry_wait(Duration::from_millis(self.connection_retry_wait_ms))
            .read_timeout(Duration::from_millis(self.read_timeout_ms))
            .write_timeout(Duration::from_millis(self.write_timeout_ms))
            .operation_retry_wait(Duration::from_millis(self.operation_retry_wait_ms))
            .build()
    }
}

fn has_credentials(username: &str, password: &str) -> bool {
    !username.is_empty() || !password.is_empty()
}

impl RabbitMQConfig {
    pub fn to_args(&self) -> RabbitMQConnectionArgs {
        let mut builder = RabbitMQConnectionArgs::builder()
            .base(self.timeouts.to_args())
            .host(&self.host)
            .port(self.port)
            .vhost(&self.vhost)
            .heartbeat(Duration::from_secs(u64::from(self.heartbeat_seconds)))
            .declare_timeout(Duration::from_millis(self.declare_timeout_ms))
            .prefetch_count(self.prefetch_count);
        if has_credentials(&self.username, &self.password) {
            builder = builder.credentials(&self.username, &self.password);
        }
        if let Some(uri) = &self.uri {
            builder = builder.uri(uri);
        }
        builder.build()
    }
}

impl RedisConfig {
    pub fn to_args(&self) -> RedisConnectionArgs {
        let mut builder = RedisConnectionArgs::builder()
            .base(self.timeouts.to_args())
            .host(&self.host)
            .port(self.port)
            .database(self.database)
            .lock_acquire_timeout(Duration::from_millis(self.lock.acquire_timeout_ms))
            .lock_retry_wait(
                Duration::from_millis(self.lock.retry_wait_min_ms),
                Duration::from_millis(self.lock.retry_wait_max_ms),
            )
            .lock_ttl(Duration::from_millis(self.lock.ttl_ms));
        if has_credentials(&self.username, &self.password) {
            builder = builder.credentials(&self.username, &self.password);
        }
        if let Some(uri) = &self.uri {
            builder = builder.uri(uri);
        }
        builder.build()
    }
}

impl MongoConfig {
    pub fn to_args(&self) -> MongoConnectionArgs {
        let mut builder = MongoConnectionArgs::builder()
            .base(self.timeouts.to_args())
            .host(&self.host)
            .port(self.port);
        if has_credentials(&self.username, &self.password) {
            builder = builder.credentials(&self.username, &self.password);
        }
        if let Some(uri) = &self.uri {
            builder = builder.uri(uri);
        }
        if let Some(app_name) = &self.app_name {
            builder = builder.app_name(app_name);
        }
        builder.build()
    }
}

// Configuration loading and management functions
pub fn find_config_file() -> Result<PathBuf> {
    let alternative = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", Path::new(CONFIG_FILE_NAME)),
        ("Current directory (alternative)", alternative.as_path()),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{CONFIG_FILE_NAME}"));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {CONFIG_FILE_NAME} configuration file. \
         Please create one in the current directory, its config/ directory, \
         or your home directory (as .{CONFIG_FILE_NAME})."
    ))
}

pub fn load_config_from(path: &Path) -> Result<NotiConnectionsConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: NotiConnectionsConfig = serde_json::from_str(&content)
        .context("Configuration file contains invalid JSON or fields of the wrong type")?;

    if config.rabbitmq.uri.is_none() && config.rabbitmq.host.is_empty() {
        return Err(anyhow!("Configuration error: rabbitmq.host cannot be empty"));
    }
    let lock = &config.redis.lock;
    if lock.retry_wait_min_ms > lock.retry_wait_max_ms {
        return Err(anyhow!(
            "Configuration error: redis.lock.retry_wait_min_ms exceeds retry_wait_max_ms"
        ));
    }

    Ok(config)
}

pub fn load_config() -> Result<NotiConnectionsConfig> {
    let config_path = find_config_file()?;
    load_config_from(&config_path)
}

/// Loads the configuration file when one exists, defaults otherwise.
pub fn load_config_or_default() -> Result<NotiConnectionsConfig> {
    match find_config_file() {
        Ok(path) => load_config_from(&path),
        Err(_) => {
            debug!("No {} found, using defaults", CONFIG_FILE_NAME);
            Ok(NotiConnectionsConfig::default())
        }
    }
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&NotiConnectionsConfig::default())
        .context("Failed to serialize default configuration")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());

    println!("\nConfiguration file created at: {}", path.display());
    println!("\nThis file contains default settings for local services.");
    println!("\nKey settings to review:");
    println!("  - rabbitmq.host / rabbitmq.uri - broker location");
    println!("  - redis.lock.ttl_ms - lifetime of distributed locks");
    println!("  - mongodb.app_name - name reported to the document store");

    Ok(())
}
