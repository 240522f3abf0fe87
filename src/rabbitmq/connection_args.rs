use std::time::Duration;

use crate::common::connection_args::{check_uri, ConnectionArgs, Endpoint};
use crate::common::errors::ArgsError;

pub const DRIVER: &str = "rabbitmq";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);
pub const DEFAULT_DECLARE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitMQConnectionArgs {
    base: ConnectionArgs,
    endpoint: Endpoint,
    uri: Option<String>,
    vhost: String,
    heartbeat: Duration,
    declare_timeout: Duration,
    prefetch_count: u16,
    confirm_mode: bool,
}

impl Default for RabbitMQConnectionArgs {
    fn default() -> Self {
        Self {
            base: ConnectionArgs::default(),
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            uri: None,
            vhost: "/".to_string(),
            heartbeat: DEFAULT_HEARTBEAT,
            declare_timeout: DEFAULT_DECLARE_TIMEOUT,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            confirm_mode: true,
        }
    }
}

impl RabbitMQConnectionArgs {
    pub fn builder() -> RabbitMQConnectionArgsBuilder {
        RabbitMQConnectionArgsBuilder::default()
    }

    pub fn base(&self) -> &ConnectionArgs {
        &self.base
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Timeout of each topology declaration or deletion.
    pub fn declare_timeout(&self) -> Duration {
        self.declare_timeout
    }

    /// Unacknowledged deliveries allowed per channel, 0 for no limit.
    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    pub fn confirm_mode(&self) -> bool {
        self.confirm_mode
    }

    /// The explicit URI if one was set, otherwise one derived from the
    /// endpoint, vhost and heartbeat.
    pub fn uri(&self) -> Result<String, ArgsError> {
        if let Some(uri) = &self.uri {
            check_uri(DRIVER, uri, &["amqp", "amqps"])?;
            return Ok(uri.clone());
        }

        let vhost = match self.vhost.as_str() {
            "/" | "" => String::new(),
            vhost => vhost.replace('/', "%2f"),
        };
        let uri = self.endpoint.to_uri(DRIVER, "amqp", &vhost)?;
        Ok(format!("{uri}?heartbeat={}", self.heartbeat.as_secs()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RabbitMQConnectionArgsBuilder {
    args: RabbitMQConnectionArgs,
}

impl RabbitMQConnectionArgsBuilder {
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

    /// Overrides the derived URI. Heartbeat is then taken from the URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.args.uri = Some(uri.into());
        self
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.args.vhost = vhost.into();
        self
    }

    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.args.heartbeat = heartbeat;
        self
    }

    pub fn declare_timeout(mut self, timeout: Duration) -> Self {
        self.args.declare_timeout = timeout;
        self
    }

    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.args.prefetch_count = count;
        self
    }

    pub fn confirm_mode(mut self, enabled: bool) -> Self {
        self.args.confirm_mode = enabled;
        self
    }

    pub fn build(self) -> RabbitMQConnectionArgs {
        self.args
    }
}
