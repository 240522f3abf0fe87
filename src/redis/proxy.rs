use std::io;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tokio::time;
use tracing::debug;

use super::connection_args::{RedisConnectionArgs, DRIVER};
use crate::common::connection_args::ConnectionArgs;
use crate::common::errors::ArgsError;
use crate::common::proxy::{is_network_error_message, ConnectionProxy};

const NETWORK_ERROR_FRAGMENTS: &[&str] = &["client is closed", "connection pool exhausted", "connection pool timeout"];

/// Cache-store proxy handing out multiplexed connections.
pub struct RedisConnectionProxy {
    args: RedisConnectionArgs,
    client: redis::Client,
}

impl RedisConnectionProxy {
    pub fn args(&self) -> &RedisConnectionArgs {
        &self.args
    }
}

#[async_trait]
impl ConnectionProxy for RedisConnectionProxy {
    type Args = RedisConnectionArgs;
    type Connection = MultiplexedConnection;
    type Error = RedisError;

    fn validate(args: RedisConnectionArgs) -> Result<Self, ArgsError> {
        let uri = args.uri()?;
        let client = redis::Client::open(uri.as_str()).map_err(|err| ArgsError::InvalidUri {
            driver: DRIVER,
            reason: err.to_string(),
        })?;
        Ok(Self { args, client })
    }

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn connection_args(&self) -> &ConnectionArgs {
        self.args.base()
    }

    async fn create_connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let connect = self.client.get_multiplexed_async_connection();
        let connection = time::timeout(self.args.base().connection_timeout(), connect)
            .await
            .map_err(|_| RedisError::from(io::Error::new(io::ErrorKind::TimedOut, "redis connection timed out")))??;
        debug!(host = %self.args.endpoint().host, db = self.args.database(), "Redis connection created");
        Ok(connection)
    }

    async fn ping(&self, connection: &MultiplexedConnection) -> Result<(), RedisError> {
        let mut connection = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }

    fn is_network_error(&self, err: &RedisError) -> bool {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            return true;
        }
        let message = err.to_string();
        is_network_error_message(&message)
            || NETWORK_ERROR_FRAGMENTS
                .iter()
                .any(|fragment| message.contains(fragment))
    }

    fn close_connection(&self, connection: MultiplexedConnection) {
        // the multiplexer task ends once its last handle is dropped
        drop(connection);
    }
}
