use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{BasicQosOptions, ConfirmSelectOptions};
use lapin::protocol::AMQPErrorKind;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info};

use super::connection_args::{RabbitMQConnectionArgs, DRIVER};
use crate::common::connection_args::ConnectionArgs;
use crate::common::errors::ArgsError;
use crate::common::proxy::{is_network_error_message, is_network_io_error, ConnectionProxy};

/// Broker proxy. One TCP connection is shared by every client of the
/// manager; each client gets its own channel.
pub struct RabbitMQConnectionProxy {
    args: RabbitMQConnectionArgs,
    uri: String,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl RabbitMQConnectionProxy {
    pub fn args(&self) -> &RabbitMQConnectionArgs {
        &self.args
    }

    async fn shared_connection(&self) -> Result<Arc<Connection>, lapin::Error> {
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(Arc::clone(connection));
            }
        }

        debug!(host = %self.args.endpoint().host, "Opening broker connection");
        let connect = Connection::connect(&self.uri, ConnectionProperties::default());
        let connection = time::timeout(self.args.base().connection_timeout(), connect)
            .await
            .map_err(|_| timed_out("broker connection timed out"))??;

        let connection = Arc::new(connection);
        *guard = Some(Arc::clone(&connection));
        info!(host = %self.args.endpoint().host, "Broker connection established");
        Ok(connection)
    }
}

fn timed_out(message: &str) -> lapin::Error {
    lapin::Error::IOError(Arc::new(io::Error::new(io::ErrorKind::TimedOut, message.to_string())))
}

#[async_trait]
impl ConnectionProxy for RabbitMQConnectionProxy {
    type Args = RabbitMQConnectionArgs;
    type Connection = Channel;
    type Error = lapin::Error;

    fn validate(args: RabbitMQConnectionArgs) -> Result<Self, ArgsError> {
        let uri = args.uri()?;
        Ok(Self {
            args,
            uri,
            connection: Mutex::new(None),
        })
    }

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn connection_args(&self) -> &ConnectionArgs {
        self.args.base()
    }

    async fn create_connection(&self) -> Result<Channel, lapin::Error> {
        let connection = self.shared_connection().await?;
        let channel = time::timeout(self.args.base().connection_timeout(), connection.create_channel())
            .await
            .map_err(|_| timed_out("opening broker channel timed out"))??;

        if self.args.prefetch_count() > 0 {
            channel
                .basic_qos(self.args.prefetch_count(), BasicQosOptions::default())
                .await?;
        }

        if self.args.confirm_mode() {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
        }

        debug!(channel_id = channel.id(), prefetch = self.args.prefetch_count(), "Channel created");
        Ok(channel)
    }

    async fn ping(&self, channel: &Channel) -> Result<(), lapin::Error> {
        if channel.status().connected() {
            Ok(())
        } else {
            Err(lapin::Error::IOError(Arc::new(io::Error::new(
                io::ErrorKind::NotConnected,
                "channel is closed",
            ))))
        }
    }

    fn is_network_error(&self, err: &lapin::Error) -> bool {
        match err {
            lapin::Error::IOError(err) => is_network_io_error(err) || err.kind() == io::ErrorKind::NotConnected,
            lapin::Error::InvalidChannelState(..) | lapin::Error::InvalidConnectionState(..) => true,
            lapin::Error::ProtocolError(amqp) => matches!(amqp.kind(), AMQPErrorKind::Hard(_)),
            other => is_network_error_message(&other.to_string()),
        }
    }

    fn close_connection(&self, channel: Channel) {
        tokio::spawn(async move {
            if !channel.status().connected() {
                return;
            }
            if let Err(err) = channel.close(200, "closing channel").await {
                debug!(channel_id = channel.id(), error = %err, "Closing channel failed");
            }
        });
    }

    async fn close_all(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            info!("Closing broker connection");
            if let Err(err) = connection.close(200, "closing connection").await {
                debug!(error = %err, "Closing broker connection failed");
            }
        }
    }
}
