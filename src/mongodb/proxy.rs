use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::Client;
use tracing::debug;

use super::connection_args::{MongoConnectionArgs, DRIVER};
use crate::common::connection_args::ConnectionArgs;
use crate::common::errors::ArgsError;
use crate::common::proxy::{is_network_error_message, is_network_io_error, ConnectionProxy};

/// Document-store proxy. Each connection is a driver client with its own
/// pool, bounded by the connection timeout for connect and server selection.
pub struct MongoConnectionProxy {
    args: MongoConnectionArgs,
    uri: String,
}

impl MongoConnectionProxy {
    pub fn args(&self) -> &MongoConnectionArgs {
        &self.args
    }
}

#[async_trait]
impl ConnectionProxy for MongoConnectionProxy {
    type Args = MongoConnectionArgs;
    type Connection = Client;
    type Error = MongoError;

    fn validate(args: MongoConnectionArgs) -> Result<Self, ArgsError> {
        let uri = args.uri()?;
        Ok(Self { args, uri })
    }

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn connection_args(&self) -> &ConnectionArgs {
        self.args.base()
    }

    async fn create_connection(&self) -> Result<Client, MongoError> {
        let mut options = ClientOptions::parse(&self.uri).await?;
        options.connect_timeout = Some(self.args.base().connection_timeout());
        options.server_selection_timeout = Some(self.args.base().connection_timeout());
        if let Some(app_name) = self.args.app_name() {
            options.app_name = Some(app_name.to_string());
        }

        let client = Client::with_options(options)?;
        self.ping(&client).await?;
        debug!(host = %self.args.endpoint().host, "MongoDB client connected");
        Ok(client)
    }

    async fn ping(&self, client: &Client) -> Result<(), MongoError> {
        client.database("admin").run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn is_network_error(&self, err: &MongoError) -> bool {
        match &*err.kind {
            ErrorKind::Io(io) => is_network_io_error(io),
            ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. } => true,
            _ => is_network_error_message(&err.to_string()),
        }
    }

    fn close_connection(&self, client: Client) {
        tokio::spawn(async move {
            client.shutdown().immediate(true).await;
        });
    }
}
