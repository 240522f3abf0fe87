use crate::common::connection_args::{check_uri, ConnectionArgs, Endpoint};
use crate::common::errors::ArgsError;

pub const DRIVER: &str = "mongodb";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 27017;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConnectionArgs {
    base: ConnectionArgs,
    endpoint: Endpoint,
    uri: Option<String>,
    app_name: Option<String>,
}

impl Default for MongoConnectionArgs {
    fn default() -> Self {
        Self {
            base: ConnectionArgs::default(),
            endpoint: Endpoint::new(DEFAULT_HOST, DEFAULT_PORT),
            uri: None,
            app_name: None,
        }
    }
}

impl MongoConnectionArgs {
    pub fn builder() -> MongoConnectionArgsBuilder {
        MongoConnectionArgsBuilder::default()
    }

    pub fn base(&self) -> &ConnectionArgs {
        &self.base
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub fn uri(&self) -> Result<String, ArgsError> {
        if let Some(uri) = &self.uri {
            check_uri(DRIVER, uri, &["mongodb", "mongodb+srv"])?;
            return Ok(uri.clone());
        }
        self.endpoint.to_uri(DRIVER, "mongodb", "")
    }
}

#[derive(Debug, Clone, Default)]
pub struct MongoConnectionArgsBuilder {
    args: MongoConnectionArgs,
}

impl MongoConnectionArgsBuilder {
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

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.args.uri = Some(uri.into());
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.args.app_name = Some(name.into()).filter(|n| !n.is_empty());
        self
    }

    pub fn build(self) -> MongoConnectionArgs {
        self.args
    }
}
