// Driver-agnostic connection layer shared by every backing store
pub mod builder;
pub mod client;
pub mod connection;
pub mod connection_args;
pub mod errors;
pub mod proxy;

// Re-export specific items to simplify imports elsewhere
pub use builder::ConnectionBuilder;
pub use client::Client;
pub use connection::ConnectionManager;
pub use connection_args::{ConnectionArgs, Endpoint};
pub use errors::{ArgsError, ClientError};
pub use proxy::ConnectionProxy;
