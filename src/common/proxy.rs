use async_trait::async_trait;
use std::error::Error as StdError;
use std::io;

use super::connection_args::ConnectionArgs;
use super::errors::ArgsError;

/// Driver specific primitives used by `ConnectionManager`.
///
/// A proxy is the only place that knows how to open, probe and close a raw
/// connection for one backing store, and which of its errors mean the
/// transport is gone.
#[async_trait]
pub trait ConnectionProxy: Send + Sync + 'static {
    /// Driver arguments accepted by `validate`.
    type Args: Send;
    /// Raw connection handed to closures. Cloning must be cheap.
    type Connection: Clone + Send + Sync + 'static;
    type Error: StdError + Send + Sync + 'static;

    /// Checks the arguments, derives the connection URI when none was set
    /// and returns a ready proxy.
    fn validate(args: Self::Args) -> Result<Self, ArgsError>
    where
        Self: Sized;

    /// Short driver label used in logs.
    fn name(&self) -> &'static str;

    fn connection_args(&self) -> &ConnectionArgs;

    /// Opens one raw connection, reusing the underlying transport while it
    /// is still alive.
    async fn create_connection(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap liveness probe.
    async fn ping(&self, connection: &Self::Connection) -> Result<(), Self::Error>;

    /// Decides whether `execute_closure` retries through reconnection.
    fn is_network_error(&self, err: &Self::Error) -> bool;

    /// Best effort and never blocks the caller.
    fn close_connection(&self, connection: Self::Connection);

    /// Releases the shared transport, if the driver keeps one.
    async fn close_all(&self) {}
}

const NETWORK_ERROR_FRAGMENTS: &[&str] = &[
    "broken pipe",
    "connection reset",
    "connection refused",
    "connection closed",
    "connection aborted",
    "i/o timeout",
    "timed out",
    "unexpected eof",
    "end of file",
];

/// Fallback classification for drivers whose errors only carry a message.
pub fn is_network_error_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NETWORK_ERROR_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
}

pub fn is_network_io_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
    ) || is_network_error_message(&err.to_string())
}
