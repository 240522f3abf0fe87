// src/common/errors.rs

use std::error::Error as StdError;
use thiserror::Error;

/// Configuration problems detected while validating connection arguments.
/// These are fatal: a builder that returns one never produced a manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("{driver} connection args: host and port must be set")]
    MissingHostOrPort { driver: &'static str },

    #[error("{driver} connection args: invalid connection uri: {reason}")]
    InvalidUri { driver: &'static str, reason: String },
}

/// Error returned by `Client::execute_closure`.
///
/// Network errors never show up here: they are retried until the operation
/// succeeds, fails with an application error, or the timeout elapses.
#[derive(Debug, Error)]
pub enum ClientError<E: StdError + 'static> {
    #[error("operation timed out")]
    OperationTimeout,

    #[error("context canceled")]
    ContextCanceled,

    #[error("client is not attached to a connection manager")]
    ClientDetached,

    #[error(transparent)]
    Operation(E),
}

impl<E: StdError + 'static> ClientError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::OperationTimeout)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ClientError::ContextCanceled)
    }

    /// The application error returned by the closure, if that is what failed.
    pub fn operation(&self) -> Option<&E> {
        match self {
            ClientError::Operation(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            ClientError::Operation(err) => Some(err),
            _ => None,
        }
    }
}
