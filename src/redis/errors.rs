use std::error::Error as StdError;

use thiserror::Error;

use crate::common::errors::ClientError;

#[derive(Debug, Error)]
pub enum LockError<E: StdError + 'static> {
    #[error("a distributed lock needs at least one resource key")]
    NoResourceKeys,

    #[error("locks have already been acquired")]
    LocksAlreadyAcquired,

    #[error("locks were not acquired before the timeout")]
    LockAcquireTimeout,

    #[error("locks cannot be released before they are acquired")]
    LockReleaseBeforeAcquire,

    #[error("the lock value is empty")]
    LockValueEmpty,

    #[error("lock operation canceled")]
    Canceled,

    #[error(transparent)]
    Client(#[from] ClientError<E>),
}

impl<E: StdError + 'static> LockError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::LockAcquireTimeout | LockError::Client(ClientError::OperationTimeout))
    }
}
