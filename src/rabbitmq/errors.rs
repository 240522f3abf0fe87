// src/rabbitmq/errors.rs

use std::error::Error as StdError;
use thiserror::Error;

use crate::common::errors::ClientError;

#[derive(Debug, Error)]
pub enum MessagingError<E: StdError + 'static> {
    #[error(transparent)]
    Client(#[from] ClientError<E>),

    #[error("failed to bind queue '{queue}' to exchange '{exchange}' with routing key '{routing_key}': {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        source: E,
    },

    #[error("message to exchange '{exchange}' with routing key '{routing_key}' was returned unroutable")]
    Unroutable { exchange: String, routing_key: String },

    #[error("broker did not confirm message to exchange '{exchange}'")]
    Nacked { exchange: String },

    #[error("main topic is not set")]
    MainTopicNotSet,

    #[error("not subscribed to topic '{0}'")]
    TopicNotSubscribed(String),
}

impl<E: StdError + 'static> MessagingError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MessagingError::Client(err) if err.is_timeout())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, MessagingError::Client(err) if err.is_canceled())
    }
}
