use tracing::debug;
use uuid::Uuid;

use super::channel::{AmqpChannel, MessageHeaders, PublishConfirm, MESSAGE_ID_HEADER};
use super::client::RabbitMQClient;
use super::errors::MessagingError;
use super::proxy::RabbitMQConnectionProxy;
use crate::common::proxy::ConnectionProxy;

/// Publishes persistent, mandatory-routed messages and waits for the
/// broker's confirmation.
pub struct Publisher<P: ConnectionProxy = RabbitMQConnectionProxy> {
    client: RabbitMQClient<P>,
}

impl<P: ConnectionProxy> Clone for Publisher<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<P> Publisher<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>) -> Self {
        Self { client }
    }

    /// Publishes `message` to the `topic` exchange and returns its message id.
    ///
    /// A `message_id` header is generated when the caller did not set one.
    /// Other headers are passed through untouched.
    pub async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        message: impl AsRef<[u8]>,
        mut headers: MessageHeaders,
    ) -> Result<String, MessagingError<P::Error>> {
        let message_id = headers
            .entry(MESSAGE_ID_HEADER.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let body = message.as_ref();
        let headers = &headers;
        let confirm = self
            .client
            .execute_closure(self.client.write_timeout(), move |channel| async move {
                channel.publish(topic, routing_key, body, headers).await
            })
            .await?;

        match confirm {
            PublishConfirm::Ack | PublishConfirm::NotRequested => {
                debug!(exchange = topic, routing_key, message_id = %message_id, "Message published");
                Ok(message_id)
            }
            PublishConfirm::Returned => Err(MessagingError::Unroutable {
                exchange: topic.to_string(),
                routing_key: routing_key.to_string(),
            }),
            PublishConfirm::Nack => Err(MessagingError::Nacked {
                exchange: topic.to_string(),
            }),
        }
    }
}
