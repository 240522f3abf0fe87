use std::collections::BTreeMap;
use std::error::Error as StdError;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicRejectOptions, ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions,
    QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};

use super::options::{ExchangeOptions, QueueOptions};

/// Header carrying the id used to de-duplicate confirmation retries.
pub const MESSAGE_ID_HEADER: &str = "message_id";
pub const CONTENT_TYPE: &str = "text/plain";
const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub type MessageHeaders = BTreeMap<String, String>;

pub type DeliveryStream<D, E> = BoxStream<'static, Result<D, E>>;

/// Outcome of a mandatory publish on a channel in confirm mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishConfirm {
    Ack,
    /// Acked, but no queue matched the routing key.
    Returned,
    Nack,
    /// The channel is not in confirm mode.
    NotRequested,
}

/// Broker operations used by the messaging layer, implemented by
/// `lapin::Channel`.
#[async_trait]
pub trait AmqpChannel: Clone + Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;
    type Delivery: AmqpDelivery<Error = Self::Error>;

    async fn declare_exchange(&self, exchange: &ExchangeOptions) -> Result<(), Self::Error>;

    async fn delete_exchange(&self, name: &str) -> Result<(), Self::Error>;

    async fn declare_queue(&self, queue: &QueueOptions) -> Result<(), Self::Error>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), Self::Error>;

    async fn delete_queue(&self, name: &str, if_unused: bool, if_empty: bool) -> Result<(), Self::Error>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: &MessageHeaders,
    ) -> Result<PublishConfirm, Self::Error>;

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream<Self::Delivery, Self::Error>, Self::Error>;

    async fn close_channel(&self) -> Result<(), Self::Error>;

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait AmqpDelivery: Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    fn body(&self) -> &[u8];

    fn headers(&self) -> MessageHeaders;

    fn message_id(&self) -> Option<String> {
        self.headers().remove(MESSAGE_ID_HEADER)
    }

    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), Self::Error>;

    async fn requeue(&self) -> Result<(), Self::Error>;

    async fn reject(&self) -> Result<(), Self::Error>;
}

pub(crate) fn headers_to_table(headers: &MessageHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
    }
    table
}

pub(crate) fn headers_from_table(table: &FieldTable) -> MessageHeaders {
    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
                AMQPValue::ShortString(value) => value.as_str().to_owned(),
                _ => return None,
            };
            Some((key.as_str().to_owned(), value))
        })
        .collect()
}

#[async_trait]
impl AmqpChannel for Channel {
    type Error = lapin::Error;
    type Delivery = Delivery;

    async fn declare_exchange(&self, exchange: &ExchangeOptions) -> Result<(), lapin::Error> {
        self.exchange_declare(
            exchange.name(),
            exchange.kind().into(),
            ExchangeDeclareOptions {
                durable: exchange.durable(),
                auto_delete: exchange.auto_delete(),
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), lapin::Error> {
        self.exchange_delete(name, ExchangeDeleteOptions::default()).await
    }

    async fn declare_queue(&self, queue: &QueueOptions) -> Result<(), lapin::Error> {
        self.queue_declare(
            queue.name(),
            QueueDeclareOptions {
                durable: queue.durable(),
                auto_delete: queue.auto_delete(),
                exclusive: queue.is_exclusive(),
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map(|_| ())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), lapin::Error> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
    }

    async fn delete_queue(&self, name: &str, if_unused: bool, if_empty: bool) -> Result<(), lapin::Error> {
        self.queue_delete(
            name,
            QueueDeleteOptions {
                if_unused,
                if_empty,
                ..QueueDeleteOptions::default()
            },
        )
        .await
        .map(|_| ())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: &MessageHeaders,
    ) -> Result<PublishConfirm, lapin::Error> {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type(CONTENT_TYPE.into())
            .with_headers(headers_to_table(headers));
        if let Some(message_id) = headers.get(MESSAGE_ID_HEADER) {
            properties = properties.with_message_id(message_id.clone().into());
        }

        let confirmation = self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..BasicPublishOptions::default()
                },
                body,
                properties,
            )
            .await?
            .await?;

        Ok(match confirmation {
            Confirmation::Ack(None) => PublishConfirm::Ack,
            Confirmation::Ack(Some(_)) => PublishConfirm::Returned,
            Confirmation::Nack(_) => PublishConfirm::Nack,
            Confirmation::NotRequested => PublishConfirm::NotRequested,
        })
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream<Delivery, lapin::Error>, lapin::Error> {
        let consumer = self
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer.boxed())
    }

    async fn close_channel(&self) -> Result<(), lapin::Error> {
        if !self.status().connected() {
            return Ok(());
        }
        self.close(200, "closing channel").await
    }

    fn is_open(&self) -> bool {
        self.status().connected()
    }
}

#[async_trait]
impl AmqpDelivery for Delivery {
    type Error = lapin::Error;

    fn body(&self) -> &[u8] {
        &self.data
    }

    fn headers(&self) -> MessageHeaders {
        self.properties
            .headers()
            .as_ref()
            .map(headers_from_table)
            .unwrap_or_default()
    }

    fn message_id(&self) -> Option<String> {
        self.headers().remove(MESSAGE_ID_HEADER).or_else(|| {
            self.properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_owned())
        })
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<(), lapin::Error> {
        self.acker.ack(BasicAckOptions::default()).await.map(|_| ())
    }

    async fn requeue(&self) -> Result<(), lapin::Error> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            })
            .await
            .map(|_| ())
    }

    async fn reject(&self) -> Result<(), lapin::Error> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
    }
}
