use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::channel::{AmqpChannel, MessageHeaders};
use super::client::RabbitMQClient;
use super::consumer::{Consumer, ReceivedMessage};
use super::errors::MessagingError;
use super::options::{ConsumeAction, ExchangeKind, ExchangeOptions, QueueBindings, QueueOptions};
use super::proxy::RabbitMQConnectionProxy;
use super::publisher::Publisher;
use super::topology::Topology;
use crate::common::proxy::ConnectionProxy;

/// A durable work queue: a direct exchange and a queue sharing one name,
/// bound with that name as routing key.
pub struct TaskQueue<P: ConnectionProxy = RabbitMQConnectionProxy> {
    topology: Topology<P>,
    queue: String,
}

impl<P> TaskQueue<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>, queue: impl Into<String>) -> Self {
        Self {
            topology: Topology::new(client),
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn topology(&self) -> &Topology<P> {
        &self.topology
    }

    pub async fn declare(&self) -> Result<(), MessagingError<P::Error>> {
        self.topology
            .declare_exchange(&ExchangeOptions::persistent(&self.queue, ExchangeKind::Direct))
            .await?;
        self.topology
            .declare_queue(
                &QueueOptions::persistent(&self.queue),
                &QueueBindings::new().bind(&self.queue, &self.queue),
            )
            .await?;
        info!(queue = %self.queue, "Task queue declared");
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), MessagingError<P::Error>> {
        self.topology.delete_exchange(&self.queue).await?;
        self.topology.delete_queue(&self.queue).await?;
        info!(queue = %self.queue, "Task queue removed");
        Ok(())
    }
}

pub struct TaskProducer<P: ConnectionProxy = RabbitMQConnectionProxy> {
    publisher: Publisher<P>,
    queue: String,
}

impl<P> TaskProducer<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>, queue: impl Into<String>) -> Self {
        Self {
            publisher: Publisher::new(client),
            queue: queue.into(),
        }
    }

    /// Enqueues a serialized task and returns its message id.
    pub async fn push(&self, task: impl AsRef<[u8]>) -> Result<String, MessagingError<P::Error>> {
        self.publisher
            .publish(&self.queue, &self.queue, task, MessageHeaders::new())
            .await
    }
}

pub struct TaskConsumer<P: ConnectionProxy = RabbitMQConnectionProxy> {
    consumer: Consumer<P>,
    queue: String,
}

impl<P> TaskConsumer<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>, queue: impl Into<String>) -> Self {
        Self {
            consumer: Consumer::new(client),
            queue: queue.into(),
        }
    }

    /// Redeclares `task_queue` whenever the connection was reset.
    pub fn with_task_queue(mut self, task_queue: &TaskQueue<P>) -> Self {
        self.consumer = self.consumer.with_topology(task_queue.topology().clone());
        self
    }

    /// Hands every task to `handler` until `ctx` is canceled. Tasks are
    /// accepted once the handler returns.
    pub async fn consuming<F, Fut>(&self, ctx: &CancellationToken, mut handler: F) -> Result<(), MessagingError<P::Error>>
    where
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        self.consumer
            .consuming(ctx, &self.queue, move |message| {
                let handled = handler(message);
                async move {
                    handled.await;
                    ConsumeAction::Accept
                }
            })
            .await
    }
}
