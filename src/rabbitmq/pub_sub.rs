use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::channel::{AmqpChannel, MessageHeaders};
use super::client::RabbitMQClient;
use super::consumer::{Consumer, ReceivedMessage};
use super::errors::MessagingError;
use super::options::{ConsumeAction, ExchangeKind, ExchangeOptions, QueueBindings, QueueOptions};
use super::proxy::RabbitMQConnectionProxy;
use super::publisher::Publisher;
use super::topology::Topology;
use crate::common::proxy::ConnectionProxy;

fn topic_exchange(topic: &str) -> ExchangeOptions {
    ExchangeOptions::persistent(topic, ExchangeKind::Topic)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes notifications on topics. A topic is a durable topic exchange
/// and messages are routed with the topic name as routing key.
pub struct PubSubPublisher<P: ConnectionProxy = RabbitMQConnectionProxy> {
    topology: Topology<P>,
    publisher: Publisher<P>,
    main_topic: Mutex<Option<String>>,
}

impl<P> PubSubPublisher<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>) -> Self {
        Self {
            topology: Topology::new(client.clone()),
            publisher: Publisher::new(client),
            main_topic: Mutex::new(None),
        }
    }

    pub fn set_main_topic(&self, topic: impl Into<String>) {
        *lock(&self.main_topic) = Some(topic.into());
    }

    fn main_topic(&self) -> Result<String, MessagingError<P::Error>> {
        lock(&self.main_topic).clone().ok_or(MessagingError::MainTopicNotSet)
    }

    pub async fn declare_topic(&self, topic: &str) -> Result<(), MessagingError<P::Error>> {
        self.topology.declare_exchange(&topic_exchange(topic)).await
    }

    pub async fn remove_topic(&self, topic: &str) -> Result<(), MessagingError<P::Error>> {
        self.topology.delete_exchange(topic).await
    }

    /// Publishes `message` to every subscriber of `topic` and returns its
    /// message id. Fails with `Unroutable` when nobody subscribed.
    pub async fn notify(&self, topic: &str, message: impl AsRef<[u8]>) -> Result<String, MessagingError<P::Error>> {
        self.publisher
            .publish(topic, topic, message, MessageHeaders::new())
            .await
    }

    pub async fn declare_main_topic(&self) -> Result<(), MessagingError<P::Error>> {
        let topic = self.main_topic()?;
        self.declare_topic(&topic).await
    }

    /// Deletes the main topic's exchange and unsets the main topic.
    pub async fn remove_main_topic(&self) -> Result<(), MessagingError<P::Error>> {
        let topic = lock(&self.main_topic).take().ok_or(MessagingError::MainTopicNotSet)?;
        self.remove_topic(&topic).await
    }

    pub async fn notify_main_topic(&self, message: impl AsRef<[u8]>) -> Result<String, MessagingError<P::Error>> {
        let topic = self.main_topic()?;
        self.notify(&topic, message).await
    }
}

/// Receives notifications published on topics.
///
/// Every subscribed topic gets its own exclusive, non-durable queue named
/// `{topic}_{subscriber id}`, so each subscriber sees every notification.
pub struct Subscriber<P: ConnectionProxy = RabbitMQConnectionProxy> {
    id: Uuid,
    topology: Topology<P>,
    consumer: Consumer<P>,
    queues: Mutex<HashMap<String, String>>,
    main_topic: Mutex<Option<String>>,
}

impl<P> Subscriber<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>) -> Self {
        let topology = Topology::new(client.clone());
        Self {
            id: Uuid::new_v4(),
            consumer: Consumer::new(client).with_topology(topology.clone()),
            topology,
            queues: Mutex::new(HashMap::new()),
            main_topic: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue receiving `topic`'s notifications, once subscribed.
    pub fn queue_name(&self, topic: &str) -> Option<String> {
        lock(&self.queues).get(topic).cloned()
    }

    pub fn set_main_topic(&self, topic: impl Into<String>) {
        *lock(&self.main_topic) = Some(topic.into());
    }

    fn main_topic(&self) -> Result<String, MessagingError<P::Error>> {
        lock(&self.main_topic).clone().ok_or(MessagingError::MainTopicNotSet)
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), MessagingError<P::Error>> {
        let queue = lock(&self.queues)
            .entry(topic.to_string())
            .or_insert_with(|| format!("{topic}_{}", self.id))
            .clone();
        self.bind_queue(topic, &queue).await?;
        info!(topic, queue = %queue, "Subscribed");
        Ok(())
    }

    /// Forgets `topic` and deletes its queue.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MessagingError<P::Error>> {
        let Some(queue) = lock(&self.queues).remove(topic) else {
            return Ok(());
        };
        self.topology.delete_queue(&queue).await?;
        info!(topic, queue = %queue, "Unsubscribed");
        Ok(())
    }

    /// Hands every notification of `topic` to `handler` until `ctx` is
    /// canceled. Notifications are always accepted.
    pub async fn listening<F, Fut>(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        mut handler: F,
    ) -> Result<(), MessagingError<P::Error>>
    where
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let queue = self
            .queue_name(topic)
            .ok_or_else(|| MessagingError::TopicNotSubscribed(topic.to_string()))?;
        self.bind_queue(topic, &queue).await?;

        self.consumer
            .consuming(ctx, &queue, move |message| {
                let handled = handler(message);
                async move {
                    handled.await;
                    ConsumeAction::Accept
                }
            })
            .await
    }

    pub async fn subscribe_main_topic(&self) -> Result<(), MessagingError<P::Error>> {
        let topic = self.main_topic()?;
        self.subscribe(&topic).await
    }

    pub async fn unsubscribe_main_topic(&self) -> Result<(), MessagingError<P::Error>> {
        let topic = lock(&self.main_topic).take().ok_or(MessagingError::MainTopicNotSet)?;
        self.unsubscribe(&topic).await
    }

    pub async fn listening_main_topic<F, Fut>(&self, ctx: &CancellationToken, handler: F) -> Result<(), MessagingError<P::Error>>
    where
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let topic = self.main_topic()?;
        self.listening(ctx, &topic, handler).await
    }

    async fn bind_queue(&self, topic: &str, queue: &str) -> Result<(), MessagingError<P::Error>> {
        self.topology.declare_exchange(&topic_exchange(topic)).await?;
        self.topology
            .declare_queue(
                &QueueOptions::non_persistent(queue).exclusive(),
                &QueueBindings::new().bind(topic, topic),
            )
            .await
    }
}
