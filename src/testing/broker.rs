//! In-memory AMQP broker with exchanges, queues, bindings and consumers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{FakeConnection, FakeConnectionProxy, FakeError, FakeNetwork};
use crate::common::connection_args::ConnectionArgs;
use crate::rabbitmq::channel::{AmqpChannel, AmqpDelivery, DeliveryStream, MessageHeaders, PublishConfirm, CONTENT_TYPE, MESSAGE_ID_HEADER};
use crate::rabbitmq::client::RabbitMQConnectionBuilder;
use crate::rabbitmq::options::{ConsumeAction, ExchangeKind, ExchangeOptions, QueueOptions};

pub type BrokerProxy = FakeConnectionProxy<FakeChannel>;
pub type BrokerBuilder = RabbitMQConnectionBuilder<BrokerProxy>;

/// Builder whose channels live on `broker`, with short waits so outages
/// resolve quickly in tests.
pub fn broker_builder(broker: &FakeBroker, ctx: CancellationToken) -> BrokerBuilder {
    let args = ConnectionArgs::builder()
        .connection_timeout(Duration::from_secs(1))
        .connection_retry_wait(Duration::from_millis(20))
        .operation_retry_wait(Duration::from_millis(20))
        .read_timeout(Duration::from_secs(3))
        .write_timeout(Duration::from_secs(3))
        .build();
    let owner = broker.clone();
    let proxy = FakeConnectionProxy::with_opener(args, Arc::clone(broker.network()), move |_| owner.open_channel());
    RabbitMQConnectionBuilder::with_proxy(ctx, proxy, Duration::from_secs(2))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
    pub persistent: bool,
    pub content_type: String,
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub body: Vec<u8>,
    pub action: ConsumeAction,
    pub redelivered: bool,
    pub message_id: Option<String>,
}

type DeliverySender = mpsc::UnboundedSender<Result<FakeDelivery, FakeError>>;

struct Subscription {
    channel: u64,
    sender: DeliverySender,
}

struct Queue {
    durable: bool,
    exclusive: bool,
    messages: VecDeque<StoredMessage>,
    consumers: Vec<Subscription>,
    next_consumer: usize,
}

struct Exchange {
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    settled: Vec<Settlement>,
    failing_settlements: usize,
}

impl BrokerState {
    fn remove_queue(&mut self, name: &str) {
        self.queues.remove(name);
        self.bindings.retain(|b| b.queue != name);
    }

    fn remove_exchange(&mut self, name: &str) {
        self.exchanges.remove(name);
        self.bindings.retain(|b| b.exchange != name);
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, FakeError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect());
        }
        let kind = self
            .exchanges
            .get(exchange)
            .map(|e| e.kind)
            .ok_or_else(|| not_found("exchange", exchange))?;

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();
        Ok(targets)
    }
}

fn not_found(what: &str, name: &str) -> FakeError {
    FakeError::Application(format!("NOT_FOUND - no {what} '{name}'"))
}

fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// Shared broker state. Clones observe the same exchanges and queues.
#[derive(Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
    network: Arc<FakeNetwork>,
    next_channel: Arc<AtomicU64>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            network: FakeNetwork::online(),
            next_channel: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn network(&self) -> &Arc<FakeNetwork> {
        &self.network
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    fn open_channel(&self) -> FakeChannel {
        FakeChannel {
            id: self.next_channel.fetch_add(1, Ordering::SeqCst) + 1,
            broker: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    pub fn is_bound(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.state()
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.routing_key == routing_key)
    }

    /// Enqueues a message directly, bypassing exchanges.
    pub fn inject(&self, queue: &str, body: &str, message_id: Option<&str>) {
        let mut headers = MessageHeaders::new();
        if let Some(id) = message_id {
            headers.insert(MESSAGE_ID_HEADER.to_string(), id.to_string());
        }
        let message = StoredMessage {
            body: body.as_bytes().to_vec(),
            headers,
            persistent: true,
            content_type: CONTENT_TYPE.to_string(),
            redelivered: false,
        };
        let mut state = self.state();
        if let Some(q) = state.queues.get_mut(queue) {
            q.messages.push_back(message);
        }
        self.dispatch(&mut state, queue);
    }

    /// Messages waiting in `queue`, not yet handed to a consumer.
    pub fn queued(&self, queue: &str) -> Vec<StoredMessage> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn settled(&self) -> Vec<Settlement> {
        self.state().settled.clone()
    }

    /// The next `count` acks, nacks or rejects fail with a network error and
    /// their message is redelivered.
    pub fn fail_next_settlements(&self, count: usize) {
        self.state().failing_settlements = count;
    }

    /// Cancels every consumer, ending their delivery streams.
    pub fn drop_consumers(&self) {
        for queue in self.state().queues.values_mut() {
            queue.consumers.clear();
        }
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.consumers.iter().filter(|c| !c.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drops everything that would not survive a broker connection loss:
    /// non-durable exchanges and non-durable or exclusive queues.
    pub fn reset_transient(&self) {
        let mut state = self.state();
        let queues: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| !q.durable || q.exclusive)
            .map(|(name, _)| name.clone())
            .collect();
        for name in queues {
            state.remove_queue(&name);
        }
        let exchanges: Vec<String> = state
            .exchanges
            .iter()
            .filter(|(_, e)| !e.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in exchanges {
            state.remove_exchange(&name);
        }
    }

    fn drop_channel_consumers(&self, channel: u64) {
        for queue in self.state().queues.values_mut() {
            queue.consumers.retain(|c| c.channel != channel);
        }
    }

    /// Hands queued messages to consumers round-robin.
    fn dispatch(&self, state: &mut BrokerState, queue: &str) {
        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };
        q.consumers.retain(|c| !c.sender.is_closed());
        while !q.consumers.is_empty() {
            let Some(message) = q.messages.pop_front() else {
                break;
            };
            let index = q.next_consumer % q.consumers.len();
            q.next_consumer = q.next_consumer.wrapping_add(1);
            let delivery = FakeDelivery {
                queue: queue.to_string(),
                message,
                broker: self.clone(),
            };
            if let Err(err) = q.consumers[index].sender.unbounded_send(Ok(delivery)) {
                if let Ok(delivery) = err.into_inner() {
                    q.messages.push_front(delivery.message);
                }
                q.consumers.remove(index);
            }
        }
    }

    fn settle(&self, delivery: &FakeDelivery, action: ConsumeAction) -> Result<(), FakeError> {
        self.network.check()?;
        let mut state = self.state();

        if state.failing_settlements > 0 {
            state.failing_settlements -= 1;
            self.requeue(&mut state, delivery);
            return Err(FakeError::Network);
        }

        state.settled.push(Settlement {
            body: delivery.message.body.clone(),
            action,
            redelivered: delivery.message.redelivered,
            message_id: delivery.message_id(),
        });
        if action == ConsumeAction::Requeue {
            self.requeue(&mut state, delivery);
        }
        Ok(())
    }

    fn requeue(&self, state: &mut BrokerState, delivery: &FakeDelivery) {
        let mut message = delivery.message.clone();
        message.redelivered = true;
        if let Some(q) = state.queues.get_mut(&delivery.queue) {
            q.messages.push_front(message);
        }
        self.dispatch(state, &delivery.queue);
    }
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel on a `FakeBroker`. Every operation fails with a network error
/// while the broker's network is down or after the channel was closed.
#[derive(Clone)]
pub struct FakeChannel {
    id: u64,
    broker: FakeBroker,
    open: Arc<AtomicBool>,
}

impl FakeChannel {
    fn check(&self) -> Result<(), FakeError> {
        if !self.is_open() {
            return Err(FakeError::Network);
        }
        self.broker.network.check()
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.broker.drop_channel_consumers(self.id);
    }
}

impl FakeConnection for FakeChannel {
    fn on_close(&self) {
        self.close();
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    type Error = FakeError;
    type Delivery = FakeDelivery;

    async fn declare_exchange(&self, exchange: &ExchangeOptions) -> Result<(), FakeError> {
        self.check()?;
        self.broker
            .state()
            .exchanges
            .entry(exchange.name().to_string())
            .or_insert(Exchange {
                kind: exchange.kind(),
                durable: exchange.durable(),
            });
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), FakeError> {
        self.check()?;
        self.broker.state().remove_exchange(name);
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueOptions) -> Result<(), FakeError> {
        self.check()?;
        self.broker
            .state()
            .queues
            .entry(queue.name().to_string())
            .or_insert(Queue {
                durable: queue.durable(),
                exclusive: queue.is_exclusive(),
                messages: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            });
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), FakeError> {
        self.check()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(not_found("queue", queue));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(not_found("exchange", exchange));
        }
        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn delete_queue(&self, name: &str, if_unused: bool, if_empty: bool) -> Result<(), FakeError> {
        self.check()?;
        let mut state = self.broker.state();
        let Some(queue) = state.queues.get(name) else {
            return Ok(());
        };
        if if_unused && queue.consumers.iter().any(|c| !c.sender.is_closed()) {
            return Err(FakeError::Application(format!("PRECONDITION_FAILED - queue '{name}' in use")));
        }
        if if_empty && !queue.messages.is_empty() {
            return Err(FakeError::Application(format!("PRECONDITION_FAILED - queue '{name}' not empty")));
        }
        state.remove_queue(name);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        headers: &MessageHeaders,
    ) -> Result<PublishConfirm, FakeError> {
        self.check()?;
        let mut state = self.broker.state();
        let targets = state.route(exchange, routing_key)?;
        if targets.is_empty() {
            return Ok(PublishConfirm::Returned);
        }

        let message = StoredMessage {
            body: body.to_vec(),
            headers: headers.clone(),
            persistent: true,
            content_type: CONTENT_TYPE.to_string(),
            redelivered: false,
        };
        for target in &targets {
            if let Some(queue) = state.queues.get_mut(target) {
                queue.messages.push_back(message.clone());
            }
            self.broker.dispatch(&mut state, target);
        }
        Ok(PublishConfirm::Ack)
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream<FakeDelivery, FakeError>, FakeError> {
        self.check()?;
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.broker.state();
        let q = state.queues.get_mut(queue).ok_or_else(|| not_found("queue", queue))?;
        q.consumers.push(Subscription { channel: self.id, sender });
        self.broker.dispatch(&mut state, queue);
        Ok(receiver.boxed())
    }

    async fn close_channel(&self) -> Result<(), FakeError> {
        self.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

pub struct FakeDelivery {
    queue: String,
    message: StoredMessage,
    broker: FakeBroker,
}

#[async_trait]
impl AmqpDelivery for FakeDelivery {
    type Error = FakeError;

    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn headers(&self) -> MessageHeaders {
        self.message.headers.clone()
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    async fn ack(&self) -> Result<(), FakeError> {
        self.broker.settle(self, ConsumeAction::Accept)
    }

    async fn requeue(&self) -> Result<(), FakeError> {
        self.broker.settle(self, ConsumeAction::Requeue)
    }

    async fn reject(&self) -> Result<(), FakeError> {
        self.broker.settle(self, ConsumeAction::Reject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_patterns() {
        assert!(topic_matches("orders.*", "orders.created"));
        assert!(!topic_matches("orders.*", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders.created.eu"));
        assert!(topic_matches("orders.#", "orders"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("invoices.*", "orders.created"));
    }
}
