use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{AmqpChannel, AmqpDelivery, DeliveryStream, MessageHeaders};
use super::client::RabbitMQClient;
use super::errors::MessagingError;
use super::options::ConsumeAction;
use super::proxy::RabbitMQConnectionProxy;
use super::topology::Topology;
use crate::common::errors::ClientError;
use crate::common::proxy::ConnectionProxy;

pub const DEFAULT_CONFIRMATION_FAILURE_CAPACITY: usize = 10_000;
pub const DEFAULT_CONFIRMATION_FAILURE_TTL: Duration = Duration::from_secs(600);

/// A delivery as seen by the user handler.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    body: Vec<u8>,
    headers: MessageHeaders,
    message_id: Option<String>,
    redelivered: bool,
    received_at: DateTime<Utc>,
}

impl ReceivedMessage {
    fn from_delivery<D: AmqpDelivery>(delivery: &D) -> Self {
        Self {
            body: delivery.body().to_vec(),
            headers: delivery.headers(),
            message_id: delivery.message_id(),
            redelivered: delivery.redelivered(),
            received_at: Utc::now(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text, `None` if it is not valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

struct FailureRecord {
    action: ConsumeAction,
    recorded_at: Instant,
    seq: u64,
}

/// Messages whose handler ran but whose acknowledgement failed, keyed by
/// message id. Bounded by `capacity` (oldest evicted first) and `ttl`.
struct ConfirmationFailures {
    records: HashMap<String, FailureRecord>,
    order: VecDeque<(u64, String)>,
    next_seq: u64,
    capacity: usize,
    ttl: Duration,
}

impl ConfirmationFailures {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            ttl,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&mut self, message_id: &str) -> Option<ConsumeAction> {
        self.purge(Instant::now());
        self.records.get(message_id).map(|record| record.action)
    }

    fn record(&mut self, message_id: String, action: ConsumeAction) {
        let now = Instant::now();
        self.purge(now);

        while self.records.len() >= self.capacity && !self.records.contains_key(&message_id) {
            match self.order.pop_front() {
                Some((seq, oldest)) => {
                    if self.records.get(&oldest).is_some_and(|r| r.seq == seq) {
                        self.records.remove(&oldest);
                        warn!(message_id = %oldest, "Confirmation failure evicted, a redelivery will be handled again");
                    }
                }
                None => break,
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, message_id.clone()));
        self.records.insert(
            message_id,
            FailureRecord {
                action,
                recorded_at: now,
                seq,
            },
        );
    }

    fn remove(&mut self, message_id: &str) {
        self.records.remove(message_id);
    }

    fn purge(&mut self, now: Instant) {
        while let Some((seq, id)) = self.order.front() {
            let expired = match self.records.get(id) {
                Some(record) if record.seq == *seq => {
                    if now.duration_since(record.recorded_at) < self.ttl {
                        break;
                    }
                    true
                }
                _ => false,
            };
            if expired {
                debug!(message_id = %id, "Confirmation failure expired");
                self.records.remove(id.as_str());
            }
            self.order.pop_front();
        }
    }
}

async fn acknowledge<D: AmqpDelivery>(delivery: &D, action: ConsumeAction) -> Result<(), D::Error> {
    match action {
        ConsumeAction::Accept => delivery.ack().await,
        ConsumeAction::Requeue => delivery.requeue().await,
        ConsumeAction::Reject => delivery.reject().await,
    }
}

/// Consumes one queue and settles every delivery with the action returned
/// by the handler.
///
/// When settling fails after the handler ran, the action is remembered by
/// message id; the broker's redelivery of that message only retries the
/// action and never reaches the handler again.
pub struct Consumer<P: ConnectionProxy = RabbitMQConnectionProxy> {
    client: RabbitMQClient<P>,
    topology: Option<Topology<P>>,
    failure_capacity: usize,
    failure_ttl: Duration,
}

impl<P> Consumer<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>) -> Self {
        Self {
            client,
            topology: None,
            failure_capacity: DEFAULT_CONFIRMATION_FAILURE_CAPACITY,
            failure_ttl: DEFAULT_CONFIRMATION_FAILURE_TTL,
        }
    }

    /// Redeclares `topology` before reopening deliveries after a reconnect.
    pub fn with_topology(mut self, topology: Topology<P>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_confirmation_failure_limits(mut self, capacity: usize, ttl: Duration) -> Self {
        self.failure_capacity = capacity;
        self.failure_ttl = ttl;
        self
    }

    /// Blocks until `ctx` is canceled, reopening the delivery stream
    /// whenever the connection is reset. Returns an error only when the
    /// broker refuses to consume from `queue`.
    pub async fn consuming<F, Fut>(
        &self,
        ctx: &CancellationToken,
        queue: &str,
        mut handler: F,
    ) -> Result<(), MessagingError<P::Error>>
    where
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ConsumeAction> + Send,
    {
        let mut failures = ConfirmationFailures::new(self.failure_capacity, self.failure_ttl);
        let mut reconnected = self.client.subscribe_reconnected();
        if let Some(receiver) = reconnected.as_mut() {
            drop(receiver.borrow_and_update());
        }

        let result = self
            .consume_loop(ctx, queue, &mut handler, &mut failures, &mut reconnected)
            .await;

        // a later call must not inherit the old channel's delivery stream
        self.client.renew_connection().await;
        info!(queue, pending_confirmations = failures.len(), "Consumer stopped");
        result
    }

    async fn consume_loop<F, Fut>(
        &self,
        ctx: &CancellationToken,
        queue: &str,
        handler: &mut F,
        failures: &mut ConfirmationFailures,
        reconnected: &mut Option<watch::Receiver<u64>>,
    ) -> Result<(), MessagingError<P::Error>>
    where
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ConsumeAction> + Send,
    {
        loop {
            let opened = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                opened = self.wait_for_deliveries(queue, reconnected) => opened,
            };
            let (channel, mut deliveries) = match opened {
                Ok(opened) => opened,
                Err(err) if err.is_canceled() => return Ok(()),
                Err(err) => return Err(err),
            };
            info!(queue, "Consuming deliveries");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {
                        if let Err(err) = channel.close_channel().await {
                            debug!(queue, error = %err, "Closing consumer channel failed");
                        }
                        return Ok(());
                    }
                    next = deliveries.next() => next,
                };

                match next {
                    Some(Ok(delivery)) => self.handle_delivery(delivery, handler, failures).await,
                    Some(Err(err)) => {
                        warn!(queue, error = %err, "Delivery stream failed, reopening");
                        break;
                    }
                    None => {
                        warn!(queue, "Delivery stream closed, reopening");
                        break;
                    }
                }
            }

            self.client.notify_network_failure();
        }
    }

    /// Opens a delivery stream, retrying through outages until it succeeds
    /// or the broker refuses the queue.
    async fn wait_for_deliveries(
        &self,
        queue: &str,
        reconnected: &mut Option<watch::Receiver<u64>>,
    ) -> Result<(P::Connection, DeliveryStream<<P::Connection as AmqpChannel>::Delivery, P::Error>), MessagingError<P::Error>> {
        let mut redeclared = false;
        loop {
            if let Err(err) = self.redeclare_after_reconnect(reconnected).await {
                if err.is_timeout() {
                    debug!(queue, "Still waiting to redeclare topology");
                    continue;
                }
                return Err(err);
            }

            let consumer_tag = format!("{queue}-{}", Uuid::new_v4());
            let consumer_tag = consumer_tag.as_str();
            let opened = self
                .client
                .execute_closure(self.client.read_timeout(), move |channel| async move {
                    let deliveries = channel.consume(queue, consumer_tag).await?;
                    Ok((channel, deliveries))
                })
                .await;

            match opened {
                Ok(opened) => return Ok(opened),
                Err(ClientError::OperationTimeout) => {
                    debug!(queue, "Still waiting for deliveries");
                }
                // the queue may have vanished with the old connection
                Err(ClientError::Operation(err)) if !redeclared && self.topology.is_some() => {
                    debug!(queue, error = %err, "Consume refused, redeclaring topology");
                    redeclared = true;
                    if let Some(topology) = &self.topology {
                        topology.redeclare().await?;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn redeclare_after_reconnect(
        &self,
        reconnected: &mut Option<watch::Receiver<u64>>,
    ) -> Result<(), MessagingError<P::Error>> {
        let (Some(topology), Some(receiver)) = (&self.topology, reconnected.as_mut()) else {
            return Ok(());
        };
        if !receiver.has_changed().unwrap_or(false) {
            return Ok(());
        }

        topology.redeclare().await?;
        drop(receiver.borrow_and_update());
        Ok(())
    }

    async fn handle_delivery<D, F, Fut>(&self, delivery: D, handler: &mut F, failures: &mut ConfirmationFailures)
    where
        D: AmqpDelivery,
        F: FnMut(ReceivedMessage) -> Fut + Send,
        Fut: Future<Output = ConsumeAction> + Send,
    {
        let message = ReceivedMessage::from_delivery(&delivery);
        let message_id = message.message_id().map(str::to_string);

        if let Some(id) = message_id.as_deref() {
            if let Some(action) = failures.get(id) {
                debug!(message_id = id, ?action, "Retrying recorded confirmation");
                match acknowledge(&delivery, action).await {
                    Ok(()) => failures.remove(id),
                    Err(err) => warn!(message_id = id, error = %err, "Confirmation retry failed"),
                }
                return;
            }
        }

        let action = handler(message).await;
        if let Err(err) = acknowledge(&delivery, action).await {
            match message_id {
                Some(id) => {
                    warn!(message_id = %id, ?action, error = %err, "Confirmation failed, recorded for retry");
                    failures.record(id, action);
                }
                None => warn!(?action, error = %err, "Confirmation failed for a message without id"),
            }
        }
    }
}
