use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::channel::AmqpChannel;
use super::client::RabbitMQClient;
use super::errors::MessagingError;
use super::options::{ExchangeOptions, QueueBindings, QueueOptions};
use super::proxy::RabbitMQConnectionProxy;
use crate::common::proxy::ConnectionProxy;

#[derive(Debug, Clone)]
enum Declaration {
    Exchange(ExchangeOptions),
    Queue(QueueOptions, QueueBindings),
}

impl Declaration {
    fn name(&self) -> &str {
        match self {
            Declaration::Exchange(exchange) => exchange.name(),
            Declaration::Queue(queue, _) => queue.name(),
        }
    }

    fn is_queue(&self) -> bool {
        matches!(self, Declaration::Queue(..))
    }
}

/// Exchanges, queues and bindings declared through one broker client.
///
/// Successful declarations are remembered in order so they can be
/// replayed with `redeclare` once the manager has reconnected. Clones
/// share the record.
pub struct Topology<P: ConnectionProxy = RabbitMQConnectionProxy> {
    client: RabbitMQClient<P>,
    declared: Arc<Mutex<Vec<Declaration>>>,
}

impl<P: ConnectionProxy> Clone for Topology<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            declared: Arc::clone(&self.declared),
        }
    }
}

impl<P> Topology<P>
where
    P: ConnectionProxy,
    P::Connection: AmqpChannel<Error = P::Error>,
{
    pub fn new(client: RabbitMQClient<P>) -> Self {
        Self {
            client,
            declared: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn client(&self) -> &RabbitMQClient<P> {
        &self.client
    }

    fn declared(&self) -> MutexGuard<'_, Vec<Declaration>> {
        self.declared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, declaration: Declaration) {
        let mut declared = self.declared();
        declared.retain(|d| d.is_queue() != declaration.is_queue() || d.name() != declaration.name());
        declared.push(declaration);
    }

    fn forget(&self, name: &str, queue: bool) {
        self.declared()
            .retain(|d| d.is_queue() != queue || d.name() != name);
    }

    pub async fn declare_exchange(&self, exchange: &ExchangeOptions) -> Result<(), MessagingError<P::Error>> {
        self.apply_exchange(exchange).await?;
        self.remember(Declaration::Exchange(exchange.clone()));
        info!(exchange = exchange.name(), kind = ?exchange.kind(), "Exchange declared");
        Ok(())
    }

    pub async fn delete_exchange(&self, name: &str) -> Result<(), MessagingError<P::Error>> {
        self.client
            .execute_closure(self.client.declare_timeout(), move |channel| async move {
                channel.delete_exchange(name).await
            })
            .await?;
        self.forget(name, false);
        info!(exchange = name, "Exchange deleted");
        Ok(())
    }

    /// Declares the queue and binds every routing key. If a binding is
    /// refused the queue is deleted again, only when unused and empty, and
    /// the binding error is returned.
    pub async fn declare_queue(
        &self,
        queue: &QueueOptions,
        bindings: &QueueBindings,
    ) -> Result<(), MessagingError<P::Error>> {
        self.apply_queue(queue, bindings).await?;
        self.remember(Declaration::Queue(queue.clone(), bindings.clone()));
        info!(queue = queue.name(), bindings = bindings.len(), "Queue declared");
        Ok(())
    }

    pub async fn delete_queue(&self, name: &str) -> Result<(), MessagingError<P::Error>> {
        self.client
            .execute_closure(self.client.declare_timeout(), move |channel| async move {
                channel.delete_queue(name, false, false).await
            })
            .await?;
        self.forget(name, true);
        info!(queue = name, "Queue deleted");
        Ok(())
    }

    /// Replays every remembered declaration in its original order.
    pub async fn redeclare(&self) -> Result<(), MessagingError<P::Error>> {
        let declarations = self.declared().clone();
        for declaration in &declarations {
            match declaration {
                Declaration::Exchange(exchange) => self.apply_exchange(exchange).await?,
                Declaration::Queue(queue, bindings) => self.apply_queue(queue, bindings).await?,
            }
        }
        debug!(declarations = declarations.len(), "Topology redeclared");
        Ok(())
    }

    async fn apply_exchange(&self, exchange: &ExchangeOptions) -> Result<(), MessagingError<P::Error>> {
        self.client
            .execute_closure(self.client.declare_timeout(), move |channel| async move {
                channel.declare_exchange(exchange).await
            })
            .await?;
        Ok(())
    }

    async fn apply_queue(&self, queue: &QueueOptions, bindings: &QueueBindings) -> Result<(), MessagingError<P::Error>> {
        let client = &self.client;
        let refused = self
            .client
            .execute_closure(self.client.declare_timeout(), move |channel| async move {
                channel.declare_queue(queue).await?;
                for binding in bindings.iter() {
                    let bound = channel
                        .bind_queue(queue.name(), binding.exchange(), binding.routing_key())
                        .await;
                    match bound {
                        Ok(()) => {}
                        Err(err) if client.is_network_error(&err) => return Err(err),
                        Err(err) => return Ok(Some((binding.clone(), err))),
                    }
                }
                Ok(None)
            })
            .await?;

        let Some((binding, source)) = refused else {
            return Ok(());
        };

        warn!(
            queue = queue.name(),
            exchange = binding.exchange(),
            routing_key = binding.routing_key(),
            "Queue binding refused, rolling back queue"
        );
        let name = queue.name();
        let rollback = self
            .client
            .execute_closure(self.client.declare_timeout(), move |channel| async move {
                channel.delete_queue(name, true, true).await
            })
            .await;
        if let Err(err) = rollback {
            warn!(queue = name, error = %err, "Queue rollback failed");
        }

        Err(MessagingError::QueueBind {
            queue: name.to_string(),
            exchange: binding.exchange().to_string(),
            routing_key: binding.routing_key().to_string(),
            source,
        })
    }
}
