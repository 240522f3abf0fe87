use serde::{Deserialize, Serialize};

/// What the consumer tells the broker once a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumeAction {
    /// Acknowledge; the broker forgets the message.
    Accept,
    /// Negative acknowledge with requeue.
    Requeue,
    /// Negative acknowledge without requeue.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOptions {
    name: String,
    kind: ExchangeKind,
    durable: bool,
    auto_delete: bool,
}

impl ExchangeOptions {
    /// Survives broker restarts and is never removed automatically.
    pub fn persistent(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
        }
    }

    /// Removed by the broker once the last binding is gone.
    pub fn non_persistent(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
            auto_delete: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    name: String,
    durable: bool,
    auto_delete: bool,
    exclusive: bool,
}

impl QueueOptions {
    pub fn persistent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            exclusive: false,
        }
    }

    pub fn non_persistent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            auto_delete: true,
            exclusive: false,
        }
    }

    /// Restricts the queue to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    routing_key: String,
    exchange: String,
}

impl QueueBinding {
    pub fn new(routing_key: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            exchange: exchange.into(),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

/// Routing keys bound to a queue, each paired with its exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBindings(Vec<QueueBinding>);

impl QueueBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, routing_key: impl Into<String>, exchange: impl Into<String>) -> Self {
        self.0.push(QueueBinding::new(routing_key, exchange));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueBinding> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, X: Into<String>> FromIterator<(K, X)> for QueueBindings {
    fn from_iter<I: IntoIterator<Item = (K, X)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(routing_key, exchange)| QueueBinding::new(routing_key, exchange))
                .collect(),
        )
    }
}
