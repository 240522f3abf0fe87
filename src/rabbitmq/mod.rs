// src/rabbitmq/mod.rs
// Message-broker driver and the messaging patterns built on it

pub mod channel;
pub mod client;
pub mod connection_args;
pub mod consumer;
pub mod errors;
pub mod options;
pub mod proxy;
pub mod pub_sub;
pub mod publisher;
pub mod task_queue;
pub mod topology;

// Re-export specific items to simplify imports elsewhere
pub use channel::{AmqpChannel, AmqpDelivery, MessageHeaders};
pub use client::{RabbitMQClient, RabbitMQConnectionBuilder};
pub use connection_args::RabbitMQConnectionArgs;
pub use consumer::{Consumer, ReceivedMessage};
pub use errors::MessagingError;
pub use options::{ConsumeAction, ExchangeKind, ExchangeOptions, QueueBindings, QueueOptions};
pub use proxy::RabbitMQConnectionProxy;
pub use pub_sub::{PubSubPublisher, Subscriber};
pub use publisher::Publisher;
pub use task_queue::{TaskConsumer, TaskProducer, TaskQueue};
pub use topology::Topology;
