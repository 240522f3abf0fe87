use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::errors::ArgsError;
use crate::config::NotiConnectionsConfig;
use crate::mongodb::{MongoClient, MongoConnectionArgs, MongoConnectionBuilder};
use crate::rabbitmq::{RabbitMQClient, RabbitMQConnectionArgs, RabbitMQConnectionBuilder};
use crate::redis::{RedisClient, RedisConnectionArgs, RedisConnectionBuilder};

/// Process-wide holder of one connection builder per backing store.
///
/// Every driver is initialised at most once: the first `init_*` call wins
/// and later calls are ignored. All managers share the provider's context,
/// so `shutdown` stops every reconnection loop.
pub struct ConnectionProvider {
    ctx: CancellationToken,
    rabbitmq: OnceLock<RabbitMQConnectionBuilder>,
    redis: OnceLock<RedisConnectionBuilder>,
    mongodb: OnceLock<MongoConnectionBuilder>,
}

impl ConnectionProvider {
    pub fn new(ctx: CancellationToken) -> Self {
        Self {
            ctx,
            rabbitmq: OnceLock::new(),
            redis: OnceLock::new(),
            mongodb: OnceLock::new(),
        }
    }

    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Initialises all three drivers from a loaded configuration.
    pub fn init_from_config(&self, config: &NotiConnectionsConfig) -> Result<(), ArgsError> {
        self.init_rabbitmq(config.rabbitmq.to_args())?;
        self.init_redis(config.redis.to_args())?;
        self.init_mongodb(config.mongodb.to_args())
    }

    pub fn init_rabbitmq(&self, args: RabbitMQConnectionArgs) -> Result<(), ArgsError> {
        if self.rabbitmq.get().is_some() {
            debug!("Broker connections already initialised");
            return Ok(());
        }
        let builder = RabbitMQConnectionBuilder::new(self.ctx.child_token(), args)?;
        if self.rabbitmq.set(builder).is_ok() {
            info!("Broker connections initialised");
        }
        Ok(())
    }

    pub fn init_redis(&self, args: RedisConnectionArgs) -> Result<(), ArgsError> {
        if self.redis.get().is_some() {
            debug!("Cache connections already initialised");
            return Ok(());
        }
        let builder = RedisConnectionBuilder::new(self.ctx.child_token(), args)?;
        if self.redis.set(builder).is_ok() {
            info!("Cache connections initialised");
        }
        Ok(())
    }

    pub fn init_mongodb(&self, args: MongoConnectionArgs) -> Result<(), ArgsError> {
        if self.mongodb.get().is_some() {
            debug!("Document store connections already initialised");
            return Ok(());
        }
        let builder = MongoConnectionBuilder::new(self.ctx.child_token(), args)?;
        if self.mongodb.set(builder).is_ok() {
            info!("Document store connections initialised");
        }
        Ok(())
    }

    pub fn rabbitmq(&self) -> Option<&RabbitMQConnectionBuilder> {
        self.rabbitmq.get()
    }

    pub fn redis(&self) -> Option<&RedisConnectionBuilder> {
        self.redis.get()
    }

    pub fn mongodb(&self) -> Option<&MongoConnectionBuilder> {
        self.mongodb.get()
    }

    /// New broker client, `None` until `init_rabbitmq` succeeded.
    pub async fn rabbitmq_client(&self) -> Option<RabbitMQClient> {
        match self.rabbitmq.get() {
            Some(builder) => Some(builder.build_client().await),
            None => None,
        }
    }

    pub async fn redis_client(&self) -> Option<RedisClient> {
        match self.redis.get() {
            Some(builder) => Some(builder.build_client().await),
            None => None,
        }
    }

    pub async fn mongodb_client(&self) -> Option<MongoClient> {
        match self.mongodb.get() {
            Some(builder) => Some(builder.build_client().await),
            None => None,
        }
    }

    /// Cancels the shared context and closes every managed connection.
    pub async fn shutdown(&self) {
        self.ctx.cancel();
        if let Some(builder) = self.rabbitmq.get() {
            builder.destroy().await;
        }
        if let Some(builder) = self.redis.get() {
            builder.destroy().await;
        }
        if let Some(builder) = self.mongodb.get() {
            builder.destroy().await;
        }
        info!("Connection provider shut down");
    }
}
