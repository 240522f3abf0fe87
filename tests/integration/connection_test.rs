// Integration tests against live services. Each file in the tests directory
// is its own crate, so only the public API is reachable from here.
//
// Run with `cargo test --test connection_test -- --ignored` once a broker
// and a cache store are listening (see RABBITMQ_* / REDIS_* overrides).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use noti_connections::config::NotiConnectionsConfig;
use noti_connections::env::EnvOverrides;
use noti_connections::rabbitmq::{TaskConsumer, TaskProducer, TaskQueue};
use noti_connections::redis::DistributedLock;
use noti_connections::ConnectionProvider;

fn live_config() -> NotiConnectionsConfig {
    let mut config = NotiConnectionsConfig::default();
    EnvOverrides::load()
        .expect("Invalid connection overrides in the environment")
        .apply(&mut config);
    config
}

#[tokio::test]
#[ignore] // Requires a running RabbitMQ instance
async fn test_task_round_trip() {
    let provider = ConnectionProvider::new(CancellationToken::new());
    provider.init_rabbitmq(live_config().rabbitmq.to_args()).unwrap();
    let queue_name = format!("noti_it_{}", Uuid::new_v4());

    let task_queue = TaskQueue::new(provider.rabbitmq_client().await.unwrap(), &queue_name);
    task_queue.declare().await.unwrap();
    let producer = TaskProducer::new(provider.rabbitmq_client().await.unwrap(), &queue_name);
    let consumer = TaskConsumer::new(provider.rabbitmq_client().await.unwrap(), &queue_name);

    let message_id = producer.push("ping").await.unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let ctx = CancellationToken::new();
    let worker = {
        let received = Arc::clone(&received);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            consumer
                .consuming(&ctx, |message| {
                    received
                        .lock()
                        .unwrap()
                        .push(message.message_id().map(str::to_string));
                    async {}
                })
                .await
        })
    };

    for _ in 0..100 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    ctx.cancel();
    worker.await.unwrap().unwrap();

    assert_eq!(*received.lock().unwrap(), [Some(message_id)]);
    task_queue.remove().await.unwrap();
    provider.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires a running Redis instance
async fn test_lock_round_trip() {
    let provider = ConnectionProvider::new(CancellationToken::new());
    provider.init_redis(live_config().redis.to_args()).unwrap();
    let resource = format!("noti_it_{}", Uuid::new_v4());
    let ctx = CancellationToken::new();

    let first = DistributedLock::new(provider.redis_client().await.unwrap(), [resource.clone()]).unwrap();
    let second = DistributedLock::new(provider.redis_client().await.unwrap(), [resource.clone()]).unwrap();

    first.acquire_lock(&ctx).await.unwrap();
    assert!(first.is_locked());

    let contender = tokio::spawn(async move {
        let ctx = CancellationToken::new();
        let acquired = second.acquire_lock(&ctx).await;
        acquired.map(|()| second)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!contender.is_finished());

    first.release_lock(&ctx).await.unwrap();
    let second = contender.await.unwrap().unwrap();
    assert!(second.is_locked());
    second.release_lock(&ctx).await.unwrap();

    provider.shutdown().await;
}
