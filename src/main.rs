use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use noti_connections::config::{create_default_config_file, load_config_or_default, CONFIG_FILE_NAME};
use noti_connections::env::EnvOverrides;
use noti_connections::rabbitmq::{TaskConsumer, TaskProducer, TaskQueue};
use noti_connections::ConnectionProvider;

const DEMO_QUEUE: &str = "noti_demo_tasks";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if std::env::args().nth(1).as_deref() == Some("--init-config") {
        return create_default_config_file(Path::new(CONFIG_FILE_NAME));
    }

    let mut config = load_config_or_default()?;
    EnvOverrides::load()?.apply(&mut config);

    let ctx = CancellationToken::new();
    let provider = ConnectionProvider::new(ctx.clone());
    provider
        .init_rabbitmq(config.rabbitmq.to_args())
        .context("Invalid broker configuration")?;

    let client = provider
        .rabbitmq_client()
        .await
        .context("Broker connections are not initialised")?;
    let task_queue = TaskQueue::new(client.clone(), DEMO_QUEUE);
    task_queue.declare().await.context("Failed to declare the demo queue")?;

    let consumer_client = provider
        .rabbitmq_client()
        .await
        .context("Broker connections are not initialised")?;
    let consumer = TaskConsumer::new(consumer_client, DEMO_QUEUE).with_task_queue(&task_queue);
    let consumer_ctx = ctx.clone();
    let worker = tokio::spawn(async move {
        consumer
            .consuming(&consumer_ctx, |task| {
                info!(message_id = task.message_id().unwrap_or("-"), body = task.text().unwrap_or("<binary>"), "Task received");
                async {}
            })
            .await
    });

    let producer = TaskProducer::new(client, DEMO_QUEUE);
    for n in 1..=3 {
        let message_id = producer.push(format!("demo task {n}")).await?;
        info!(%message_id, "Task pushed");
    }

    info!("Waiting for tasks, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    provider.shutdown().await;
    if let Err(e) = worker.await? {
        error!(error = %e, "Consumer stopped with an error");
    }
    Ok(())
}
