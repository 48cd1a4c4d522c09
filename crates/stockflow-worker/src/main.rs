// Stockflow worker process
//
// Init order matters and teardown runs in reverse: persistence gateway,
// broker substrate, progress bus, stage processors, cron driver. The
// shutdown hook closes the three shared broker connections; leaking them
// across invocations exhausts managed brokers.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockflow_core::StockflowConfig;
use stockflow_queue::{Broker, RedisBroker};
use stockflow_storage::Gateway;
use stockflow_worker::{CronDriver, Orchestrator, WorkerContext};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "stockflow_worker=info,stockflow_queue=info,stockflow_storage=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StockflowConfig::from_env().context("configuration")?;

    // 1. Persistence gateway (warmup barrier runs on first client)
    let gateway = Gateway::connect(&config.database_url)
        .await
        .context("database gateway")?;
    gateway.client().await.context("database warmup")?;

    // 2. Broker substrate: exactly three shared connections
    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(&config.broker_url)
            .await
            .context("broker")?,
    );

    // 3+4. Context (queues + bus + clients) and stage processors
    let ctx = WorkerContext::new(config, &gateway, broker.clone())
        .await
        .context("worker context")?;
    let orchestrator = Orchestrator::new(ctx.clone());
    orchestrator.clone().register_queues().await;

    // 5. Cron driver
    let cron = CronDriver::new(orchestrator.clone());
    let cron_handle = cron.start();

    info!("stockflow worker running");
    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown signal received");

    // Teardown in reverse
    cron_handle.abort();
    ctx.queues.shutdown().await;
    broker.close().await.ok();

    info!("stockflow worker stopped");
    Ok(())
}
