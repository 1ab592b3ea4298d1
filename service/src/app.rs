//! Startup wiring: read store, dispatch table, bus subscription, poll loop.

use crate::config::Config;
use anyhow::Context;
use relay_core::DeadLetterSink;
use relay_postgres::{DeadLetterQueue, init_schema};
use relay_projections::all_projections;
use relay_redpanda::RedpandaSource;
use relay_runtime::metrics::MetricsServer;
use relay_runtime::{ConsumerLoop, Dispatcher, HandlerRegistry, RunSummary};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;

/// Build every component from `config` and consume until `shutdown` flips.
///
/// # Errors
///
/// Fails if a component cannot be built, or if the loop halts under
/// [`ErrorPolicy::Halt`](relay_runtime::ErrorPolicy::Halt).
pub async fn run(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<RunSummary> {
    let _metrics = match config.metrics_port {
        Some(port) => {
            let server = MetricsServer::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
            server.start().context("Failed to start metrics exporter")?;
            Some(server)
        }
        None => None,
    };

    tracing::info!(database = ?config.database, "Connecting to read store");
    let pool = config
        .database
        .connect()
        .await
        .context("Failed to connect to read store")?;
    init_schema(&pool)
        .await
        .context("Failed to initialize schema")?;

    let registry = HandlerRegistry::from_projections(all_projections(&pool))
        .context("Failed to build handler registry")?;
    let unhandled = registry.unhandled();
    if !unhandled.is_empty() {
        tracing::warn!(?unhandled, "Event types without a projection will be skipped");
    }

    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(DeadLetterQueue::new(pool.clone()));
    let dispatcher = Dispatcher::new(registry, dead_letters).with_retry_policy(config.retry.clone());

    let source = RedpandaSource::builder()
        .brokers(&config.kafka.bootstrap_servers)
        .client_id(&config.kafka.client_id)
        .group_id(&config.kafka.group_id)
        .auto_offset_reset(&config.kafka.auto_offset_reset)
        .topics(config.kafka.topics.iter().cloned())
        .build()
        .context("Failed to subscribe to the bus")?;

    let summary = ConsumerLoop::new(source, dispatcher, config.consumer.clone(), shutdown)
        .run()
        .await?;

    pool.close().await;
    Ok(summary)
}
