mod config;
mod pipeline;
mod schedule;
mod supervisor;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use ox_metrics::{MetricsConfig, MetricsServer};
use ox_mq::{NatsSink, Sink};
use ox_store::{PgOutboxSource, RedisSourceOptions, RedisStreamSource, Source};

use crate::config::Cli;
use crate::pipeline::PipelineConfig;
use crate::supervisor::TaskGroup;

const METRICS_NAMESPACE: &str = "ox";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Metrics
    let ms = MetricsServer::install(MetricsConfig {
        listen: cli.metrics_listen.clone(),
        namespace: METRICS_NAMESPACE,
    })?;
    tokio::spawn(async move {
        let _ = ms.serve().await;
    });

    // The one sink, shared by every source pipeline. Any connect failure
    // aborts before a single pipeline task starts.
    let sink: Arc<dyn Sink> = Arc::new(
        NatsSink::connect(&cfg.sink.url, &cfg.sink.subject)
            .await
            .context("connecting to sink")?,
    );

    let mut group = TaskGroup::new();
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();

    if let Some(pg) = &cfg.sources.postgres {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&pg.url)
            .await
            .context("connecting to postgres source")?;

        // Outbox schema
        sqlx::migrate!("../store/migrations")
            .run(&pool)
            .await
            .context("running outbox migrations")?;

        let source: Arc<dyn Source> = Arc::new(PgOutboxSource::new(
            pool,
            Duration::from_secs(pg.claim_ttl_s),
        ));
        sources.push(source.clone());
        pipeline::spawn_source_pipeline(
            &mut group,
            source,
            sink.clone(),
            PipelineConfig {
                source_kind: "postgres",
                metrics_namespace: METRICS_NAMESPACE,
                batch_size: pg.batch_size,
                poll_interval: Duration::from_millis(pg.poll_interval_ms),
            },
        );
    }

    if let Some(redis) = &cfg.sources.redis {
        let source: Arc<dyn Source> = Arc::new(
            RedisStreamSource::connect(
                &redis.url,
                RedisSourceOptions {
                    stream_key: redis.stream.clone(),
                    group: redis.group.clone(),
                    claim_min_idle: Duration::from_secs(redis.claim_ttl_s),
                },
            )
            .await
            .context("connecting to redis source")?,
        );
        sources.push(source.clone());
        pipeline::spawn_source_pipeline(
            &mut group,
            source,
            sink.clone(),
            PipelineConfig {
                source_kind: "redis",
                metrics_namespace: METRICS_NAMESPACE,
                batch_size: redis.batch_size,
                poll_interval: Duration::from_millis(redis.poll_interval_ms),
            },
        );
    }

    if sources.is_empty() {
        info!("no sources configured, relaying nothing");
    }

    group.spawn("signal", supervisor::wait_for_shutdown_signal());

    let result = group.wait().await;
    if let Err(e) = &result {
        error!(cause = %e, "shutting down");
    }

    // Teardown runs after the group resolves, never concurrently with it.
    for source in sources {
        source.disconnect().await;
    }
    sink.disconnect().await;

    result
}
