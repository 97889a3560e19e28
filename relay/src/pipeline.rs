use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ox_metrics::RelayMetrics;
use ox_mq::Sink;
use ox_store::{Source, StoreError};
use ox_types::{OutboxItem, PublishOutcome};

use crate::schedule::run_periodic;
use crate::supervisor::TaskGroup;

pub struct PipelineConfig {
    /// Store kind, used for task names and metric labels.
    pub source_kind: &'static str,
    pub metrics_namespace: &'static str,
    pub batch_size: i64,
    pub poll_interval: Duration,
}

/// Wire one source to the shared sink: a periodic fetch task, a publish task
/// and a report-outcome task joined by capacity-1 channels, plus a one-shot
/// cleanup at start.
///
/// The channels are rendezvous-sized: a fetch emission waits for the publish
/// task to take the item and a publish emission waits for the report loop, so
/// a stalled sink backs the fetch tick up instead of growing an in-flight
/// queue.
pub fn spawn_source_pipeline(
    group: &mut TaskGroup,
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    cfg: PipelineConfig,
) {
    let (item_tx, item_rx) = mpsc::channel::<OutboxItem>(1);
    let (outcome_tx, outcome_rx) = mpsc::channel::<PublishOutcome>(1);

    let metrics = Arc::new(RelayMetrics::new(cfg.metrics_namespace, cfg.source_kind));
    info!(
        source = cfg.source_kind,
        batch_size = cfg.batch_size,
        poll_interval_ms = cfg.poll_interval.as_millis() as u64,
        "starting source pipeline"
    );

    {
        let source = source.clone();
        let metrics = metrics.clone();
        let batch_size = cfg.batch_size;
        let poll_interval = cfg.poll_interval;
        group.spawn(format!("{} fetch", cfg.source_kind), async move {
            run_periodic(poll_interval, move || {
                let source = source.clone();
                let items = item_tx.clone();
                let metrics = metrics.clone();
                async move {
                    metrics.fetch_tick();
                    match source.fetch_batch(batch_size, &items).await {
                        Ok(fetched) => {
                            metrics.batch_items(fetched);
                            Ok(())
                        }
                        Err(StoreError::ChannelClosed) => Err(anyhow!("item channel closed")),
                        // Transient store errors stay inside the tick; the
                        // next tick retries.
                        Err(e) => {
                            metrics.fetch_error();
                            warn!(error = %e, "fetch tick failed");
                            Ok(())
                        }
                    }
                }
            })
            .await
        });
    }

    group.spawn(format!("{} publish", cfg.source_kind), async move {
        sink.publish_all(item_rx, outcome_tx)
            .await
            .map_err(anyhow::Error::from)
    });

    {
        let source = source.clone();
        group.spawn(format!("{} report", cfg.source_kind), async move {
            source
                .report_outcomes(outcome_rx)
                .await
                .map_err(anyhow::Error::from)
        });
    }

    // One-shot cleanup at pipeline start. A failure here is contained like
    // any other per-call store error.
    group.spawn(format!("{} clean", cfg.source_kind), async move {
        match source.clean().await {
            Ok(()) => metrics.clean_run(),
            Err(e) => warn!(error = %e, "cleanup failed"),
        }
        Ok(())
    });
}
