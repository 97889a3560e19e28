use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ox_types::{OutboxItem, PublishOutcome};

use crate::errors::{StoreError, StoreResult};
use crate::source::Source;

/// Stream entry field holding the event payload.
const PAYLOAD_FIELD: &str = "message";

#[derive(Clone, Debug)]
pub struct RedisSourceOptions {
    /// Stream key the writing application XADDs records to.
    pub stream_key: String,
    /// Consumer group shared by every relay instance.
    pub group: String,
    /// Pending entries idle longer than this are reclaimed by a later fetch.
    pub claim_min_idle: Duration,
}

impl Default for RedisSourceOptions {
    fn default() -> Self {
        Self {
            stream_key: "outbox".to_string(),
            group: "outbox-relay".to_string(),
            claim_min_idle: Duration::from_secs(30),
        }
    }
}

/// Consumer-group source over a Redis stream.
///
/// A fetch claims entries by reading them into this consumer's pending list;
/// a successful delivery acks the entry away, a failed one leaves it pending
/// until the idle threshold passes and a fetch reclaims it.
pub struct RedisStreamSource {
    conn: MultiplexedConnection,
    opts: RedisSourceOptions,
    consumer_name: String,
}

impl RedisStreamSource {
    pub async fn connect(url: &str, opts: RedisSourceOptions) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        let source = Self {
            conn,
            opts,
            consumer_name: Uuid::new_v4().to_string(),
        };
        source.ensure_consumer_group().await?;

        info!(
            stream = %source.opts.stream_key,
            group = %source.opts.group,
            consumer = %source.consumer_name,
            "redis outbox source ready"
        );
        Ok(source)
    }

    /// Create the consumer group from the start of the stream, tolerating a
    /// group that already exists.
    async fn ensure_consumer_group(&self) -> StoreResult<()> {
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.opts.stream_key)
            .arg(&self.opts.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn.clone())
            .await;

        match result {
            Ok(()) => {
                info!(stream = %self.opts.stream_key, group = %self.opts.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.opts.stream_key, group = %self.opts.group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Decode one stream entry. Entries without a payload field are acked
    /// away so they do not come back on every reclaim pass.
    async fn decode_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
    ) -> StoreResult<Option<OutboxItem>> {
        match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
            Some(payload) => Ok(Some(OutboxItem {
                id: entry.id.clone(),
                payload: Bytes::from(payload),
            })),
            None => {
                warn!(id = %entry.id, "stream entry has no payload field, discarding");
                let _: i64 = conn
                    .xack(&self.opts.stream_key, &self.opts.group, &[&entry.id])
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Source for RedisStreamSource {
    async fn fetch_batch(
        &self,
        max_items: i64,
        items: &mpsc::Sender<OutboxItem>,
    ) -> StoreResult<usize> {
        let max_items = max_items.max(0) as usize;
        if max_items == 0 {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut batch: Vec<OutboxItem> = Vec::with_capacity(max_items);

        // Entries whose previous claim went stale (a crashed relay, a failed
        // delivery) are taken back first.
        let reclaimed: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.opts.stream_key,
                &self.opts.group,
                &self.consumer_name,
                self.opts.claim_min_idle.as_millis() as u64,
                "0-0",
                StreamAutoClaimOptions::default().count(max_items),
            )
            .await?;
        if !reclaimed.claimed.is_empty() {
            debug!(reclaimed = reclaimed.claimed.len(), "reclaimed stale pending entries");
        }
        for entry in &reclaimed.claimed {
            if let Some(item) = self.decode_entry(&mut conn, entry).await? {
                batch.push(item);
            }
            if batch.len() >= max_items {
                break;
            }
        }

        if batch.len() < max_items {
            let opts = StreamReadOptions::default()
                .group(&self.opts.group, &self.consumer_name)
                .count(max_items - batch.len());
            let reply: StreamReadReply = conn
                .xread_options(&[&self.opts.stream_key], &[">"], &opts)
                .await?;
            for stream in &reply.keys {
                for entry in &stream.ids {
                    if let Some(item) = self.decode_entry(&mut conn, entry).await? {
                        batch.push(item);
                    }
                }
            }
        }

        let fetched = batch.len();
        for item in batch {
            if items.send(item).await.is_err() {
                return Err(StoreError::ChannelClosed);
            }
        }
        Ok(fetched)
    }

    async fn report_outcomes(
        &self,
        mut outcomes: mpsc::Receiver<PublishOutcome>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        while let Some(outcome) = outcomes.recv().await {
            if !outcome.delivered {
                // The entry stays in this consumer's pending list; a fetch
                // reclaims it once it has been idle past the threshold.
                debug!(id = %outcome.id, "delivery failed, leaving entry pending");
                continue;
            }

            let acked: RedisResult<i64> = conn
                .xack(&self.opts.stream_key, &self.opts.group, &[&outcome.id])
                .await;
            match acked {
                Ok(1) => debug!(id = %outcome.id, "acknowledged stream entry"),
                Ok(n) => warn!(id = %outcome.id, acked = n, "XACK did not match a pending entry"),
                Err(e) => warn!(id = %outcome.id, error = %e, "failed to ack stream entry"),
            }
        }
        Ok(())
    }

    /// Acknowledgment already removes entries from the pending set; there is
    /// nothing to compact.
    async fn clean(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn disconnect(&self) {
        // The multiplexed connection closes when the last clone drops.
        info!("closed redis connection");
    }
}
