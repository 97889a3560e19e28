use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ox_types::{OutboxItem, PublishOutcome};

use crate::errors::{StoreError, StoreResult};
use crate::source::Source;

/// Lock-based relational source over an `outbox_records` table.
///
/// A fetch claims rows with a per-process claim token; rows whose claim is
/// older than `claim_ttl` count as unclaimed again, so a crashed relay or a
/// lost unlock delays redelivery by at most one TTL.
pub struct PgOutboxSource {
    pool: PgPool,
    claim_token: Uuid,
    claim_ttl: Duration,
}

impl PgOutboxSource {
    pub fn new(pool: PgPool, claim_ttl: Duration) -> Self {
        let claim_token = Uuid::new_v4();
        info!(claim_token = %claim_token, ttl_s = claim_ttl.as_secs(), "postgres outbox source ready");
        Self {
            pool,
            claim_token,
            claim_ttl,
        }
    }

    async fn mark_published(&self, id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_records
            SET published_at = NOW()
            WHERE id = $1
              AND claim_token = $2
            "#,
        )
        .bind(id)
        .bind(self.claim_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_claim(&self, id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_records
            SET claim_token = NULL, claimed_at = NULL
            WHERE id = $1
              AND claim_token = $2
              AND published_at IS NULL
            "#,
        )
        .bind(id)
        .bind(self.claim_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Source for PgOutboxSource {
    async fn fetch_batch(
        &self,
        max_items: i64,
        items: &mpsc::Sender<OutboxItem>,
    ) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            WITH cte AS (
              SELECT id
              FROM outbox_records
              WHERE published_at IS NULL
                AND (claim_token IS NULL OR claimed_at < NOW() - make_interval(secs => $1))
              ORDER BY id ASC
              FOR UPDATE SKIP LOCKED
              LIMIT $2
            )
            UPDATE outbox_records o
            SET claim_token = $3, claimed_at = NOW()
            FROM cte
            WHERE o.id = cte.id
            RETURNING o.id, o.payload
            "#,
        )
        .bind(self.claim_ttl.as_secs_f64())
        .bind(max_items)
        .bind(self.claim_token)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        if rows.is_empty() {
            return Ok(0);
        }
        debug!(claimed = rows.len(), "claimed outbox rows");

        // The claim is committed before hand-off, so a send that parks on a
        // slow sink holds no transaction open.
        let fetched = rows.len();
        for r in rows {
            let item = OutboxItem {
                id: r.get::<i64, _>("id").to_string(),
                payload: Bytes::from(r.get::<Vec<u8>, _>("payload")),
            };
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
        while let Some(outcome) = outcomes.recv().await {
            let id: i64 = match outcome.id.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(id = %outcome.id, "outcome carries a non-numeric record id, skipping");
                    continue;
                }
            };

            let result = if outcome.delivered {
                self.mark_published(id).await
            } else {
                self.release_claim(id).await
            };
            if let Err(e) = result {
                // The row stays claimed; the claim TTL makes it fetchable again.
                warn!(id, delivered = outcome.delivered, error = %e, "failed to report outcome");
            }
        }
        Ok(())
    }

    async fn clean(&self) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_records
            WHERE published_at IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;
        info!(deleted = result.rows_affected(), "cleaned published outbox rows");
        Ok(())
    }

    async fn disconnect(&self) {
        self.pool.close().await;
        info!("closed postgres connection");
    }
}
