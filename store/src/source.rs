use async_trait::async_trait;
use tokio::sync::mpsc;

use ox_types::{OutboxItem, PublishOutcome};

use crate::errors::StoreResult;

/// Capability contract over one outbox store technology.
///
/// An implementation owns the lifecycle of its lock/claim state. The pipeline
/// calls `fetch_batch`, `report_outcomes` and `clean` from separate tasks
/// against the same instance, so the underlying connection handle must either
/// be safe for concurrent use or serialize internally.
#[async_trait]
pub trait Source: Send + Sync {
    /// Select up to `max_items` records that are neither claimed nor already
    /// published, claim them, and push one item per record into `items` in
    /// store-return order. Returns the number of items emitted.
    ///
    /// Claims are taken before anything is emitted: a store error fetches
    /// nothing, and the caller retries on its next tick. Each send parks
    /// until the publish side takes the item, which is what couples fetch
    /// cadence to publish throughput.
    async fn fetch_batch(
        &self,
        max_items: i64,
        items: &mpsc::Sender<OutboxItem>,
    ) -> StoreResult<usize>;

    /// Drain `outcomes` until the channel closes.
    ///
    /// A failed delivery releases the record's claim so a later fetch retries
    /// it; a successful one marks the record published (or acks it away, for
    /// stores where the ack is the removal). Store errors on a single outcome
    /// are logged and skipped; the drain loop itself never gives up. The
    /// affected record stays claimed until its claim expires.
    async fn report_outcomes(
        &self,
        outcomes: mpsc::Receiver<PublishOutcome>,
    ) -> StoreResult<()>;

    /// Delete records that are confirmed published. No-op for stores whose
    /// ack already removes the record from the pending set.
    async fn clean(&self) -> StoreResult<()>;

    /// Release the store handle. Called once at process exit.
    async fn disconnect(&self);
}
