use async_trait::async_trait;
use tokio::sync::mpsc;

use ox_types::{OutboxItem, PublishOutcome};

use crate::errors::MqResult;

/// Capability contract over one queue technology.
///
/// A sink holds no per-item state between calls, only its network handle.
/// One instance may be shared by several source pipelines running
/// `publish_all` concurrently, so the handle must be safe for concurrent
/// publishes.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Consume `items` until the channel closes, attempting one delivery per
    /// item and emitting exactly one outcome per item.
    ///
    /// A failed delivery is logged and surfaced as `delivered: false`; it
    /// never ends the loop. The payload handed to the queue is byte-identical
    /// to what the source fetched.
    async fn publish_all(
        &self,
        items: mpsc::Receiver<OutboxItem>,
        outcomes: mpsc::Sender<PublishOutcome>,
    ) -> MqResult<()>;

    /// Release the queue handle. Called once at process exit.
    async fn disconnect(&self);
}
