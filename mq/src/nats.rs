use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ox_types::{OutboxItem, PublishOutcome};

use crate::errors::{MqError, MqResult};
use crate::sink::Sink;

/// JetStream publisher for one destination subject.
///
/// The client multiplexes publishes from any number of pipelines over a
/// single connection, which is what makes sharing one sink across sources
/// safe.
pub struct NatsSink {
    client: Client,
    jetstream: jetstream::Context,
    subject: String,
}

impl NatsSink {
    /// Connect and make sure the destination stream exists, the counterpart
    /// of declaring the queue up front. A connect or stream-setup failure
    /// here is fatal to startup.
    pub async fn connect(url: &str, subject: &str) -> MqResult<Self> {
        let options = ConnectOptions::default().name("ox-relay");
        let client = async_nats::connect_with_options(url, options).await?;
        let jetstream = jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(StreamConfig {
                name: stream_name(subject),
                subjects: vec![subject.to_string()],
                ..Default::default()
            })
            .await?;

        info!(url, subject, "connected to nats sink");
        Ok(Self {
            client,
            jetstream,
            subject: subject.to_string(),
        })
    }

    async fn publish_one(
        &self,
        item: &OutboxItem,
    ) -> Result<(), async_nats::jetstream::context::PublishError> {
        // Wait for the broker ack; a publish only counts as delivered once
        // the stream has stored it.
        let ack = self
            .jetstream
            .publish(self.subject.clone(), item.payload.clone())
            .await?;
        ack.await?;
        Ok(())
    }
}

/// Stream names may not contain subject separators.
fn stream_name(subject: &str) -> String {
    subject.replace(['.', '*', '>'], "_").to_uppercase()
}

#[async_trait]
impl Sink for NatsSink {
    async fn publish_all(
        &self,
        mut items: mpsc::Receiver<OutboxItem>,
        outcomes: mpsc::Sender<PublishOutcome>,
    ) -> MqResult<()> {
        while let Some(item) = items.recv().await {
            let delivered = match self.publish_one(&item).await {
                Ok(()) => {
                    debug!(id = %item.id, bytes = item.payload.len(), "published");
                    true
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "publish failed");
                    false
                }
            };

            let outcome = PublishOutcome {
                id: item.id,
                delivered,
            };
            if outcomes.send(outcome).await.is_err() {
                return Err(MqError::ChannelClosed);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "flush on disconnect failed");
        }
        info!("closed nats connection");
    }
}
