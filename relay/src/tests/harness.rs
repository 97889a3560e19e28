//! Test harness for the relay pipeline.
//!
//! `MockSource` is an in-memory claim/release/ack store honoring the Source
//! contract; `MockSink` is a scripted publisher honoring the Sink contract.
//! Both keep call logs the tests assert on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use ox_mq::{MqError, MqResult, Sink};
use ox_store::{Source, StoreError, StoreResult};
use ox_types::{OutboxItem, PublishOutcome};

use crate::pipeline::{spawn_source_pipeline, PipelineConfig};
use crate::supervisor::TaskGroup;

#[derive(Clone, Debug)]
struct MockRecord {
    id: String,
    payload: Bytes,
    claimed: bool,
    published: bool,
}

/// In-memory lock-based store.
#[derive(Default)]
pub struct MockSource {
    records: Mutex<Vec<MockRecord>>,
    fetch_calls: AtomicUsize,
    released: Mutex<Vec<String>>,
    acked: Mutex<Vec<String>>,
    clean_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: &str, payload: &[u8]) {
        self.records.lock().unwrap().push(MockRecord {
            id: id.to_string(),
            payload: Bytes::copy_from_slice(payload),
            claimed: false,
            published: false,
        });
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Ids whose claim was released after a failed delivery, in call order.
    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    /// Ids marked published after a successful delivery, in call order.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn clean_calls(&self) -> usize {
        self.clean_calls.load(Ordering::SeqCst)
    }

    pub fn claimed_count(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.claimed && !r.published)
            .count()
    }

    /// Records still present in the store, published or not.
    pub fn remaining(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn published_count(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.published)
            .count()
    }
}

#[async_trait]
impl Source for MockSource {
    async fn fetch_batch(
        &self,
        max_items: i64,
        items: &mpsc::Sender<OutboxItem>,
    ) -> StoreResult<usize> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        // Claim under the lock, hand off after it is released.
        let batch: Vec<OutboxItem> = {
            let mut records = self.records.lock().unwrap();
            records
                .iter_mut()
                .filter(|r| !r.claimed && !r.published)
                .take(max_items.max(0) as usize)
                .map(|r| {
                    r.claimed = true;
                    OutboxItem {
                        id: r.id.clone(),
                        payload: r.payload.clone(),
                    }
                })
                .collect()
        };

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
        while let Some(outcome) = outcomes.recv().await {
            let mut records = self.records.lock().unwrap();
            if let Some(r) = records.iter_mut().find(|r| r.id == outcome.id) {
                if outcome.delivered {
                    r.published = true;
                    self.acked.lock().unwrap().push(outcome.id);
                } else {
                    r.claimed = false;
                    self.released.lock().unwrap().push(outcome.id);
                }
            }
        }
        Ok(())
    }

    async fn clean(&self) -> StoreResult<()> {
        self.clean_calls.fetch_add(1, Ordering::SeqCst);
        self.records.lock().unwrap().retain(|r| !r.published);
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// Scripted publisher.
#[derive(Default)]
pub struct MockSink {
    attempts: Mutex<Vec<OutboxItem>>,
    delivered: Mutex<Vec<OutboxItem>>,
    fail_all: AtomicBool,
    fail_once: Mutex<HashMap<String, usize>>,
    stall: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every delivery attempt fails.
    pub fn always_failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail_all.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    /// The first publish call never completes.
    pub fn stalled() -> Arc<Self> {
        let sink = Self::default();
        sink.stall.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    /// Fail the next `times` deliveries of `id`, then succeed.
    pub fn fail_times(&self, id: &str, times: usize) {
        self.fail_once.lock().unwrap().insert(id.to_string(), times);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Every item received, in receipt order.
    pub fn attempts(&self) -> Vec<OutboxItem> {
        self.attempts.lock().unwrap().clone()
    }

    /// Successfully delivered items, in delivery order.
    pub fn delivered(&self) -> Vec<OutboxItem> {
        self.delivered.lock().unwrap().clone()
    }

    fn should_fail(&self, id: &str) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        let mut fail_once = self.fail_once.lock().unwrap();
        match fail_once.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Sink for MockSink {
    async fn publish_all(
        &self,
        mut items: mpsc::Receiver<OutboxItem>,
        outcomes: mpsc::Sender<PublishOutcome>,
    ) -> MqResult<()> {
        while let Some(item) = items.recv().await {
            self.attempts.lock().unwrap().push(item.clone());

            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            let delivered = !self.should_fail(&item.id);
            if delivered {
                self.delivered.lock().unwrap().push(item.clone());
            }

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

    async fn disconnect(&self) {}
}

/// A pipeline running against mocks. Aborting the wait future tears the task
/// group down.
pub struct RunningRelay {
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningRelay {
    pub fn stop(self) {
        self.handle.abort();
    }
}

pub fn start_pipeline(
    source: &Arc<MockSource>,
    sink: &Arc<MockSink>,
    batch_size: i64,
    poll_interval: Duration,
) -> RunningRelay {
    let mut group = TaskGroup::new();
    spawn_source_pipeline(
        &mut group,
        source.clone() as Arc<dyn Source>,
        sink.clone() as Arc<dyn Sink>,
        PipelineConfig {
            source_kind: "mock",
            metrics_namespace: "ox",
            batch_size,
            poll_interval,
        },
    );
    RunningRelay {
        handle: tokio::spawn(group.wait()),
    }
}

/// Poll `cond` until it holds or `deadline` passes.
pub async fn eventually(deadline: Duration, cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}
