use metrics::{counter, histogram};

/// Pipeline-side counters, one instance per configured source.
///
/// The `source` label is the configured store kind ("postgres", "redis"), so
/// cardinality is bounded by the config file.
pub struct RelayMetrics {
    ns: &'static str,
    source: &'static str,
}

impl RelayMetrics {
    pub fn new(namespace: &'static str, source: &'static str) -> Self {
        Self {
            ns: namespace,
            source,
        }
    }

    #[inline]
    pub fn fetch_tick(&self) {
        counter!(format!("{}_relay_fetch_ticks_total", self.ns), "source" => self.source)
            .increment(1);
    }

    #[inline]
    pub fn fetch_error(&self) {
        counter!(format!("{}_relay_fetch_errors_total", self.ns), "source" => self.source)
            .increment(1);
    }

    #[inline]
    pub fn batch_items(&self, items: usize) {
        histogram!(format!("{}_relay_batch_items", self.ns), "source" => self.source)
            .record(items as f64);
        counter!(format!("{}_relay_items_fetched_total", self.ns), "source" => self.source)
            .increment(items as u64);
    }

    #[inline]
    pub fn clean_run(&self) {
        counter!(format!("{}_relay_clean_runs_total", self.ns), "source" => self.source)
            .increment(1);
    }
}
