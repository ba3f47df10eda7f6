use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    events_produced: AtomicU64,
    heartbeats: AtomicU64,
    events_skipped: AtomicU64,
    batches_polled: AtomicU64,
    events_polled: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
    signals: AtomicU64,
}

/// In-process counters of a running task, shared by the streaming loop and
/// the poller.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_produced: u64,
    pub heartbeats: u64,
    /// Changes read again after a restart and dropped as already delivered.
    pub events_skipped: u64,
    pub batches_polled: u64,
    pub events_polled: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    /// Signals received from signal channels, handled or not.
    pub signals: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_events(&self, count: u64) {
        self.inner.events_produced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats(&self, count: u64) {
        self.inner.heartbeats.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self, count: u64) {
        self.inner.events_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_poll(&self, events: u64) {
        if events == 0 {
            return;
        }
        self.inner.batches_polled.fetch_add(1, Ordering::Relaxed);
        self.inner.events_polled.fetch_add(events, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_signals(&self, count: u64) {
        self.inner.signals.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_produced: self.inner.events_produced.load(Ordering::Relaxed),
            heartbeats: self.inner.heartbeats.load(Ordering::Relaxed),
            events_skipped: self.inner.events_skipped.load(Ordering::Relaxed),
            batches_polled: self.inner.batches_polled.load(Ordering::Relaxed),
            events_polled: self.inner.events_polled.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            signals: self.inner.signals.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let producer = metrics.clone();

        producer.increment_events(3);
        producer.increment_heartbeats(1);
        metrics.record_poll(3);
        metrics.record_poll(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_produced, 3);
        assert_eq!(snapshot.heartbeats, 1);
        assert_eq!(snapshot.batches_polled, 1);
        assert_eq!(snapshot.events_polled, 3);
    }
}
