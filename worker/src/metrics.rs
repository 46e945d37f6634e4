//! Per-slot metrics. Plain atomics rather than a metrics-exporter
//! crate: no Prometheus exporter dependency appears in this workspace's
//! stack" reasoning `ingress::metrics` documents for its `/metrics` text
//! renderer — this struct only needs to be read back by `worker::health`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct SlotMetrics {
    pub processed_total: AtomicU64,
    pub delivered_total: AtomicU64,
    pub failed_total: AtomicU64,
    pub retried_total: AtomicU64,
    pub in_flight: AtomicU64,
    delivery_duration_samples: RwLock<Vec<Duration>>,
    queue_wait_samples: RwLock<Vec<Duration>>,
}

impl SlotMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_delivery(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_delivery(&self, delivered: bool, elapsed: Duration) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if delivered {
            self.delivered_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
        }
        self.record_sample(&self.delivery_duration_samples, elapsed);
    }

    pub fn record_retry(&self) {
        self.retried_total.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_queue_wait(&self, elapsed: Duration) {
        let mut samples = self.queue_wait_samples.write().await;
        push_bounded(&mut samples, elapsed);
    }

    fn record_sample(&self, samples: &RwLock<Vec<Duration>>, elapsed: Duration) {
        if let Ok(mut guard) = samples.try_write() {
            push_bounded(&mut guard, elapsed);
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_total: self.processed_total.load(Ordering::Relaxed),
            delivered_total: self.delivered_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            retried_total: self.retried_total.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            delivery_duration_samples: self.delivery_duration_samples.read().await.len(),
            queue_wait_samples: self.queue_wait_samples.read().await.len(),
        }
    }
}

/// Keeps only the most recent 1000 samples per histogram so the metrics
/// surface can't grow unbounded over a long-lived process.
fn push_bounded(samples: &mut Vec<Duration>, value: Duration) {
    const MAX_SAMPLES: usize = 1000;
    if samples.len() >= MAX_SAMPLES {
        samples.remove(0);
    }
    samples.push(value);
}

#[derive(Debug, serde::Serialize)]
pub struct MetricsSnapshot {
    pub processed_total: u64,
    pub delivered_total: u64,
    pub failed_total: u64,
    pub retried_total: u64,
    pub in_flight: u64,
    pub delivery_duration_samples: usize,
    pub queue_wait_samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_delivered_and_failed_separately() {
        let metrics = SlotMetrics::new();
        metrics.start_delivery();
        metrics.finish_delivery(true, Duration::from_millis(5));
        metrics.start_delivery();
        metrics.finish_delivery(false, Duration::from_millis(5));

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.processed_total, 2);
        assert_eq!(snapshot.delivered_total, 1);
        assert_eq!(snapshot.failed_total, 1);
        assert_eq!(snapshot.in_flight, 0);
    }
}
