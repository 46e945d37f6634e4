//! `GET /metrics`: Prometheus text-exposition format rendered by hand.
//! No Prometheus exporter crate appears anywhere in this workspace's
//! dependency graph, and the surface here
//! is a handful of counters, so a `write!`-built `String` is simpler and
//! more honest than pulling in a whole metrics framework for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct IngressMetrics {
    pub submissions_total: AtomicU64,
    pub submissions_accepted_total: AtomicU64,
    pub submissions_rejected_total: AtomicU64,
    pub enqueue_retries_total: AtomicU64,
    pub register_retries_total: AtomicU64,
}

impl IngressMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
        self.submissions_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
        self.submissions_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueue_retry(&self) {
        self.enqueue_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_register_retry(&self) {
        self.register_retries_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Renders the current counters plus process uptime as Prometheus text
/// exposition format.
pub fn render(metrics: &IngressMetrics, started_at: Instant, queue_length: Option<u64>) -> String {
    use std::fmt::Write;

    let mut out = String::new();

    let _ = writeln!(out, "# HELP ingress_uptime_seconds Seconds since the process started.");
    let _ = writeln!(out, "# TYPE ingress_uptime_seconds gauge");
    let _ = writeln!(out, "ingress_uptime_seconds {}", started_at.elapsed().as_secs());

    let _ = writeln!(out, "# HELP ingress_submissions_total Total SubmitMessage requests received.");
    let _ = writeln!(out, "# TYPE ingress_submissions_total counter");
    let _ = writeln!(out, "ingress_submissions_total {}", metrics.submissions_total.load(Ordering::Relaxed));

    let _ = writeln!(out, "# HELP ingress_submissions_accepted_total Submissions that reached 202.");
    let _ = writeln!(out, "# TYPE ingress_submissions_accepted_total counter");
    let _ = writeln!(
        out,
        "ingress_submissions_accepted_total {}",
        metrics.submissions_accepted_total.load(Ordering::Relaxed)
    );

    let _ = writeln!(out, "# HELP ingress_submissions_rejected_total Submissions that returned an error.");
    let _ = writeln!(out, "# TYPE ingress_submissions_rejected_total counter");
    let _ = writeln!(
        out,
        "ingress_submissions_rejected_total {}",
        metrics.submissions_rejected_total.load(Ordering::Relaxed)
    );

    let _ = writeln!(out, "# HELP ingress_register_retries_total RegisterMessage retry attempts.");
    let _ = writeln!(out, "# TYPE ingress_register_retries_total counter");
    let _ = writeln!(
        out,
        "ingress_register_retries_total {}",
        metrics.register_retries_total.load(Ordering::Relaxed)
    );

    let _ = writeln!(out, "# HELP ingress_enqueue_retries_total Enqueue retry attempts.");
    let _ = writeln!(out, "# TYPE ingress_enqueue_retries_total counter");
    let _ = writeln!(out, "ingress_enqueue_retries_total {}", metrics.enqueue_retries_total.load(Ordering::Relaxed));

    if let Some(length) = queue_length {
        let _ = writeln!(out, "# HELP ingress_queue_length Observed Queue length at last check.");
        let _ = writeln!(out, "# TYPE ingress_queue_length gauge");
        let _ = writeln!(out, "ingress_queue_length {length}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_counters() {
        let metrics = IngressMetrics::new();
        metrics.record_accepted();
        metrics.record_rejected();
        let text = render(&metrics, Instant::now(), Some(3));
        assert!(text.contains("ingress_submissions_total 2"));
        assert!(text.contains("ingress_submissions_accepted_total 1"));
        assert!(text.contains("ingress_submissions_rejected_total 1"));
        assert!(text.contains("ingress_queue_length 3"));
        assert!(text.contains("# HELP"));
        assert!(text.contains("# TYPE"));
    }

    #[test]
    fn render_omits_queue_length_when_unknown() {
        let metrics = IngressMetrics::new();
        let text = render(&metrics, Instant::now(), None);
        assert!(!text.contains("ingress_queue_length"));
    }
}
