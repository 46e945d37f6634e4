//! The per-slot delivery loop. `run_slot` is spawned once per
//! `WORKER_CONCURRENCY` slot; all slots share one `Queue` handle and one
//! `StoreClient`, following the pattern of fan-out workers
//! sharing pooled connections rather than opening one per task.

use crate::metrics::SlotMetrics;
use crate::store_client::StoreClient;
use broker_common::Error;
use broker_queue::Queue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

pub struct SlotConfig {
    pub pop_timeout: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

/// Runs one worker slot until `shutdown_rx` fires. Implements the per-slot
/// loop exactly: pop, fetch, claim, deliver, classify outcome, schedule
/// retry or terminal transition, return to step 1 without blocking.
pub async fn run_slot(
    slot_id: usize,
    queue: Arc<Queue>,
    store: Arc<StoreClient>,
    config: Arc<SlotConfig>,
    metrics: Arc<SlotMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(slot_id, "worker slot starting");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let popped_at = Instant::now();
        let message_id = tokio::select! {
            result = queue.pop_blocking(config.pop_timeout) => match result {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(e) => {
                    warn!(slot_id, error = %e, "queue pop failed; backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
            _ = shutdown_rx.changed() => break,
        };
        metrics.record_queue_wait(popped_at.elapsed()).await;

        process_one(slot_id, &message_id, &store, &queue, &config, &metrics).await;
    }
    info!(slot_id, "worker slot stopped");
}

/// The body of the per-slot loop for one popped `message_id`.
async fn process_one(
    slot_id: usize,
    message_id: &str,
    store: &Arc<StoreClient>,
    queue: &Arc<Queue>,
    config: &Arc<SlotConfig>,
    metrics: &Arc<SlotMetrics>,
) {
    let record = match store.get_message_for_delivery(message_id).await {
        Ok(record) => record,
        Err(Error::NotFound(_)) => {
            warn!(slot_id, message_id, "popped message has no Store row; dropping");
            return;
        }
        Err(e) => {
            warn!(slot_id, message_id, error = %e, "failed to fetch message; re-enqueueing");
            let _ = queue.enqueue(message_id).await;
            return;
        }
    };

    // Step 2: a message already in a terminal state was popped again
    // — drop silently.
    if matches!(record.status.as_str(), "delivered" | "failed" | "cancelled") {
        info!(slot_id, message_id, status = %record.status, "dropping non-retryable message");
        return;
    }

    // Step 3: claim for delivery. `IllegalTransition` here means another
    // slot (or process) already claimed it; defensive only, since the
    // Queue's at-most-once pop should make this unreachable in practice.
    let claimed = match store.claim_for_delivery(message_id).await {
        Ok(claimed) => claimed,
        Err(Error::IllegalTransition(_)) => {
            warn!(slot_id, message_id, "message already claimed elsewhere; dropping");
            return;
        }
        Err(e) => {
            warn!(slot_id, message_id, error = %e, "failed to claim message; re-enqueueing");
            let _ = queue.enqueue(message_id).await;
            return;
        }
    };

    metrics.start_delivery();
    let started = Instant::now();
    let outcome = store.confirm_delivery(message_id).await;
    let delivered = outcome.is_ok();
    metrics.finish_delivery(delivered, started.elapsed());

    match outcome {
        Ok(_) => {
            info!(slot_id, message_id, attempts = claimed.attempts, "message delivered");
        }
        Err(e) => {
            warn!(slot_id, message_id, attempts = claimed.attempts, error = %e, "delivery failed");
            handle_failure(slot_id, message_id, claimed.attempts, &e, store, queue, config, metrics).await;
        }
    }
}

/// Step 6/7: on failure, either cap out to `failed` or schedule a fixed-
/// interval retry without blocking the slot.
#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    slot_id: usize,
    message_id: &str,
    attempts: u32,
    error: &Error,
    store: &Arc<StoreClient>,
    queue: &Arc<Queue>,
    config: &Arc<SlotConfig>,
    metrics: &Arc<SlotMetrics>,
) {
    if attempts >= config.max_attempts {
        warn!(slot_id, message_id, attempts, "attempt cap reached; marking failed");
        if let Err(e) = store.update_status(message_id, "failed", Some(&error.to_string())).await {
            warn!(slot_id, message_id, error = %e, "failed to record terminal failure");
        }
        return;
    }

    if let Err(e) = store.update_status(message_id, "queued", Some(&error.to_string())).await {
        warn!(slot_id, message_id, error = %e, "failed to record retry status");
        return;
    }
    metrics.record_retry();

    // Do not block the slot for the retry interval — schedule the
    // re-enqueue". The retry happens on a detached task so this slot
    // returns to step 1 immediately.
    let retry_interval = config.retry_interval;
    let message_id = message_id.to_string();
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        tokio::time::sleep(retry_interval).await;
        if let Err(e) = queue.enqueue(&message_id).await {
            warn!(message_id, error = %e, "failed to re-enqueue after retry interval");
        }
    });
}
