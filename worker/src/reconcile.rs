//! Startup reconciliation sweep. Runs once before
//! any slot starts popping: asks the Store for messages stuck in
//! `delivering` older than `2 * delivery_timeout`, resets each to `queued`
//! via `UpdateStatus`, and re-enqueues it exactly once.

use crate::store_client::StoreClient;
use broker_queue::Queue;
use tracing::{info, warn};

pub async fn run(store: &StoreClient, queue: &Queue, delivery_timeout_secs: u64) {
    let older_than_secs = (delivery_timeout_secs * 2) as i64;
    let stuck = match store.list_stuck_delivering(older_than_secs).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "reconciliation sweep failed to list stuck messages");
            return;
        }
    };

    if stuck.is_empty() {
        info!("reconciliation sweep found no stuck messages");
        return;
    }
    info!(count = stuck.len(), "reconciliation sweep resetting stuck messages");

    for message_id in stuck {
        if let Err(e) = store.update_status(&message_id, "queued", Some("reconciliation: reset after crash")).await {
            warn!(message_id, error = %e, "failed to reset stuck message to queued");
            continue;
        }
        if let Err(e) = queue.enqueue(&message_id).await {
            warn!(message_id, error = %e, "failed to re-enqueue stuck message");
        }
    }
}
