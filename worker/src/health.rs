//! A minimal plain-HTTP `/health` surface for the worker process. Operators
//! still need a liveness probe for a long-running worker process, the same
//! way Store exposes `broker_store::health`.

use crate::metrics::SlotMetrics;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct HealthState {
    pub metrics: Vec<Arc<SlotMetrics>>,
    pub started_at: std::time::Instant,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "slots": state.metrics.len(),
    }))
}

async fn metrics(State(state): State<HealthState>) -> Json<Vec<crate::metrics::MetricsSnapshot>> {
    let mut snapshots = Vec::with_capacity(state.metrics.len());
    for slot in &state.metrics {
        snapshots.push(slot.snapshot().await);
    }
    Json(snapshots)
}
