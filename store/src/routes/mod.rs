//! HTTP route tables for the Store's two surfaces: the internal
//! mTLS API consumed by Ingress/Worker, and the operator bearer-token API
//! consumed by the (out-of-scope) portal/CLI. Each is its own
//! `axum::Router`, merged under its own `axum_server` TLS listener in
//! `main.rs` — the internal listener requires a client certificate, the
//! operator listener does not. Each surface is built as one `Router` out
//! of several `nest()`-ed sub-routers.

pub mod internal;
pub mod operator;

use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// `GET /health` — shared by both listeners.
pub async fn health(state: axum::extract::State<AppState>) -> Json<crate::health::HealthResponse> {
    let db_health = state.health.check_database(&state.db).await;
    let enc_health = state.health.check_encryption(&state.encryption).await;
    Json(state.health.build_response(vec![db_health, enc_health]))
}

pub fn health_router(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn not_found() -> Json<serde_json::Value> {
    Json(json!({"error": "NOT_FOUND"}))
}
