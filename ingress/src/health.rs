//! `GET /health`: `{"status":"healthy","queue":"ok","store":"ok"}` or
//! 503 with the failing components marked, following `broker_store::
//! health`'s aggregate-then-respond shape, trimmed to Ingress's two
//! dependencies (Queue, Store) instead of the Store's (database,
//! encryption).

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue: &'static str,
    pub store: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/health", axum::routing::get(health)).with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let queue_ok = state.queue.health_check().await.is_ok();
    let store_ok = state.store_client.health().await.is_ok();

    let response = HealthResponse {
        status: if queue_ok && store_ok { "healthy" } else { "unhealthy" },
        queue: if queue_ok { "ok" } else { "unavailable" },
        store: if store_ok { "ok" } else { "unavailable" },
    };

    let status = if queue_ok && store_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response)).into_response()
}
