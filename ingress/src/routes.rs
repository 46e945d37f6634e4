//! `POST /api/v1/messages`: the `SubmitMessage` algorithm, steps 1-9.
//! Step 1 (mTLS verify / client resolution) runs in `middleware::
//! authenticate` before this handler is ever reached; steps 2-9 live here.

use crate::error::ApiError;
use crate::middleware::ClientContext;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json, Router};
use base64::Engine;
use broker_common::{ids, validation, Error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/messages", axum::routing::post(submit_message))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), crate::middleware::rate_limit))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), crate::middleware::authenticate))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SubmitMessageRequest {
    pub sender_number: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitMessageResponse {
    pub message_id: String,
    pub status: &'static str,
}

async fn submit_message(
    State(state): State<AppState>,
    Extension(client): Extension<ClientContext>,
    Json(request): Json<SubmitMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Step 2: validate the payload.
    let sender = validation::validate_sender(&request.sender_number)?;
    let body = validation::validate_body(&request.body)?;

    // Step 3: keyed-hash sender fingerprint, and the masked display form.
    let fingerprint = broker_common::fingerprint::fingerprint(&state.sender_hash_salt, sender)?;
    let sender_fingerprint_b64 = base64::engine::general_purpose::STANDARD.encode(&fingerprint);
    let sender_masked = validation::mask_sender(sender);

    // Step 4: encrypt the body at rest.
    let body_ciphertext_b64 = state.encryption.encrypt_string(&body).await?;

    // Step 5: generate the message id.
    let message_id = ids::new_message_id();

    // Step 6/7: register with the Store. Must be durable before step 8
    // — retried on transient failures
    // only, bounded by `register_retry_attempts`, since a submission that
    // never reaches the Store must not be silently dropped nor accepted.
    register_with_retry(&state, &message_id, &client.client_id, &sender_fingerprint_b64, &sender_masked, &body_ciphertext_b64)
        .await?;

    // Step 8: backpressure check, then enqueue for delivery.
    if let Ok(length) = state.queue.length().await {
        if length as u64 >= state.config.limits.queue_soft_limit {
            // The Message row already exists (step 7); mark it failed
            // rather than leaving it orphaned in `queued` with no queue
            // entry.
            let _ = state.store_client.mark_failed(&message_id, "queue soft limit exceeded").await;
            return Err(Error::QueueUnavailable("queue is at capacity".to_string()).into());
        }
    }

    if let Err(e) = enqueue_with_retry(&state, &message_id).await {
        let _ = state.store_client.mark_failed(&message_id, &e.to_string()).await;
        return Err(Error::QueueUnavailable(e.to_string()).into());
    }

    state.metrics.record_accepted();

    // Step 9: return 202 with the message id.
    Ok((StatusCode::ACCEPTED, Json(SubmitMessageResponse { message_id, status: "queued" })))
}

async fn register_with_retry(
    state: &AppState,
    message_id: &str,
    client_id: &str,
    sender_fingerprint_b64: &str,
    sender_masked: &str,
    body_ciphertext_b64: &str,
) -> Result<(), ApiError> {
    let attempts = state.config.limits.register_retry_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            state.metrics.record_register_retry();
            tokio::time::sleep(backoff(attempt)).await;
        }
        match state
            .store_client
            .register_message(message_id, client_id, sender_fingerprint_b64, sender_masked, body_ciphertext_b64)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err.map(ApiError::from).unwrap_or_else(|| ApiError::Internal("register_message retries exhausted".to_string())))
}

async fn enqueue_with_retry(state: &AppState, message_id: &str) -> Result<(), Error> {
    let attempts = state.config.limits.enqueue_retry_attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            state.metrics.record_enqueue_retry();
            tokio::time::sleep(backoff(attempt)).await;
        }
        match state.queue.enqueue(message_id).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::QueueUnavailable("enqueue retries exhausted".to_string())))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100u64.saturating_mul(1u64 << attempt.min(4)))
}
