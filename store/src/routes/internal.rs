//! Internal mTLS API: `RegisterMessage`,
//! `GetMessageForDelivery`, `UpdateStatus`, `ConfirmDelivery`. Every route
//! here is gated by [`crate::middleware::require_component_cn`] — the
//! caller's certificate must pass a live registry `Verify` (unknown,
//! expired, or revoked certificates are rejected there) and its CN must
//! start with `proxy-` (Ingress) or `worker-` (Worker).

use crate::db::messages::{self, StatusUpdate};
use crate::error::ApiError;
use crate::middleware::require_component_cn;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use broker_common::model::{Message, MessageStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/messages/register", post(register_message))
        .route("/internal/messages/deliver", post(confirm_delivery))
        .route("/internal/messages/:id/status", put(update_status))
        .route("/internal/messages/:id", get(get_message_for_delivery))
        .route("/internal/messages/stuck", get(list_stuck_delivering))
        .layer(from_fn_with_state(state.clone(), require_component_cn))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RegisterMessageRequest {
    pub message_id: String,
    pub client_id: String,
    /// Base64-encoded `HMAC-SHA256(salt, normalized_sender)`.
    pub sender_fingerprint: String,
    pub sender_masked: String,
    /// Base64-encoded AEAD ciphertext.
    pub body_ciphertext: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterMessageResponse {
    pub message_id: String,
    pub status: String,
}

/// Idempotent on `message_id`. A second call with an
/// identical payload returns success; a differing payload is a
/// `Conflict` (409), surfaced via `ApiError`'s mapping of
/// `broker_common::Error::IdempotencyConflict`.
async fn register_message(
    State(state): State<AppState>,
    Json(req): Json<RegisterMessageRequest>,
) -> Result<Json<RegisterMessageResponse>, ApiError> {
    let sender_fingerprint = base64::engine::general_purpose::STANDARD
        .decode(&req.sender_fingerprint)
        .map_err(|e| ApiError::BadRequest(format!("invalid sender_fingerprint encoding: {e}")))?;
    let body_ciphertext = base64::engine::general_purpose::STANDARD
        .decode(&req.body_ciphertext)
        .map_err(|e| ApiError::BadRequest(format!("invalid body_ciphertext encoding: {e}")))?;

    let now = Utc::now();
    let message = Message {
        message_id: req.message_id.clone(),
        client_id: req.client_id.clone(),
        sender_fingerprint,
        sender_masked: req.sender_masked,
        body_ciphertext,
        status: MessageStatus::Queued,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
        delivered_at: None,
    };

    messages::insert(state.db.pool(), &message).await?;

    // One audit entry per successful submit, whether this call created the row or matched an
    // already-registered idempotent resubmission.
    crate::db::audit::record(
        state.db.pool(),
        &req.client_id,
        "message.submitted",
        &req.message_id,
        None::<()>,
    )
    .await?;

    Ok(Json(RegisterMessageResponse {
        message_id: req.message_id,
        status: MessageStatus::Queued.as_str().to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct MessageForDelivery {
    pub message_id: String,
    pub client_id: String,
    pub status: String,
    pub attempts: u32,
    /// Base64-encoded ciphertext, for the worker to build its delivery
    /// payload.
    pub body_ciphertext: String,
}

impl From<Message> for MessageForDelivery {
    fn from(m: Message) -> Self {
        Self {
            message_id: m.message_id,
            client_id: m.client_id,
            status: m.status.as_str().to_string(),
            attempts: m.attempts,
            body_ciphertext: base64::engine::general_purpose::STANDARD.encode(&m.body_ciphertext),
        }
    }
}

async fn get_message_for_delivery(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<MessageForDelivery>, ApiError> {
    let message = messages::get(state.db.pool(), &message_id).await?;
    Ok(Json(message.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageStatusResponse {
    pub message_id: String,
    pub status: String,
    pub attempts: u32,
}

/// `UpdateStatus`: `queued -> delivering` (worker claiming a popped
/// job, attempts incremented — see [`messages::claim_for_delivery`]) or
/// `delivering -> queued|failed` (retry or attempt-cap transitions).
async fn update_status(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<MessageStatusResponse>, ApiError> {
    let status = MessageStatus::parse(&req.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", req.status)))?;

    let message = if status == MessageStatus::Delivering {
        messages::claim_for_delivery(state.db.pool(), &message_id).await?
    } else {
        messages::update_status(
            state.db.pool(),
            &message_id,
            StatusUpdate { status, last_error: req.last_error },
        )
        .await?
    };

    Ok(Json(MessageStatusResponse {
        message_id: message.message_id,
        status: message.status.as_str().to_string(),
        attempts: message.attempts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StuckQuery {
    /// Rows in `delivering` with `updated_at` older than this many seconds
    /// are considered abandoned by a crashed worker.
    pub older_than_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct StuckMessagesResponse {
    pub message_ids: Vec<String>,
}

/// Backs the worker startup reconciliation sweep. The worker has no
/// direct database access — it only talks to the Queue and this API — so
/// the `delivering`-older-than-threshold scan that `db::messages::
/// find_stuck_delivering` already implements is exposed here rather than
/// duplicated as worker-side SQL.
async fn list_stuck_delivering(
    State(state): State<AppState>,
    Query(query): Query<StuckQuery>,
) -> Result<Json<StuckMessagesResponse>, ApiError> {
    let older_than = Utc::now() - chrono::Duration::seconds(query.older_than_secs.max(0));
    let rows = messages::find_stuck_delivering(state.db.pool(), older_than).await?;
    Ok(Json(StuckMessagesResponse { message_ids: rows.into_iter().map(|m| m.message_id).collect() }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmDeliveryRequest {
    pub message_id: String,
}

/// `ConfirmDelivery`: `delivering -> delivered`, sets `delivered_at`.
async fn confirm_delivery(
    State(state): State<AppState>,
    Json(req): Json<ConfirmDeliveryRequest>,
) -> Result<Json<MessageStatusResponse>, ApiError> {
    let message = messages::update_status(
        state.db.pool(),
        &req.message_id,
        StatusUpdate { status: MessageStatus::Delivered, last_error: None },
    )
    .await?;

    Ok(Json(MessageStatusResponse {
        message_id: message.message_id,
        status: message.status.as_str().to_string(),
        attempts: message.attempts,
    }))
}
