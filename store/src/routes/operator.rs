//! Operator bearer-token API: login/refresh, message listing,
//! certificate management, user management, and stats. Gated by
//! [`AuthUser`] (a validated access token) on every route except the two
//! auth endpoints themselves, and by [`crate::middleware::operator_rate_limit`]
//! on all of them.

use crate::db::{audit, certificates, clients as clients_db, messages, users};
use crate::error::ApiError;
use crate::middleware::{operator_rate_limit, AuthUser};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use broker_common::model::{CertificateKind, MessageStatus, User, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/portal/auth/login", post(login))
        .route("/portal/auth/refresh", post(refresh))
        .route("/portal/messages", get(list_messages))
        .route("/admin/messages/:id/cancel", post(cancel_message))
        .route("/admin/certificates/generate", post(generate_certificate))
        .route("/admin/certificates/revoke", post(revoke_certificate))
        .route("/admin/certificates", get(list_certificates))
        .route("/admin/users", post(create_user).get(list_users))
        .route("/admin/users/:id", delete(delete_user))
        .route("/admin/stats", get(stats))
        .layer(from_fn_with_state(state.clone(), operator_rate_limit))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub role: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = users::find_by_email(state.db.pool(), &req.email)
        .await?
        .ok_or(ApiError::AuthenticationFailed)?;

    if !user.active {
        return Err(ApiError::Forbidden("account is deactivated".to_string()));
    }
    if !crate::password::verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::AuthenticationFailed);
    }

    users::record_login(state.db.pool(), &user.user_id, chrono::Utc::now()).await?;
    audit::record(state.db.pool(), &user.user_id, "operator.login", &user.user_id, None::<()>).await?;

    let tokens = state
        .tokens
        .issue(&user.user_id, &user.email, user.role)
        .map_err(|_| ApiError::Internal("token issuance failed".to_string()))?;

    Ok(Json(TokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.access_expires_in_seconds,
        role: user.role.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    // `TokenIssuer::refresh` re-validates the signature and the `typ:
    // refresh` claim; this just needs the subject to re-check the user's
    // current role and active status before minting a new pair.
    let user_id = peek_subject(&req.refresh_token).ok_or(ApiError::AuthenticationFailed)?;
    let user = users::get(state.db.pool(), &user_id).await.map_err(|_| ApiError::AuthenticationFailed)?;
    if !user.active {
        return Err(ApiError::Forbidden("account is deactivated".to_string()));
    }

    let tokens = state
        .tokens
        .refresh(&req.refresh_token, user.role)
        .map_err(|_| ApiError::AuthenticationFailed)?;

    Ok(Json(TokenResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.access_expires_in_seconds,
        role: user.role.as_str().to_string(),
    }))
}

/// Decodes the subject out of a refresh token without validating its
/// signature kind, purely to look the user back up before re-validating
/// the token properly via `TokenIssuer::refresh`. A forged token still
/// fails at `refresh`'s signature check.
fn peek_subject(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    value.get("sub")?.as_str().map(|s| s.to_string())
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub client_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub message_id: String,
    pub client_id: String,
    pub sender_masked: String,
    pub status: String,
    pub attempts: u32,
    pub body: Option<String>,
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `ListMessages`: an `admin` sees every client's messages; a `user`
/// sees only the clients they're linked to via `user_clients`. Message
/// bodies are decrypted for display since visibility has already been
/// scoped by the time a row reaches this handler.
async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let allowed_clients = if auth.role == UserRole::Admin {
        None
    } else {
        Some(users::linked_clients(state.db.pool(), &auth.user_id).await?)
    };

    let status = query.status.as_deref().and_then(MessageStatus::parse);
    let rows = messages::list(
        state.db.pool(),
        &messages::MessageFilter {
            client_id: query.client_id,
            status,
            allowed_clients,
            limit: query.limit.clamp(1, 200),
            offset: query.offset.max(0),
        },
    )
    .await?;

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let body = state.encryption.decrypt(&row.body_ciphertext).await.ok().and_then(|b| String::from_utf8(b).ok());
        views.push(MessageView {
            message_id: row.message_id,
            client_id: row.client_id,
            sender_masked: row.sender_masked,
            status: row.status.as_str().to_string(),
            attempts: row.attempts,
            body,
            last_error: row.last_error,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        });
    }
    Ok(Json(views))
}

async fn cancel_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if auth.role != UserRole::Admin {
        let message = messages::get(state.db.pool(), &message_id).await?;
        if !users::can_see_client(state.db.pool(), &user_stub(&auth), &message.client_id).await? {
            return Err(ApiError::permission_denied(message_id));
        }
    }
    let message = messages::cancel(state.db.pool(), &message_id).await?;
    audit::record(state.db.pool(), &auth.user_id, "message.cancelled", &message.message_id, None::<()>).await?;
    Ok(Json(serde_json::json!({"message_id": message.message_id, "status": message.status.as_str()})))
}

/// `can_see_client` only needs `role`/`user_id`; builds a throwaway `User`
/// rather than widening that function's signature to a narrower trait.
fn user_stub(auth: &AuthUser) -> User {
    User {
        user_id: auth.user_id.clone(),
        email: auth.email.clone(),
        password_hash: String::new(),
        role: auth.role,
        active: true,
        last_login_at: None,
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateCertificateRequest {
    pub cn: String,
    pub kind: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
}

fn default_validity_days() -> i64 {
    365
}

#[derive(Debug, Serialize)]
pub struct IssuedCertificateResponse {
    pub serial: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub chain_pem: String,
}

async fn generate_certificate(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<GenerateCertificateRequest>,
) -> Result<Json<IssuedCertificateResponse>, ApiError> {
    auth.require_admin()?;
    let kind = CertificateKind::parse(&req.kind)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown certificate kind: {}", req.kind)))?;

    let issued = if kind == CertificateKind::Client {
        state.ca.issue_client_cert(&req.cn, req.validity_days).await?
    } else {
        state.ca.issue_component_cert(kind, &req.cn, req.validity_days).await?
    };

    if kind == CertificateKind::Client {
        let client = broker_common::model::Client {
            cn: req.cn.clone(),
            display_name: req.cn.clone(),
            active: true,
            created_at: chrono::Utc::now(),
            domain_tag: None,
        };
        // A client row may already exist from a prior cert generation
        // (e.g. renewal); ignore the DuplicateCn error in that case.
        if let Err(broker_common::Error::DuplicateCn(_)) = clients_db::insert(state.db.pool(), &client).await {
        }
    }

    audit::record(state.db.pool(), &auth.user_id, "certificate.issued", &issued.serial, None::<()>).await?;

    Ok(Json(IssuedCertificateResponse {
        serial: issued.serial,
        cert_pem: issued.cert_pem,
        key_pem: issued.key_pem,
        chain_pem: issued.chain_pem,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RevokeCertificateRequest {
    pub serial: String,
    pub reason: String,
}

async fn revoke_certificate(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RevokeCertificateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin()?;
    state.ca.revoke(&req.serial, &req.reason).await?;
    audit::record(state.db.pool(), &auth.user_id, "certificate.revoked", &req.serial, Some(&req.reason)).await?;
    Ok(Json(serde_json::json!({"serial": req.serial, "revoked": true})))
}

#[derive(Debug, Serialize)]
pub struct CertificateView {
    pub serial: String,
    pub subject_cn: String,
    pub kind: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_certificates(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<CertificateView>>, ApiError> {
    auth.require_admin()?;
    let certs = certificates::list(state.db.pool()).await?;
    Ok(Json(
        certs
            .into_iter()
            .map(|c| CertificateView {
                serial: c.serial,
                subject_cn: c.subject_cn,
                kind: c.kind.as_str().to_string(),
                issued_at: c.issued_at,
                expires_at: c.expires_at,
                revoked_at: c.revoked_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub linked_clients: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub active: bool,
}

async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    auth.require_admin()?;
    let role = UserRole::parse(&req.role).ok_or_else(|| ApiError::BadRequest(format!("unknown role: {}", req.role)))?;

    let outcome = crate::password::hash_password(&req.password)?;
    if outcome.truncated {
        audit::record(state.db.pool(), &auth.user_id, "password.truncated", &req.email, None::<()>).await?;
    }

    let user = User {
        user_id: Uuid::new_v4().to_string(),
        email: req.email.to_lowercase(),
        password_hash: outcome.hash,
        role,
        active: true,
        last_login_at: None,
    };
    users::insert(state.db.pool(), &user).await?;
    for cn in &req.linked_clients {
        users::link_client(state.db.pool(), &user.user_id, cn).await?;
    }
    audit::record(state.db.pool(), &auth.user_id, "user.created", &user.user_id, None::<()>).await?;

    Ok(Json(UserView { user_id: user.user_id, email: user.email, role: user.role.as_str().to_string(), active: user.active }))
}

async fn list_users(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<UserView>>, ApiError> {
    auth.require_admin()?;
    let all = users::list(state.db.pool()).await?;
    Ok(Json(
        all.into_iter()
            .map(|u| UserView { user_id: u.user_id, email: u.email, role: u.role.as_str().to_string(), active: u.active })
            .collect(),
    ))
}

async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin()?;
    users::delete(state.db.pool(), &user_id).await?;
    audit::record(state.db.pool(), &auth.user_id, "user.deleted", &user_id, None::<()>).await?;
    Ok(Json(serde_json::json!({"user_id": user_id, "deleted": true})))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queued: i64,
    pub delivering: i64,
    pub delivered: i64,
    pub failed: i64,
    pub cancelled: i64,
}

async fn stats(State(state): State<AppState>, auth: AuthUser) -> Result<Json<StatsResponse>, ApiError> {
    auth.require_admin()?;
    let s = messages::stats(state.db.pool()).await?;
    Ok(Json(StatsResponse {
        queued: s.queued,
        delivering: s.delivering,
        delivered: s.delivered,
        failed: s.failed,
        cancelled: s.cancelled,
    }))
}
