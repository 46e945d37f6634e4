//! Request-gating middleware for the two API surfaces this crate serves:
//! a CN-prefix gate on the internal mTLS API, and a bearer-token extractor
//! plus a per-subject rate limiter on the operator API.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, request::Parts};
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use broker_common::model::UserRole;
use broker_common::tls::PeerCertificate;

/// Gates the internal mTLS API: the peer certificate must pass a live
/// `Verify` against the certificate registry (revoked/expired/unknown
/// rejected even if the rustls handshake itself accepted the chain), and
/// the CN must begin with `proxy-` or `worker-`. The TLS layer only checks
/// chain validity and the validity window; it has no CRL or registry hook,
/// so a revoked component cert within its validity window would otherwise
/// be accepted here.
pub async fn require_component_cn(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerCertificate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let der = peer.der().ok_or(ApiError::AuthenticationFailed)?;
    let cn = broker_ca::verify::peer_cn_from_der(der)?;

    let verify_result = state.ca.verify(der).await?;
    if !verify_result.valid {
        return Err(if verify_result.revoked {
            broker_common::Error::ClientRevoked.into()
        } else {
            ApiError::AuthenticationFailed
        });
    }

    if !(cn.starts_with("proxy-") || cn.starts_with("worker-")) {
        return Err(ApiError::Forbidden(format!(
            "common name '{cn}' is not an authorized internal component"
        )));
    }
    Ok(next.run(request).await)
}

/// The authenticated operator, extracted from a validated `access` token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role != UserRole::Admin {
            return Err(ApiError::Forbidden("admin role required".to_string()));
        }
        Ok(())
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::AuthenticationFailed)?;
        let token = header_value.strip_prefix("Bearer ").ok_or(ApiError::AuthenticationFailed)?;
        let claims = state.tokens.validate_access(token).map_err(|_| ApiError::AuthenticationFailed)?;
        let role = UserRole::parse(&claims.role).ok_or(ApiError::AuthenticationFailed)?;
        Ok(AuthUser { user_id: claims.sub, email: claims.email, role })
    }
}

/// Per-subject token bucket on the operator API, keyed by the bearer
/// token's subject (falling back to "anonymous" for unauthenticated
/// requests, which are rejected downstream by `AuthUser` anyway). Mirrors
/// Ingress's per-client-CN limiter, just with a different key source.
pub async fn operator_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .and_then(|token| state.tokens.validate_access(token).ok())
        .map(|claims| claims.sub)
        .unwrap_or_else(|| "anonymous".to_string());

    let result = state.operator_rate_limiter.check(&key).await;
    if !result.allowed {
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}
