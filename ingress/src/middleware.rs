//! Request-gating middleware for `POST /api/v1/messages`. Shaped after `store::middleware::
//! require_component_cn`'s "extract the peer cert extension, resolve CN,
//! enforce a policy" pattern, generalized here to a full live `Verify` +
//! client-active lookup instead of a CN-prefix check, and after the
//! the Store's rate-limiting middleware token-bucket shape
//! for the per-client limiter.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use broker_common::tls::PeerCertificate;
use broker_common::Error;

/// The submitting client, resolved by [`authenticate`] and threaded to the
/// handler via request extensions.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub client_id: String,
}

/// The mTLS verification step, the live-`Verify` rule, and the "active Client row"
/// check. On any rejection, writes one `tls.rejected` audit entry before returning the mapped error — the only place in
/// Ingress that writes to the audit log, since every other outcome is
/// audited by the Store's `RegisterMessage` handler instead.
pub async fn authenticate(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerCertificate>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let der = match peer.der() {
        Some(der) => der,
        None => {
            audit_rejected(&state, "unknown", "no client certificate presented").await;
            return Err(Error::Unauthorized.into());
        }
    };

    let cn = match broker_ca::verify::peer_cn_from_der(der) {
        Ok(cn) => cn,
        Err(_) => {
            audit_rejected(&state, "unknown", "unparseable client certificate").await;
            return Err(Error::Unauthorized.into());
        }
    };

    let verify_result = crate::ca_verify::verify(state.ca_registry.as_ref(), der).await?;
    if !verify_result.valid {
        let reason = if verify_result.revoked {
            "certificate revoked"
        } else if verify_result.expired {
            "certificate expired"
        } else {
            "certificate unknown to the CA registry"
        };
        audit_rejected(&state, &cn, reason).await;
        return Err(if verify_result.revoked {
            Error::ClientRevoked.into()
        } else {
            Error::Unauthorized.into()
        });
    }

    // A client without an active Client row is rejected even if
    // its cert is otherwise valid".
    let client = match broker_store::db::clients::find(&state.db_pool, &cn).await? {
        Some(client) if client.active => client,
        Some(_) => {
            audit_rejected(&state, &cn, "client is deactivated").await;
            return Err(Error::UnknownClient.into());
        }
        None => {
            audit_rejected(&state, &cn, "no client record for this certificate CN").await;
            return Err(Error::UnknownClient.into());
        }
    };

    request.extensions_mut().insert(ClientContext { client_id: client.cn });
    Ok(next.run(request).await)
}

async fn audit_rejected(state: &AppState, cn: &str, reason: &str) {
    let details = serde_json::json!({ "reason": reason });
    if let Err(e) = broker_store::db::audit::record(&state.db_pool, cn, "tls.rejected", cn, Some(details)).await {
        tracing::warn!(error = %e, "failed to record tls.rejected audit entry");
    }
}

/// Per-client token bucket,
/// keyed by the certificate CN resolved in [`authenticate`] rather than
/// IP or bearer subject — mirrors `store::middleware::operator_rate_limit`
/// re-keyed for Ingress's mTLS identity.
pub async fn rate_limit(
    State(state): State<AppState>,
    Extension(peer): Extension<PeerCertificate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = peer
        .der()
        .and_then(|der| broker_ca::verify::peer_cn_from_der(der).ok())
        .unwrap_or_else(|| "unknown".to_string());

    let result = state.rate_limiter.check(&key).await;
    if !result.allowed {
        return Err(broker_common::Error::RateLimited.into());
    }
    Ok(next.run(request).await)
}
