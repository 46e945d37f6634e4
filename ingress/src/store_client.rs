//! mTLS HTTP client for the Store's internal API, used for the
//! two calls Ingress makes on the Message write path: `RegisterMessage`
//! (step 7) and the `UpdateStatus(..., "failed", ...)` fallback when
//! enqueue retries are exhausted. Mirrors
//! `broker_worker::store_client::StoreClient` — the same mTLS-identity
//! construction, the same transport/status error classification — since
//! both processes talk to the identical Store API surface.

use broker_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RegisterMessageRequest<'a> {
    message_id: &'a str,
    client_id: &'a str,
    sender_fingerprint: &'a str,
    sender_masked: &'a str,
    body_ciphertext: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RegisterMessageResponse {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct UpdateStatusRequest<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct MessageStatusResponse {
    pub message_id: String,
    pub status: String,
    pub attempts: u32,
}

impl StoreClient {
    /// Builds a `reqwest::Client` presenting `cert_pem`/`key_pem` for mTLS
    /// and trusting only `ca_cert_pem` — this is Ingress acting in its
    /// *client* role (CN `proxy-*`) against the Store's internal mTLS
    /// listener, reusing the same identity it presents as a TLS server to
    /// inbound submissions (see `ingress::config::TlsConfig`).
    pub fn new(
        base_url: String,
        ca_cert_pem: &[u8],
        cert_pem: &[u8],
        key_pem: &[u8],
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut identity_pem = Vec::with_capacity(cert_pem.len() + key_pem.len());
        identity_pem.extend_from_slice(cert_pem);
        identity_pem.extend_from_slice(key_pem);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| Error::Fatal(format!("invalid ingress client certificate/key: {e}")))?;
        let ca_cert = reqwest::Certificate::from_pem(ca_cert_pem)
            .map_err(|e| Error::Fatal(format!("invalid CA certificate: {e}")))?;

        let http = reqwest::Client::builder()
            .identity(identity)
            .add_root_certificate(ca_cert)
            .tls_built_in_root_certs(false)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to build mTLS HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    /// Registers a message in the `queued` state. Base64 fields are passed through verbatim; the caller
    /// is responsible for encoding (see `routes::submit_message`).
    #[allow(clippy::too_many_arguments)]
    pub async fn register_message(
        &self,
        message_id: &str,
        client_id: &str,
        sender_fingerprint_b64: &str,
        sender_masked: &str,
        body_ciphertext_b64: &str,
    ) -> Result<RegisterMessageResponse> {
        let url = format!("{}/internal/messages/register", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&RegisterMessageRequest {
                message_id,
                client_id,
                sender_fingerprint: sender_fingerprint_b64,
                sender_masked,
                body_ciphertext: body_ciphertext_b64,
            })
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    /// `GET /health` on the Store's internal listener, for Ingress's own
    /// `/health` aggregation. Unauthenticated at the route level — only the mTLS
    /// handshake itself is required, matching `store::routes::health_router`
    /// being merged outside `require_component_cn`'s layer.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).send().await.map_err(classify_transport_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable(format!("store health check returned {}", response.status())))
        }
    }

    /// Only used for the `failed` fallback when enqueue retries are
    /// exhausted: the message must not be left orphaned in
    /// `queued` with no corresponding queue entry.
    pub async fn mark_failed(&self, message_id: &str, last_error: &str) -> Result<MessageStatusResponse> {
        let url = format!("{}/internal/messages/{message_id}/status", self.base_url);
        let response = self
            .http
            .put(&url)
            .json(&UpdateStatusRequest { status: "failed", last_error: Some(last_error) })
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| Error::Internal(format!("malformed Store response: {e}")));
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status_error(status, body))
}

fn classify_status_error(status: reqwest::StatusCode, body: String) -> Error {
    match status.as_u16() {
        404 => Error::NotFound(body),
        409 => Error::IdempotencyConflict(body),
        401 | 403 => Error::Unauthorized,
        429 => Error::RateLimited,
        503 => Error::StoreUnavailable(body),
        s if s >= 500 => Error::StoreUnavailable(format!("status {s}: {body}")),
        _ => Error::Internal(format!("unexpected Store response {status}: {body}")),
    }
}

/// Transport-level failures are all transient dependency errors — the
/// same retry-at-the-boundary treatment the worker gives them.
fn classify_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::StoreUnavailable(err.to_string())
    }
}
