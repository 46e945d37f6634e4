//! mTLS HTTP client for the Store's internal API. The worker
//! never touches the database directly — every state transition on a
//! `Message` goes through one of these calls, giving each external
//! dependency a small dedicated client module rather than hand-rolling
//! requests inline at call sites.

use broker_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageStatusResponse {
    pub message_id: String,
    pub status: String,
    pub attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct MessageForDelivery {
    pub message_id: String,
    pub client_id: String,
    pub status: String,
    pub attempts: u32,
    pub body_ciphertext: String,
}

#[derive(Debug, Serialize)]
struct UpdateStatusRequest<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ConfirmDeliveryRequest<'a> {
    message_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StuckMessagesResponse {
    message_ids: Vec<String>,
}

impl StoreClient {
    /// Builds a `reqwest::Client` that presents `client_cert_pem`/
    /// `client_key_pem` for mTLS and trusts only `ca_cert_pem` — never the
    /// system's WebPKI roots, since every peer on this connection (the
    /// Store) is issued by this workspace's own CA — the same "trust only
    /// this CA" rule `ca::verify` applies on the server side.
    pub fn new(
        base_url: String,
        ca_cert_pem: &[u8],
        client_cert_pem: &[u8],
        client_key_pem: &[u8],
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut identity_pem = Vec::with_capacity(client_cert_pem.len() + client_key_pem.len());
        identity_pem.extend_from_slice(client_cert_pem);
        identity_pem.extend_from_slice(client_key_pem);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| Error::Fatal(format!("invalid worker client certificate/key: {e}")))?;
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

    /// Fetches the message record and ciphertext needed to drive delivery.
    pub async fn get_message_for_delivery(&self, message_id: &str) -> Result<MessageForDelivery> {
        let url = format!("{}/internal/messages/{message_id}", self.base_url);
        let response = self.http.get(&url).send().await.map_err(classify_transport_error)?;
        handle_response(response).await
    }

    /// `UpdateStatus(message_id, delivering, attempts+1)`.
    /// Dispatched to `store::db::messages::claim_for_delivery` on the Store
    /// side, which is the only path that increments `attempts`.
    pub async fn claim_for_delivery(&self, message_id: &str) -> Result<MessageStatusResponse> {
        self.update_status(message_id, "delivering", None).await
    }

    pub async fn update_status(
        &self,
        message_id: &str,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<MessageStatusResponse> {
        let url = format!("{}/internal/messages/{message_id}/status", self.base_url);
        let response = self
            .http
            .put(&url)
            .json(&UpdateStatusRequest { status, last_error })
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    /// The delivery call itself: an mTLS POST to the Store's
    /// delivery-confirmation endpoint. The Store performs
    /// `delivering -> delivered` on success; any non-2xx response or
    /// transport failure is the "delivery failed" branch.
    pub async fn confirm_delivery(&self, message_id: &str) -> Result<MessageStatusResponse> {
        let url = format!("{}/internal/messages/deliver", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&ConfirmDeliveryRequest { message_id })
            .send()
            .await
            .map_err(classify_transport_error)?;
        handle_response(response).await
    }

    /// Finds message ids stuck in `delivering`
    /// older than `2 * delivery_timeout`.
    pub async fn list_stuck_delivering(&self, older_than_secs: i64) -> Result<Vec<String>> {
        let url = format!("{}/internal/messages/stuck", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("older_than_secs", older_than_secs)])
            .send()
            .await
            .map_err(classify_transport_error)?;
        let body: StuckMessagesResponse = handle_response(response).await?;
        Ok(body.message_ids)
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
        409 => Error::IllegalTransition(body),
        401 | 403 => Error::Unauthorized,
        429 => Error::RateLimited,
        503 => Error::StoreUnavailable(body),
        s if s >= 500 => Error::StoreUnavailable(format!("status {s}: {body}")),
        _ => Error::Internal(format!("unexpected Store response {status}: {body}")),
    }
}

/// Transport-level failures (connect refused, TLS handshake failure,
/// timeout) are all transient dependency errors — the Worker's retry path
/// treats them identically to a 503 from the Store.
fn classify_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(err.to_string())
    } else {
        Error::StoreUnavailable(err.to_string())
    }
}
