//! `rustls` verifier construction from the live CA trust root.
//!
//! Trust only this system's own CA, never Mozilla's WebPKI roots, since
//! every peer on these connections (client, proxy, worker, store) is
//! issued a certificate by this CA.

use broker_common::{Error, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::sync::Arc;

fn root_store(ca_cert_der: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    roots
        .add(rustls::pki_types::CertificateDer::from(ca_cert_der.to_vec()))
        .map_err(|e| Error::Internal(format!("invalid CA certificate: {e}")))?;
    Ok(roots)
}

/// Build a server-cert verifier trusting only this system's CA, used by
/// Workers to validate the Store's presented server certificate.
pub fn server_verifier(ca_cert_der: &[u8]) -> Result<Arc<WebPkiServerVerifier>> {
    let roots = root_store(ca_cert_der)?;
    WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build server verifier: {e}")))
}

/// Build a client-cert verifier trusting only this system's CA, used by
/// Ingress and the Store's internal API to authenticate mTLS peers.
pub fn client_verifier(
    ca_cert_der: &[u8],
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let roots = root_store(ca_cert_der)?;
    WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build client verifier: {e}")))
}

/// Build a `rustls::ServerConfig` requiring mutual TLS: the peer must
/// present a certificate chaining to `ca_cert_der`. Used by the Ingress and
/// Store HTTPS listeners via `axum_server`'s rustls adaptor.
pub fn server_tls_config(
    ca_cert_der: &[u8],
    server_cert_der: &[u8],
    server_key_der: &[u8],
) -> Result<rustls::ServerConfig> {
    let verifier = client_verifier(ca_cert_der)?;
    let cert_chain = vec![rustls::pki_types::CertificateDer::from(
        server_cert_der.to_vec(),
    )];
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(
        server_key_der.to_vec(),
    ));
    rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::Internal(format!("failed to build TLS server config: {e}")))
}

/// Extract the verified peer certificate's subject CN from a request's
/// TLS connection info. Populated into `axum`'s request extensions by a
/// small `Connected`-trait adaptor registered on the `axum_server` listener
/// at each mTLS-terminating binary's startup.
pub fn peer_cn_from_der(cert_der: &[u8]) -> Result<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::Internal(format!("cannot parse peer certificate: {e}")))?;
    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Internal("peer certificate has no CN".to_string()))
}
