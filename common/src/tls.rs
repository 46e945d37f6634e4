//! mTLS plumbing shared by every HTTPS-terminating binary (Ingress, Store).
//!
//! Certificate *verification* decisions live in `ca::verify` (the CA crate
//! owns the trust root); this module only loads PEM material from disk and
//! wires a verified peer certificate into each connection's request
//! extensions, since `axum_server`'s rustls acceptor does not expose peer
//! certificates to handlers on its own.

use crate::{Error, Result};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use rustls::pki_types::CertificateDer;
use std::io;
use std::path::Path;
use tower::Layer;

/// The verified peer certificate (DER), if the TLS handshake presented one.
/// `client_verifier`/`server_tls_config` in `ca::verify` already reject
/// handshakes with no cert or an untrusted one before a connection reaches
/// this point, so in practice this is always `Some` on routes gated by
/// mTLS; it is `Option` because the type is shared with non-mTLS listeners.
#[derive(Clone, Debug, Default)]
pub struct PeerCertificate(pub Option<CertificateDer<'static>>);

impl PeerCertificate {
    pub fn der(&self) -> Option<&[u8]> {
        self.0.as_ref().map(|c| c.as_ref())
    }
}

/// An `axum_server` `Accept` wrapper around `RustlsAcceptor` that stamps the
/// peer's certificate into the per-connection service's request extensions
/// via `axum::Extension`, since `axum_server` does not expose the
/// `rustls::ServerConnection` to handlers through `ConnectInfo` the way a
/// plain TCP peer address is.
#[derive(Clone)]
pub struct MtlsAcceptor {
    inner: RustlsAcceptor,
}

impl MtlsAcceptor {
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for MtlsAcceptor
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = tokio_rustls::server::TlsStream<I>;
    type Service = <axum::Extension<PeerCertificate> as Layer<S>>::Service;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = io::Result<(Self::Stream, Self::Service)>> + Send>,
    >;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let (tls_stream, service) = inner.accept(stream, service).await?;
            let peer_cert = {
                let (_, session) = tls_stream.get_ref();
                session
                    .peer_certificates()
                    .and_then(|certs| certs.first().cloned())
            };
            let service = tower::ServiceBuilder::new()
                .layer(axum::Extension(PeerCertificate(peer_cert)))
                .service(service);
            Ok((tls_stream, service))
        })
    }
}

/// Read a PEM file containing exactly one certificate, returning its DER
/// bytes.
pub async fn load_cert_der(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let pem = tokio::fs::read(path.as_ref()).await?;
    let mut reader = std::io::BufReader::new(pem.as_slice());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Internal(format!("invalid certificate PEM: {e}")))?;
    certs
        .into_iter()
        .next()
        .map(|c| c.to_vec())
        .ok_or_else(|| Error::Fatal(format!("{} contains no certificate", path.as_ref().display())))
}

/// Read a PEM file containing a PKCS#8 private key, returning its DER bytes.
pub async fn load_key_der(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let pem = tokio::fs::read(path.as_ref()).await?;
    let mut reader = std::io::BufReader::new(pem.as_slice());
    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Internal(format!("invalid private key PEM: {e}")))?;
    keys.into_iter()
        .next()
        .map(|k| k.secret_pkcs8_der().to_vec())
        .ok_or_else(|| Error::Fatal(format!("{} contains no PKCS#8 private key", path.as_ref().display())))
}
