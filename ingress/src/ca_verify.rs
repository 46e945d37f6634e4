//! Live `Verify` lookups against the Certificate Authority's registry
//!.
//!
//! Deliberately does **not** construct a `broker_ca::CertificateAuthority`
//! (which requires the CA's private signing key) — an internet-facing
//! submission endpoint has no business holding the key that issues and
//! renews certificates. Instead this re-implements the read-only half of
//! `CertificateAuthority::verify` directly against the `CertificateRegistry`
//! trait, mirroring `ca::authority::verify`'s parse/lookup/compare steps
//! exactly but without the capability to sign anything.

use broker_ca::CertificateRegistry;
use broker_common::model::VerifyResult;
use broker_common::{Error, Result};
use sha2::{Digest, Sha256};

pub async fn verify(registry: &dyn CertificateRegistry, cert_der: &[u8]) -> Result<VerifyResult> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::Internal(format!("cannot parse peer certificate: {e}")))?;

    let serial = hex::encode(parsed.tbs_certificate.raw_serial());
    let fingerprint = sha256_hex(cert_der);

    let Some(record) = registry.find_by_serial(&serial).await? else {
        return Ok(VerifyResult::unknown_issuer());
    };

    if record.fingerprint_sha256 != fingerprint {
        return Ok(VerifyResult::unknown_issuer());
    }

    if record.revoked_at.is_some() {
        return Ok(VerifyResult::revoked());
    }

    if chrono::Utc::now() >= record.expires_at {
        return Ok(VerifyResult::expired());
    }

    Ok(VerifyResult::ok())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_ca::authority::CertificateAuthority;
    use broker_common::model::Certificate;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// A standalone in-memory `CertificateRegistry`, since `ca::registry::
    /// fake::InMemoryRegistry` is `#[cfg(test)]`-gated inside the `ca`
    /// crate itself and is not visible to a downstream crate's own tests.
    #[derive(Default)]
    struct TestRegistry {
        certs: Mutex<HashMap<String, Certificate>>,
    }

    #[async_trait]
    impl CertificateRegistry for TestRegistry {
        async fn insert(&self, cert: &Certificate) -> Result<()> {
            self.certs.lock().await.insert(cert.serial.clone(), cert.clone());
            Ok(())
        }

        async fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
            Ok(self.certs.lock().await.get(serial).cloned())
        }

        async fn find_active_by_cn(&self, cn: &str) -> Result<Option<Certificate>> {
            Ok(self.certs.lock().await.values().find(|c| c.subject_cn == cn && c.revoked_at.is_none()).cloned())
        }

        async fn active_ca(&self) -> Result<Option<Certificate>> {
            use broker_common::model::CertificateKind;
            Ok(self.certs.lock().await.values().find(|c| c.kind == CertificateKind::Ca && c.revoked_at.is_none()).cloned())
        }

        async fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
            if let Some(cert) = self.certs.lock().await.get_mut(serial) {
                cert.revoked_at = Some(at);
                cert.revocation_reason = Some(reason.to_string());
            }
            Ok(())
        }

        async fn all_revoked_serials(&self) -> Result<Vec<String>> {
            Ok(self.certs.lock().await.values().filter(|c| c.revoked_at.is_some()).map(|c| c.serial.clone()).collect())
        }

        async fn revoke_and_reissue(
            &self,
            old_serial: &str,
            reason: &str,
            at: DateTime<Utc>,
            new_cert: &Certificate,
        ) -> Result<()> {
            let mut guard = self.certs.lock().await;
            if let Some(old) = guard.get_mut(old_serial) {
                old.revoked_at = Some(at);
                old.revocation_reason = Some(reason.to_string());
            }
            guard.insert(new_cert.serial.clone(), new_cert.clone());
            Ok(())
        }
    }

    fn leaf_der(pem_str: &str) -> Vec<u8> {
        pem::parse(pem_str).unwrap().contents().to_vec()
    }

    #[tokio::test]
    async fn unrecorded_certificate_is_unknown_issuer() {
        let registry = Arc::new(TestRegistry::default());
        let (_, issued) = CertificateAuthority::initialize(registry.clone(), "test-ca", 3650).await.unwrap();
        let mut tampered = leaf_der(&issued.cert_pem);
        tampered[tampered.len() - 1] ^= 0xFF;
        let result = verify(registry.as_ref(), &tampered).await.unwrap();
        assert!(result.unknown_issuer || !result.valid);
    }

    #[tokio::test]
    async fn issued_client_cert_verifies_ok() {
        let registry = Arc::new(TestRegistry::default());
        let (ca, _) = CertificateAuthority::initialize(registry.clone(), "test-ca", 3650).await.unwrap();
        let issued = ca.issue_client_cert("acme", 365).await.unwrap();
        let result = verify(registry.as_ref(), &leaf_der(&issued.cert_pem)).await.unwrap();
        assert!(result.valid);
    }

    #[tokio::test]
    async fn revoked_cert_is_rejected() {
        let registry = Arc::new(TestRegistry::default());
        let (ca, _) = CertificateAuthority::initialize(registry.clone(), "test-ca", 3650).await.unwrap();
        let issued = ca.issue_client_cert("acme", 365).await.unwrap();
        ca.revoke(&issued.serial, "test").await.unwrap();
        let result = verify(registry.as_ref(), &leaf_der(&issued.cert_pem)).await.unwrap();
        assert!(result.revoked);
    }
}
