//! The CA/Trust component's operations.

use crate::crl::Crl;
use crate::keys::{RsaKeyMaterial, CA_KEY_BITS, LEAF_KEY_BITS};
use crate::registry::CertificateRegistry;
use broker_common::model::{Certificate, CertificateKind, VerifyResult};
use broker_common::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default CA validity: 10 years.
pub const DEFAULT_CA_VALIDITY_DAYS: i64 = 3650;

/// A freshly issued certificate, returned to the caller of Issue*/Renew.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub serial: String,
    pub cert_pem: String,
    pub key_pem: String,
    /// PEM chain back to the CA (here: just the CA cert, a single
    /// intermediate-free chain).
    pub chain_pem: String,
}

pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
}

pub struct CertificateAuthority {
    registry: Arc<dyn CertificateRegistry>,
    ca_key: RsaPrivateKey,
    ca_key_der: Vec<u8>,
    ca_cert_der: Vec<u8>,
    ca_serial: String,
    ca_cn: String,
    /// Serializes issue/revoke so concurrent calls against the same
    /// registry rows do not interleave.
    lock: Mutex<()>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

fn random_serial() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Extract the serial exactly as it is DER-encoded in the certificate, so a
/// later `Verify` call (which re-parses the presented cert) always agrees
/// with the serial stored at issuance time, independent of any padding the
/// ASN.1 INTEGER encoding of the serial number applied.
fn extract_serial_hex(cert_der: &[u8]) -> Result<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert_der)
        .map_err(|e| Error::Internal(format!("cannot re-parse issued certificate: {e}")))?;
    Ok(hex::encode(parsed.tbs_certificate.raw_serial()))
}

impl CertificateAuthority {
    /// Initialize a new CA. Fails with `AlreadyInitialized` if an active CA
    /// row already exists in the registry.
    pub async fn initialize(
        registry: Arc<dyn CertificateRegistry>,
        cn: &str,
        validity_days: i64,
    ) -> Result<(Self, IssuedCertificate)> {
        if registry.active_ca().await?.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let key = RsaKeyMaterial::generate(CA_KEY_BITS)?;
        let rcgen_key = key.to_rcgen_key_pair()?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::days(validity_days);
        let serial_seed = random_serial();

        let mut params = rcgen::CertificateParams::new(vec![])
            .map_err(|e| Error::Internal(format!("invalid CA params: {e}")))?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        params.not_before = to_rcgen_time(now);
        params.not_after = to_rcgen_time(expires_at);
        params.serial_number = Some(rcgen::SerialNumber::from_slice(
            &hex::decode(&serial_seed).unwrap(),
        ));

        let cert = params
            .self_signed(&rcgen_key)
            .map_err(|e| Error::Internal(format!("CA self-sign failed: {e}")))?;
        let cert_der = cert.der().to_vec();
        let fingerprint = sha256_hex(&cert_der);
        let serial = extract_serial_hex(&cert_der)?;

        let row = Certificate {
            serial: serial.clone(),
            subject_cn: cn.to_string(),
            kind: CertificateKind::Ca,
            issued_at: now,
            expires_at,
            fingerprint_sha256: fingerprint,
            revoked_at: None,
            revocation_reason: None,
        };
        registry.insert(&row).await?;

        let issued = IssuedCertificate {
            serial: serial.clone(),
            cert_pem: pem_encode_cert(&cert_der),
            key_pem: pem_encode_key(&key.pkcs8_der),
            chain_pem: pem_encode_cert(&cert_der),
        };

        let authority = Self {
            registry,
            ca_key: key.private_key,
            ca_key_der: key.pkcs8_der,
            ca_cert_der: cert_der,
            ca_serial: serial,
            ca_cn: cn.to_string(),
            lock: Mutex::new(()),
        };

        Ok((authority, issued))
    }

    /// Reconstruct the authority handle from already-initialized key
    /// material loaded from disk (the normal startup path after the first
    /// `initialize` call). `ca_cert_der`/`ca_key_der` come from the
    /// filesystem paths named in `CA_CERT_PATH` and the sibling key file.
    pub fn load(
        registry: Arc<dyn CertificateRegistry>,
        ca_cert_der: Vec<u8>,
        ca_key_der: Vec<u8>,
        ca_serial: String,
        ca_cn: String,
    ) -> Result<Self> {
        let ca_key = RsaPrivateKey::from_pkcs8_der(&ca_key_der)
            .map_err(|e| Error::Fatal(format!("cannot parse CA private key: {e}")))?;
        Ok(Self {
            registry,
            ca_key,
            ca_key_der,
            ca_cert_der,
            ca_serial,
            ca_cn,
            lock: Mutex::new(()),
        })
    }

    pub fn ca_cert_der(&self) -> &[u8] {
        &self.ca_cert_der
    }

    fn rcgen_ca_key(&self) -> Result<rcgen::KeyPair> {
        rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
            &rcgen::PrivatePkcs8KeyDer::from(self.ca_key_der.clone()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .map_err(|e| Error::Internal(format!("rcgen CA key conversion failed: {e}")))
    }

    fn rcgen_ca_cert_params(&self) -> Result<rcgen::CertificateParams> {
        // Re-derive params purely for use as an `Issuer` — not re-signed.
        // The subject DN must match the CA's actual self-signed cert so
        // issued leaves carry the right issuer field.
        let mut params = rcgen::CertificateParams::new(vec![])
            .map_err(|e| Error::Internal(format!("invalid CA params: {e}")))?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, &self.ca_cn);
        Ok(params)
    }

    async fn issue_leaf(
        &self,
        kind: CertificateKind,
        cn: &str,
        validity_days: i64,
    ) -> Result<IssuedCertificate> {
        let _guard = self.lock.lock().await;

        if let Some(existing) = self.registry.find_active_by_cn(cn).await? {
            if existing.revoked_at.is_none() {
                return Err(Error::DuplicateCn(cn.to_string()));
            }
        }

        let key = RsaKeyMaterial::generate(LEAF_KEY_BITS)?;
        let leaf_key_pair = key.to_rcgen_key_pair()?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::days(validity_days);
        let serial_seed = random_serial();

        let mut params = rcgen::CertificateParams::new(vec![cn.to_string()])
            .map_err(|e| Error::Internal(format!("invalid leaf params: {e}")))?;
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        params.not_before = to_rcgen_time(now);
        params.not_after = to_rcgen_time(expires_at);
        params.serial_number = Some(rcgen::SerialNumber::from_slice(
            &hex::decode(&serial_seed).unwrap(),
        ));

        let ca_key_pair = self.rcgen_ca_key()?;
        let ca_params = self.rcgen_ca_cert_params()?;
        let issuer = rcgen::Issuer::from_params(&ca_params, &ca_key_pair);

        let cert = params
            .signed_by(&leaf_key_pair, &issuer)
            .map_err(|e| Error::Internal(format!("leaf signing failed: {e}")))?;
        let cert_der = cert.der().to_vec();
        let fingerprint = sha256_hex(&cert_der);
        let serial = extract_serial_hex(&cert_der)?;

        let row = Certificate {
            serial: serial.clone(),
            subject_cn: cn.to_string(),
            kind,
            issued_at: now,
            expires_at,
            fingerprint_sha256: fingerprint,
            revoked_at: None,
            revocation_reason: None,
        };
        self.registry.insert(&row).await?;

        Ok(IssuedCertificate {
            serial,
            cert_pem: pem_encode_cert(&cert_der),
            key_pem: pem_encode_key(&key.pkcs8_der),
            chain_pem: pem_encode_cert(&self.ca_cert_der),
        })
    }

    pub async fn issue_client_cert(&self, cn: &str, validity_days: i64) -> Result<IssuedCertificate> {
        self.issue_leaf(CertificateKind::Client, cn, validity_days).await
    }

    pub async fn issue_component_cert(
        &self,
        kind: CertificateKind,
        cn: &str,
        validity_days: i64,
    ) -> Result<IssuedCertificate> {
        if matches!(kind, CertificateKind::Ca | CertificateKind::Client) {
            return Err(Error::Internal(format!(
                "{} is not a component certificate kind",
                kind.as_str()
            )));
        }
        self.issue_leaf(kind, cn, validity_days).await
    }

    /// Idempotent on already-revoked serials.
    pub async fn revoke(&self, serial: &str, reason: &str) -> Result<RevokeOutcome> {
        let _guard = self.lock.lock().await;
        let cert = self
            .registry
            .find_by_serial(serial)
            .await?
            .ok_or_else(|| Error::NotFound(format!("certificate {serial}")))?;
        if cert.revoked_at.is_some() {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }
        self.registry.mark_revoked(serial, reason, Utc::now()).await?;
        Ok(RevokeOutcome::Revoked)
    }

    /// Equivalent to Revoke(old) + Issue(same subject), atomic in the
    /// registry.
    pub async fn renew(&self, serial: &str, validity_days: i64) -> Result<IssuedCertificate> {
        let _guard = self.lock.lock().await;
        let old = self
            .registry
            .find_by_serial(serial)
            .await?
            .ok_or_else(|| Error::NotFound(format!("certificate {serial}")))?;

        let key = RsaKeyMaterial::generate(if old.kind == CertificateKind::Ca {
            CA_KEY_BITS
        } else {
            LEAF_KEY_BITS
        })?;
        let leaf_key_pair = key.to_rcgen_key_pair()?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::days(validity_days);
        let new_serial_seed = random_serial();

        let mut params = rcgen::CertificateParams::new(vec![old.subject_cn.clone()])
            .map_err(|e| Error::Internal(format!("invalid renew params: {e}")))?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, &old.subject_cn);
        params.not_before = to_rcgen_time(now);
        params.not_after = to_rcgen_time(expires_at);
        params.serial_number = Some(rcgen::SerialNumber::from_slice(
            &hex::decode(&new_serial_seed).unwrap(),
        ));

        let ca_key_pair = self.rcgen_ca_key()?;
        let ca_params = self.rcgen_ca_cert_params()?;
        let issuer = rcgen::Issuer::from_params(&ca_params, &ca_key_pair);

        let cert = params
            .signed_by(&leaf_key_pair, &issuer)
            .map_err(|e| Error::Internal(format!("renew signing failed: {e}")))?;
        let cert_der = cert.der().to_vec();
        let fingerprint = sha256_hex(&cert_der);
        let new_serial = extract_serial_hex(&cert_der)?;

        let new_row = Certificate {
            serial: new_serial.clone(),
            subject_cn: old.subject_cn.clone(),
            kind: old.kind,
            issued_at: now,
            expires_at,
            fingerprint_sha256: fingerprint,
            revoked_at: None,
            revocation_reason: None,
        };

        self.registry
            .revoke_and_reissue(serial, "renewed", now, &new_row)
            .await?;

        Ok(IssuedCertificate {
            serial: new_serial,
            cert_pem: pem_encode_cert(&cert_der),
            key_pem: pem_encode_key(&key.pkcs8_der),
            chain_pem: pem_encode_cert(&self.ca_cert_der),
        })
    }

    /// Decision function: (1) chain to active CA, (2) within validity
    /// window, (3) serial not revoked, (4) fingerprint matches registry.
    pub async fn verify(&self, cert_der: &[u8]) -> Result<VerifyResult> {
        let (_, parsed) = x509_parser::parse_x509_certificate(cert_der)
            .map_err(|e| Error::Internal(format!("cannot parse certificate: {e}")))?;

        let serial = hex::encode(parsed.tbs_certificate.raw_serial());
        let fingerprint = sha256_hex(cert_der);

        let Some(record) = self.registry.find_by_serial(&serial).await? else {
            return Ok(VerifyResult::unknown_issuer());
        };

        if record.fingerprint_sha256 != fingerprint {
            return Ok(VerifyResult::unknown_issuer());
        }

        if record.revoked_at.is_some() {
            return Ok(VerifyResult::revoked());
        }

        if Utc::now() >= record.expires_at {
            return Ok(VerifyResult::expired());
        }

        Ok(VerifyResult::ok())
    }

    /// Deterministic CRL ordered by serial, signed by the CA.
    pub async fn publish_crl(&self) -> Result<Crl> {
        let serials = self.registry.all_revoked_serials().await?;
        Crl::sign(&self.ca_key, serials, Utc::now())
    }

    pub fn ca_serial(&self) -> &str {
        &self.ca_serial
    }
}

fn to_rcgen_time(dt: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .expect("timestamp within representable range")
}

fn pem_encode_cert(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec()))
}

fn pem_encode_key(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new("PRIVATE KEY", der.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fake::InMemoryRegistry;

    async fn new_ca() -> CertificateAuthority {
        let registry: Arc<dyn CertificateRegistry> = Arc::new(InMemoryRegistry::default());
        let (authority, _issued) =
            CertificateAuthority::initialize(registry, "test-ca", DEFAULT_CA_VALIDITY_DAYS)
                .await
                .unwrap();
        authority
    }

    #[tokio::test]
    async fn second_initialize_fails() {
        let registry: Arc<dyn CertificateRegistry> = Arc::new(InMemoryRegistry::default());
        let (authority, _) =
            CertificateAuthority::initialize(registry.clone(), "test-ca", 3650)
                .await
                .unwrap();
        drop(authority);
        let second = CertificateAuthority::initialize(registry, "test-ca", 3650).await;
        assert!(matches!(second, Err(Error::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn issues_and_verifies_client_cert() {
        let ca = new_ca().await;
        let issued = ca.issue_client_cert("client-1", 365).await.unwrap();
        assert!(!issued.cert_pem.is_empty());
    }

    #[tokio::test]
    async fn duplicate_cn_rejected() {
        let ca = new_ca().await;
        ca.issue_client_cert("dup", 365).await.unwrap();
        let second = ca.issue_client_cert("dup", 365).await;
        assert!(matches!(second, Err(Error::DuplicateCn(_))));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let ca = new_ca().await;
        let issued = ca.issue_client_cert("revoke-me", 365).await.unwrap();
        let first = ca.revoke(&issued.serial, "compromised").await.unwrap();
        assert!(matches!(first, RevokeOutcome::Revoked));
        let second = ca.revoke(&issued.serial, "compromised").await.unwrap();
        assert!(matches!(second, RevokeOutcome::AlreadyRevoked));
    }
}
