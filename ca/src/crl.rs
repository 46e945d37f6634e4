//! Certificate Revocation List.
//!
//! Interoperability with external CRL consumers is not required, only a
//! deterministic, CA-signed list ordered by serial — so this is a small
//! `serde`-based structure signed with the CA's RSA key directly, rather
//! than a full RFC 5280 encoding.

use broker_common::{Error, Result};
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crl {
    pub generated_at: DateTime<Utc>,
    /// Revoked serials, ordered ascending — the "deterministic" part of
    /// PublishCRL's contract.
    pub revoked_serials: Vec<String>,
    pub signature: Vec<u8>,
}

impl Crl {
    /// Build and sign a CRL from an already-sorted serial list.
    pub fn sign(ca_key: &RsaPrivateKey, mut revoked_serials: Vec<String>, now: DateTime<Utc>) -> Result<Self> {
        revoked_serials.sort();
        let signing_key = SigningKey::<Sha256>::new(ca_key.clone());
        let payload = Self::canonical_payload(&revoked_serials, now);
        let signature = signing_key.sign(&payload).to_vec();
        Ok(Self {
            generated_at: now,
            revoked_serials,
            signature,
        })
    }

    fn canonical_payload(revoked_serials: &[String], generated_at: DateTime<Utc>) -> Vec<u8> {
        format!("{}|{}", generated_at.to_rfc3339(), revoked_serials.join(","))
            .into_bytes()
    }

    pub fn verify_signature(&self, ca_public_key: &rsa::RsaPublicKey) -> Result<()> {
        use rsa::pkcs1v15::{Signature, VerifyingKey};
        use rsa::signature::Verifier;

        let verifying_key = VerifyingKey::<Sha256>::new(ca_public_key.clone());
        let payload = Self::canonical_payload(&self.revoked_serials, self.generated_at);
        let signature = Signature::try_from(self.signature.as_slice())
            .map_err(|e| Error::Internal(format!("malformed CRL signature: {e}")))?;
        verifying_key
            .verify(&payload, &signature)
            .map_err(|_| Error::Internal("CRL signature verification failed".into()))
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.revoked_serials.binary_search_by(|s| s.as_str().cmp(serial)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn crl_roundtrips_and_verifies() {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = key.to_public_key();
        let now = Utc::now();
        let crl = Crl::sign(&key, vec!["002".into(), "001".into()], now).unwrap();
        assert_eq!(crl.revoked_serials, vec!["001".to_string(), "002".to_string()]);
        assert!(crl.verify_signature(&public).is_ok());
        assert!(crl.contains("001"));
        assert!(!crl.contains("999"));
    }
}
