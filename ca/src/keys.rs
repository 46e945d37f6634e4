//! RSA key pair generation.
//!
//! `rcgen::KeyPair::generate()` only produces ECDSA/Ed25519 keys, but explicit
//! RSA key sizes are required here (4096-bit CA, 2048-bit leaf), so key
//! material is generated with the `rsa` crate and handed to `rcgen` as a
//! pre-made PKCS#8 key pair signed with `rcgen::PKCS_RSA_SHA256`.

use broker_common::{Error, Result};
use pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;

pub const CA_KEY_BITS: usize = 4096;
pub const LEAF_KEY_BITS: usize = 2048;

/// A generated RSA key pair, available both as PKCS#8 DER (for `rcgen`) and
/// as the raw `rsa` key for any future direct signing needs.
pub struct RsaKeyMaterial {
    pub private_key: RsaPrivateKey,
    pub pkcs8_der: Vec<u8>,
}

impl RsaKeyMaterial {
    pub fn generate(bits: usize) -> Result<Self> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| Error::Internal(format!("RSA key generation failed: {e}")))?;
        let pkcs8_der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::Internal(format!("PKCS#8 encoding failed: {e}")))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            private_key,
            pkcs8_der,
        })
    }

    /// Wrap this key as an `rcgen` key pair usable for self-signing or
    /// signing a subordinate certificate.
    pub fn to_rcgen_key_pair(&self) -> Result<rcgen::KeyPair> {
        rcgen::KeyPair::from_pkcs8_der_and_sign_algo(
            &rcgen::PrivatePkcs8KeyDer::from(self.pkcs8_der.clone()),
            &rcgen::PKCS_RSA_SHA256,
        )
        .map_err(|e| Error::Internal(format!("rcgen key pair conversion failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_keys_of_requested_size() {
        let key = RsaKeyMaterial::generate(2048).unwrap();
        assert_eq!(key.private_key.size() * 8, 2048);
        assert!(!key.pkcs8_der.is_empty());
    }
}
