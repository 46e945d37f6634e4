//! Sender fingerprinting: a keyed hash of a normalized
//! E.164 number so the Store never persists the number itself. Lives in
//! `common` since Ingress computes the fingerprint before a message ever
//! reaches the Store, while the Store also needs the same
//! function to decrypt/verify in the operator API. Built on the
//! `hmac`/`sha2` crate family already present transitively through
//! `rcgen`/`rustls`, kept as a direct dependency here since it is
//! load-bearing.

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `HMAC-SHA256(salt, normalized_sender)` — equal fingerprint iff equal
/// normalized E.164 string, never reversible. `salt` is the
/// process-wide `SENDER_HASH_SALT` secret; it is never logged by any caller
/// of this function.
pub fn fingerprint(salt: &str, normalized_sender: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
        .map_err(|e| Error::Internal(format!("invalid HMAC salt: {e}")))?;
    mac.update(normalized_sender.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_senders_produce_equal_fingerprints() {
        let a = fingerprint("salt", "+12025550123").unwrap();
        let b = fingerprint("salt", "+12025550123").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_senders_produce_distinct_fingerprints() {
        let a = fingerprint("salt", "+12025550123").unwrap();
        let b = fingerprint("salt", "+12025550124").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_salts_produce_distinct_fingerprints_for_same_sender() {
        let a = fingerprint("salt-one", "+12025550123").unwrap();
        let b = fingerprint("salt-two", "+12025550123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_32_bytes() {
        let fp = fingerprint("salt", "+12025550123").unwrap();
        assert_eq!(fp.len(), 32);
    }
}
