//! Operator password hashing: bcrypt, with an explicit ≤72-byte
//! truncation rule (bcrypt silently ignores input past 72 bytes; truncating
//! ourselves first and reporting it makes that boundary visible instead of
//! silent).

use broker_common::{Error, Result};

const BCRYPT_MAX_BYTES: usize = 72;
const BCRYPT_COST: u32 = 12;

/// Outcome of hashing, so the caller can write a `password.truncated`
/// WARN audit entry when `truncated` is true.
pub struct HashOutcome {
    pub hash: String,
    pub truncated: bool,
}

pub fn hash_password(password: &str) -> Result<HashOutcome> {
    let (input, truncated) = truncate_to_boundary(password, BCRYPT_MAX_BYTES);
    let hash = bcrypt::hash(input, BCRYPT_COST)
        .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))?;
    Ok(HashOutcome { hash, truncated })
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let (input, _) = truncate_to_boundary(password, BCRYPT_MAX_BYTES);
    bcrypt::verify(input, hash).map_err(|e| Error::Internal(format!("password verification failed: {e}")))
}

/// Truncates to at most `max_bytes` bytes without splitting a UTF-8 code
/// point, returning whether truncation actually happened.
fn truncate_to_boundary(s: &str, max_bytes: usize) -> (&str, bool) {
    if s.len() <= max_bytes {
        return (s, false);
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_password_hashes_without_truncation() {
        let outcome = hash_password("correct horse battery staple").unwrap();
        assert!(!outcome.truncated);
        assert!(verify_password("correct horse battery staple", &outcome.hash).unwrap());
    }

    #[test]
    fn long_password_is_truncated_and_flagged() {
        let long = "a".repeat(100);
        let outcome = hash_password(&long).unwrap();
        assert!(outcome.truncated);
        assert!(verify_password(&"a".repeat(90), &outcome.hash).unwrap());
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let s = "é".repeat(40); // 2 bytes each, 80 bytes total > 72
        let (truncated, was_truncated) = truncate_to_boundary(&s, BCRYPT_MAX_BYTES);
        assert!(was_truncated);
        assert!(truncated.is_char_boundary(truncated.len()));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let outcome = hash_password("hunter2").unwrap();
        assert!(!verify_password("hunter3", &outcome.hash).unwrap());
    }
}
