//! Opaque unique identifier generation.

use chrono::Utc;
use rand::RngCore;

/// A 13-hex-digit millisecond timestamp prefix (lexicographically sortable
/// up to the year 10889) followed by 16 hex digits of randomness, joined
/// with `-`. 30 characters total, comfortably under the 64-char cap.
pub fn new_message_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rand_bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut rand_bytes);
    format!("{millis:013x}-{}", hex::encode(rand_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_time_sortable() {
        let a = new_message_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_message_id();
        assert!(a < b);
        assert!(a.len() <= 64);
    }
}
