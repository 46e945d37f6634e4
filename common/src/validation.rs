//! Input validation for Ingress's `SubmitMessage` payload.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// E.164: `+` followed by 7-15 digits, leading digit non-zero. Normalization
/// is rejection, not rewriting — no spaces/dashes are stripped.
static SENDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{6,14}$").expect("valid regex"));

pub const MAX_BODY_CODEPOINTS: usize = 1000;
pub const MIN_BODY_CODEPOINTS: usize = 1;
pub const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

/// Validate and return the sender number unchanged (it is not rewritten).
pub fn validate_sender(sender_number: &str) -> Result<&str> {
    if SENDER_RE.is_match(sender_number) {
        Ok(sender_number)
    } else {
        Err(Error::InvalidSender(format!(
            "sender {sender_number:?} is not a valid E.164 number"
        )))
    }
}

/// Normalize `body` to Unicode NFC and check its length in code points.
/// Control characters are allowed and preserved.
pub fn validate_body(body: &str) -> Result<String> {
    let normalized: String = body.nfc().collect();
    let len = normalized.chars().count();
    if !(MIN_BODY_CODEPOINTS..=MAX_BODY_CODEPOINTS).contains(&len) {
        return Err(Error::InvalidBody(format!(
            "body has {len} code points, expected {MIN_BODY_CODEPOINTS}..={MAX_BODY_CODEPOINTS}"
        )));
    }
    Ok(normalized)
}

/// Mask a validated E.164 sender for display: first 2 + last 4 *digits*,
/// rest replaced with `*`, leading `+` preserved. Expects `sender` to
/// already have passed [`validate_sender`].
pub fn mask_sender(sender: &str) -> String {
    let digits: Vec<char> = sender.chars().filter(|c| c.is_ascii_digit()).collect();
    let len = digits.len();
    if len <= 6 {
        return format!("+{}", "*".repeat(len));
    }
    let head: String = digits[..2].iter().collect();
    let tail: String = digits[len - 4..].iter().collect();
    let stars = "*".repeat(len - 6);
    format!("+{head}{stars}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_numbers() {
        assert!(validate_sender("+12025550123").is_ok());
    }

    #[test]
    fn rejects_boundary_senders() {
        for bad in [
            "+1",
            "+12345678901234567",
            "+0123456789",
            "0123456789",
            "+12 345 6789",
        ] {
            assert!(validate_sender(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn rejects_body_boundary_lengths() {
        assert!(validate_body("").is_err());
        let too_long = "a".repeat(1001);
        assert!(validate_body(&too_long).is_err());
        let ok = "a".repeat(1000);
        assert!(validate_body(&ok).is_ok());
    }

    #[test]
    fn preserves_control_chars() {
        let body = "hello\tworld\n";
        let normalized = validate_body(body).unwrap();
        assert!(normalized.contains('\t'));
        assert!(normalized.contains('\n'));
    }

    #[test]
    fn masks_sender_consistently() {
        assert_eq!(mask_sender("+12025550123"), "+12*****0123");
    }
}
