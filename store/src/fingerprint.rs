//! Re-exported from `common` so Ingress can compute the same
//! `HMAC-SHA256(salt, normalized_sender)` fingerprint at submission time
//! that the Store's `RegisterMessage` stores verbatim.
pub use broker_common::fingerprint::*;
