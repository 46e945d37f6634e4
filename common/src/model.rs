//! Entity types shared by the Store, Ingress, and Worker crates.
//!
//! These mirror the data model's entities directly: fixed, explicit record
//! types with named fields, no dynamic row shapes. Serialization to/from
//! JSON happens only at API edges; SQL row mapping is done by hand in
//! `store::db`, not derived here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a `Message`. Terminal states never transition out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Delivering,
    Delivered,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivering => "delivering",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(MessageStatus::Queued),
            "delivering" => Some(MessageStatus::Delivering),
            "delivered" => Some(MessageStatus::Delivered),
            "failed" => Some(MessageStatus::Failed),
            "cancelled" => Some(MessageStatus::Cancelled),
            _ => None,
        }
    }

    /// True once a status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition in the Message state
    /// machine. Operator cancellation is legal from any non-terminal
    /// state; everything else follows the documented diagram.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (*self, next) {
            (Queued, Delivering) => true,
            (Delivering, Delivered) => true,
            (Delivering, Queued) => true, // retry
            (Delivering, Failed) => true, // attempt cap
            (Queued, Cancelled) | (Delivering, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub client_id: String,
    pub sender_fingerprint: Vec<u8>,
    pub sender_masked: String,
    pub body_ciphertext: Vec<u8>,
    pub status: MessageStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Invariant: `delivered_at` is non-null iff status is `delivered`.
    pub fn invariants_hold(&self) -> bool {
        (self.status == MessageStatus::Delivered) == self.delivered_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub cn: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub domain_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "user" => Some(UserRole::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateKind {
    Ca,
    Server,
    Proxy,
    Worker,
    Client,
}

impl CertificateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateKind::Ca => "ca",
            CertificateKind::Server => "server",
            CertificateKind::Proxy => "proxy",
            CertificateKind::Worker => "worker",
            CertificateKind::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ca" => Some(CertificateKind::Ca),
            "server" => Some(CertificateKind::Server),
            "proxy" => Some(CertificateKind::Proxy),
            "worker" => Some(CertificateKind::Worker),
            "client" => Some(CertificateKind::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: String,
    pub subject_cn: String,
    pub kind: CertificateKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fingerprint_sha256: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl Certificate {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub at: DateTime<Utc>,
    pub details_json: Option<String>,
}

/// Outcome of a certificate trust decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub revoked: bool,
    pub expired: bool,
    pub unknown_issuer: bool,
}

impl VerifyResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            revoked: false,
            expired: false,
            unknown_issuer: false,
        }
    }

    pub fn revoked() -> Self {
        Self {
            valid: false,
            revoked: true,
            expired: false,
            unknown_issuer: false,
        }
    }

    pub fn expired() -> Self {
        Self {
            valid: false,
            revoked: false,
            expired: true,
            unknown_issuer: false,
        }
    }

    pub fn unknown_issuer() -> Self {
        Self {
            valid: false,
            revoked: false,
            expired: false,
            unknown_issuer: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_status_transitions() {
        assert!(MessageStatus::Queued.can_transition_to(MessageStatus::Delivering));
        assert!(MessageStatus::Delivering.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Delivering.can_transition_to(MessageStatus::Queued));
        assert!(!MessageStatus::Delivered.can_transition_to(MessageStatus::Queued));
        assert!(!MessageStatus::Failed.can_transition_to(MessageStatus::Delivering));
    }

    #[test]
    fn message_status_terminal() {
        assert!(MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Cancelled.is_terminal());
        assert!(!MessageStatus::Queued.is_terminal());
        assert!(!MessageStatus::Delivering.is_terminal());
    }

    #[test]
    fn message_status_roundtrips_through_str() {
        for s in ["queued", "delivering", "delivered", "failed", "cancelled"] {
            let parsed = MessageStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(MessageStatus::parse("bogus").is_none());
    }
}
