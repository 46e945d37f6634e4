//! Persistence seam for `Certificate` rows.
//!
//! The CA crate never touches a database directly — `store` implements this
//! trait over its `sqlx` pool, so the cryptographic logic here stays
//! testable against an in-memory fake.

use async_trait::async_trait;
use broker_common::model::Certificate;
use broker_common::Result;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CertificateRegistry: Send + Sync {
    async fn insert(&self, cert: &Certificate) -> Result<()>;

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>>;

    /// The active (non-revoked) certificate for a given CN, if any.
    async fn find_active_by_cn(&self, cn: &str) -> Result<Option<Certificate>>;

    /// The single active CA row, if the CA has been initialized.
    async fn active_ca(&self) -> Result<Option<Certificate>>;

    async fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<()>;

    /// All revoked serials — the contents of `PublishCRL`'s body.
    async fn all_revoked_serials(&self) -> Result<Vec<String>>;

    /// Atomically revoke `old_serial` and insert `new_cert` — either both
    /// happen or neither. `store`'s implementation wraps this in a single
    /// database transaction.
    async fn revoke_and_reissue(
        &self,
        old_serial: &str,
        reason: &str,
        at: DateTime<Utc>,
        new_cert: &Certificate,
    ) -> Result<()>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryRegistry {
        certs: Mutex<HashMap<String, Certificate>>,
    }

    #[async_trait]
    impl CertificateRegistry for InMemoryRegistry {
        async fn insert(&self, cert: &Certificate) -> Result<()> {
            self.certs
                .lock()
                .await
                .insert(cert.serial.clone(), cert.clone());
            Ok(())
        }

        async fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
            Ok(self.certs.lock().await.get(serial).cloned())
        }

        async fn find_active_by_cn(&self, cn: &str) -> Result<Option<Certificate>> {
            Ok(self
                .certs
                .lock()
                .await
                .values()
                .find(|c| c.subject_cn == cn && c.revoked_at.is_none())
                .cloned())
        }

        async fn active_ca(&self) -> Result<Option<Certificate>> {
            use broker_common::model::CertificateKind;
            Ok(self
                .certs
                .lock()
                .await
                .values()
                .find(|c| c.kind == CertificateKind::Ca && c.revoked_at.is_none())
                .cloned())
        }

        async fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
            if let Some(cert) = self.certs.lock().await.get_mut(serial) {
                cert.revoked_at = Some(at);
                cert.revocation_reason = Some(reason.to_string());
            }
            Ok(())
        }

        async fn all_revoked_serials(&self) -> Result<Vec<String>> {
            let mut serials: Vec<String> = self
                .certs
                .lock()
                .await
                .values()
                .filter(|c| c.revoked_at.is_some())
                .map(|c| c.serial.clone())
                .collect();
            serials.sort();
            Ok(serials)
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
}
