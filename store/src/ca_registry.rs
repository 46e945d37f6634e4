//! Wires `broker_ca::CertificateRegistry` to the `sqlx` pool this crate
//! already manages in `db::certificates`, so `CertificateAuthority` can be
//! constructed against the real store instead of the CA crate's in-memory
//! test fake.

use async_trait::async_trait;
use broker_ca::CertificateRegistry;
use broker_common::model::Certificate;
use broker_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct SqlCertificateRegistry {
    pool: SqlitePool,
}

impl SqlCertificateRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CertificateRegistry for SqlCertificateRegistry {
    async fn insert(&self, cert: &Certificate) -> Result<()> {
        crate::db::certificates::insert(&self.pool, cert).await
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Certificate>> {
        crate::db::certificates::find_by_serial(&self.pool, serial).await
    }

    async fn find_active_by_cn(&self, cn: &str) -> Result<Option<Certificate>> {
        crate::db::certificates::find_active_by_cn(&self.pool, cn).await
    }

    async fn active_ca(&self) -> Result<Option<Certificate>> {
        crate::db::certificates::active_ca(&self.pool).await
    }

    async fn mark_revoked(&self, serial: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        crate::db::certificates::mark_revoked(&self.pool, serial, at, reason).await
    }

    async fn all_revoked_serials(&self) -> Result<Vec<String>> {
        crate::db::certificates::all_revoked_serials(&self.pool).await
    }

    async fn revoke_and_reissue(
        &self,
        old_serial: &str,
        _reason: &str,
        at: DateTime<Utc>,
        new_cert: &Certificate,
    ) -> Result<()> {
        crate::db::certificates::revoke_and_reissue(&self.pool, old_serial, at, new_cert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;
    use broker_common::model::CertificateKind;

    #[tokio::test]
    async fn round_trips_through_the_real_pool() {
        let db = create_test_db().await;
        let registry = SqlCertificateRegistry::new(db.pool().clone());
        let now = Utc::now();
        let cert = Certificate {
            serial: "s1".to_string(),
            subject_cn: "acme".to_string(),
            kind: CertificateKind::Client,
            issued_at: now,
            expires_at: now + chrono::Duration::days(365),
            fingerprint_sha256: "deadbeef".to_string(),
            revoked_at: None,
            revocation_reason: None,
        };
        registry.insert(&cert).await.unwrap();
        assert!(registry.find_by_serial("s1").await.unwrap().is_some());
        assert!(registry.find_active_by_cn("acme").await.unwrap().is_some());
    }
}
