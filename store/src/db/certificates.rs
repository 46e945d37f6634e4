//! Certificate bookkeeping table backing `broker_ca::CertificateRegistry`
//!. The trait lives in the `ca` crate; this module is the sqlx
//! implementation of its storage contract, kept in `store` since `ca` must
//! stay free of a database dependency.

use broker_common::model::{Certificate, CertificateKind};
use broker_common::{Error, Result};
use sqlx::{Row, SqlitePool};

pub async fn insert(pool: &SqlitePool, cert: &Certificate) -> Result<()> {
    sqlx::query(
        "INSERT INTO certificates
            (serial, subject_cn, kind, issued_at, expires_at, fingerprint_sha256, revoked_at, revocation_reason)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&cert.serial)
    .bind(&cert.subject_cn)
    .bind(cert.kind.as_str())
    .bind(cert.issued_at)
    .bind(cert.expires_at)
    .bind(&cert.fingerprint_sha256)
    .bind(cert.revoked_at)
    .bind(&cert.revocation_reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_by_serial(pool: &SqlitePool, serial: &str) -> Result<Option<Certificate>> {
    let row = sqlx::query("SELECT * FROM certificates WHERE serial = ?")
        .bind(serial)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_certificate).transpose()
}

/// The most recently issued, not-yet-revoked certificate for a CN, used to
/// enforce the one-active-certificate-per-CN invariant.
pub async fn find_active_by_cn(pool: &SqlitePool, cn: &str) -> Result<Option<Certificate>> {
    let row = sqlx::query(
        "SELECT * FROM certificates WHERE subject_cn = ? AND revoked_at IS NULL
         ORDER BY issued_at DESC LIMIT 1",
    )
    .bind(cn)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_certificate).transpose()
}

pub async fn active_ca(pool: &SqlitePool) -> Result<Option<Certificate>> {
    let row = sqlx::query(
        "SELECT * FROM certificates WHERE kind = 'ca' AND revoked_at IS NULL
         ORDER BY issued_at DESC LIMIT 1",
    )
    .bind(CertificateKind::Ca.as_str())
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_certificate).transpose()
}

pub async fn mark_revoked(
    pool: &SqlitePool,
    serial: &str,
    revoked_at: chrono::DateTime<chrono::Utc>,
    reason: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE certificates SET revoked_at = ?, revocation_reason = ? WHERE serial = ? AND revoked_at IS NULL",
    )
    .bind(revoked_at)
    .bind(reason)
    .bind(serial)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::AlreadyRevoked);
    }
    Ok(())
}

/// Every certificate ever issued, newest first, for the operator
/// `GET /admin/certificates` listing.
pub async fn list(pool: &SqlitePool) -> Result<Vec<Certificate>> {
    let rows = sqlx::query("SELECT * FROM certificates ORDER BY issued_at DESC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_certificate).collect()
}

pub async fn all_revoked_serials(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT serial FROM certificates WHERE revoked_at IS NOT NULL")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("serial")).collect())
}

/// Atomically revokes `old_serial` and inserts `new_cert`, so a renewal
/// never leaves two active certificates for the same CN visible to a
/// concurrent reader.
pub async fn revoke_and_reissue(
    pool: &SqlitePool,
    old_serial: &str,
    revoked_at: chrono::DateTime<chrono::Utc>,
    new_cert: &Certificate,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        "UPDATE certificates SET revoked_at = ?, revocation_reason = 'renewed' WHERE serial = ? AND revoked_at IS NULL",
    )
    .bind(revoked_at)
    .bind(old_serial)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::AlreadyRevoked);
    }

    sqlx::query(
        "INSERT INTO certificates
            (serial, subject_cn, kind, issued_at, expires_at, fingerprint_sha256, revoked_at, revocation_reason)
         VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)",
    )
    .bind(&new_cert.serial)
    .bind(&new_cert.subject_cn)
    .bind(new_cert.kind.as_str())
    .bind(new_cert.issued_at)
    .bind(new_cert.expires_at)
    .bind(&new_cert.fingerprint_sha256)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

fn row_to_certificate(row: &sqlx::sqlite::SqliteRow) -> Result<Certificate> {
    let kind_str: String = row.get("kind");
    let kind = CertificateKind::parse(&kind_str)
        .ok_or_else(|| Error::Internal(format!("unknown certificate kind in db: {kind_str}")))?;

    Ok(Certificate {
        serial: row.get("serial"),
        subject_cn: row.get("subject_cn"),
        kind,
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        fingerprint_sha256: row.get("fingerprint_sha256"),
        revoked_at: row.get("revoked_at"),
        revocation_reason: row.get("revocation_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;
    use chrono::{Duration, Utc};

    fn sample(serial: &str, cn: &str, kind: CertificateKind) -> Certificate {
        let now = Utc::now();
        Certificate {
            serial: serial.to_string(),
            subject_cn: cn.to_string(),
            kind,
            issued_at: now,
            expires_at: now + Duration::days(365),
            fingerprint_sha256: "deadbeef".to_string(),
            revoked_at: None,
            revocation_reason: None,
        }
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("s1", "acme", CertificateKind::Client)).await.unwrap();
        insert(db.pool(), &sample("s2", "beta", CertificateKind::Worker)).await.unwrap();
        let all = list(db.pool()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn revoke_is_guarded_against_double_revoke() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("s1", "acme", CertificateKind::Client)).await.unwrap();
        mark_revoked(db.pool(), "s1", Utc::now(), "operator request").await.unwrap();
        let err = mark_revoked(db.pool(), "s1", Utc::now(), "operator request").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRevoked));
    }

    #[tokio::test]
    async fn renew_revokes_old_and_inserts_new_atomically() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("s1", "acme", CertificateKind::Client)).await.unwrap();
        let new_cert = sample("s2", "acme", CertificateKind::Client);
        revoke_and_reissue(db.pool(), "s1", Utc::now(), &new_cert).await.unwrap();

        assert!(find_by_serial(db.pool(), "s1").await.unwrap().unwrap().is_revoked());
        let active = find_active_by_cn(db.pool(), "acme").await.unwrap().unwrap();
        assert_eq!(active.serial, "s2");
    }
}
