//! Append-only audit log. Every mutating operator action
//! and every security-relevant system event (cert revocation, password
//! truncation, CA initialization) writes one row here.

use broker_common::model::AuditEntry;
use broker_common::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

pub async fn record(pool: &SqlitePool, actor: &str, action: &str, target: &str, details: Option<impl Serialize>) -> Result<()> {
    let details_json = details.map(|d| serde_json::to_string(&d)).transpose()?;
    sqlx::query(
        "INSERT INTO audit_log (actor, action, target, at, details_json) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(actor)
    .bind(action)
    .bind(target)
    .bind(Utc::now())
    .bind(details_json)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct AuditFilter {
    pub action: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list(pool: &SqlitePool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut sql = String::from("SELECT * FROM audit_log WHERE 1=1");
    if filter.action.is_some() {
        sql.push_str(" AND action = ?");
    }
    sql.push_str(" ORDER BY at DESC LIMIT ? OFFSET ?");

    let mut query = sqlx::query(&sql);
    if let Some(action) = &filter.action {
        query = query.bind(action);
    }
    query = query.bind(filter.limit).bind(filter.offset);

    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| AuditEntry {
            id: row.get("id"),
            actor: row.get("actor"),
            action: row.get("action"),
            target: row.get("target"),
            at: row.get("at"),
            details_json: row.get("details_json"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;
    use serde_json::json;

    #[tokio::test]
    async fn record_then_list() {
        let db = create_test_db().await;
        record(db.pool(), "system", "password.truncated", "user:u1", Some(json!({"severity": "WARN"})))
            .await
            .unwrap();
        let entries = list(db.pool(), &AuditFilter { action: None, limit: 10, offset: 0 }).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "password.truncated");
    }
}
