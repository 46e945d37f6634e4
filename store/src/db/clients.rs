//! Client CRUD.

use broker_common::model::Client;
use broker_common::{Error, Result};
use sqlx::{Row, SqlitePool};

pub async fn insert(pool: &SqlitePool, client: &Client) -> Result<()> {
    let existing = find(pool, &client.cn).await?;
    if existing.is_some() {
        return Err(Error::DuplicateCn(client.cn.clone()));
    }

    sqlx::query(
        "INSERT INTO clients (cn, display_name, active, created_at, domain_tag)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&client.cn)
    .bind(&client.display_name)
    .bind(client.active)
    .bind(client.created_at)
    .bind(&client.domain_tag)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find(pool: &SqlitePool, cn: &str) -> Result<Option<Client>> {
    let row = sqlx::query("SELECT * FROM clients WHERE cn = ?")
        .bind(cn)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_client).transpose()
}

pub async fn get(pool: &SqlitePool, cn: &str) -> Result<Client> {
    find(pool, cn).await?.ok_or_else(|| Error::UnknownClient)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<Client>> {
    let rows = sqlx::query("SELECT * FROM clients ORDER BY created_at ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_client).collect()
}

pub async fn set_active(pool: &SqlitePool, cn: &str, active: bool) -> Result<()> {
    let result = sqlx::query("UPDATE clients SET active = ? WHERE cn = ?")
        .bind(active)
        .bind(cn)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::UnknownClient);
    }
    Ok(())
}

fn row_to_client(row: &sqlx::sqlite::SqliteRow) -> Result<Client> {
    Ok(Client {
        cn: row.get("cn"),
        display_name: row.get("display_name"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        domain_tag: row.get("domain_tag"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;
    use chrono::Utc;

    fn sample(cn: &str) -> Client {
        Client {
            cn: cn.to_string(),
            display_name: "Acme Corp".to_string(),
            active: true,
            created_at: Utc::now(),
            domain_tag: Some("acme.example".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_cn() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("acme")).await.unwrap();
        let err = insert(db.pool(), &sample("acme")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateCn(_)));
    }

    #[tokio::test]
    async fn deactivate_then_lookup() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("acme")).await.unwrap();
        set_active(db.pool(), "acme", false).await.unwrap();
        let client = get(db.pool(), "acme").await.unwrap();
        assert!(!client.active);
    }
}
