//! Operator user CRUD and the `user_clients` link table gating
//! which clients a non-admin user may see.

use broker_common::model::{User, UserRole};
use broker_common::{Error, Result};
use sqlx::{Row, SqlitePool};

pub async fn insert(pool: &SqlitePool, user: &User) -> Result<()> {
    let email = user.email.to_lowercase();
    let existing = find_by_email(pool, &email).await?;
    if existing.is_some() {
        return Err(Error::Conflict(format!("user with email {email} already exists")));
    }

    sqlx::query(
        "INSERT INTO users (user_id, email, password_hash, role, active, last_login_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.user_id)
    .bind(&email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.active)
    .bind(user.last_login_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// `email` is lower-cased before lookup so that callers (login, user
/// creation) do not need to normalize case themselves.
pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE email = ?")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_user).transpose()
}

pub async fn get(pool: &SqlitePool, user_id: &str) -> Result<User> {
    let row = sqlx::query("SELECT * FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?;
    row_to_user(&row)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query("SELECT * FROM users ORDER BY email ASC").fetch_all(pool).await?;
    rows.iter().map(row_to_user).collect()
}

pub async fn delete(pool: &SqlitePool, user_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

pub async fn record_login(pool: &SqlitePool, user_id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
    sqlx::query("UPDATE users SET last_login_at = ? WHERE user_id = ?")
        .bind(at)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn link_client(pool: &SqlitePool, user_id: &str, client_cn: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO user_clients (user_id, client_cn) VALUES (?, ?)")
        .bind(user_id)
        .bind(client_cn)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn linked_clients(pool: &SqlitePool, user_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT client_cn FROM user_clients WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("client_cn")).collect())
}

/// Admins see every client; a `user` only sees clients they're linked to.
pub async fn can_see_client(pool: &SqlitePool, user: &User, client_cn: &str) -> Result<bool> {
    if user.role == UserRole::Admin {
        return Ok(true);
    }
    let row = sqlx::query(
        "SELECT COUNT(*) as n FROM user_clients WHERE user_id = ? AND client_cn = ?",
    )
    .bind(&user.user_id)
    .bind(client_cn)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("n") > 0)
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::parse(&role_str)
        .ok_or_else(|| Error::Internal(format!("unknown user role in db: {role_str}")))?;

    Ok(User {
        user_id: row.get("user_id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        active: row.get("active"),
        last_login_at: row.get("last_login_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;

    fn sample(email: &str, role: UserRole) -> User {
        User {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: "$2b$12$dummy".to_string(),
            role,
            active: true,
            last_login_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("a@example.com", UserRole::Admin)).await.unwrap();
        let err = insert(db.pool(), &sample("a@example.com", UserRole::User)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn email_uniqueness_and_lookup_are_case_insensitive() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("Admin@Example.com", UserRole::Admin)).await.unwrap();

        let err = insert(db.pool(), &sample("admin@example.com", UserRole::User)).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let found = find_by_email(db.pool(), "ADMIN@EXAMPLE.COM").await.unwrap();
        assert_eq!(found.unwrap().email, "admin@example.com");
    }

    #[tokio::test]
    async fn user_sees_only_linked_clients() {
        let db = create_test_db().await;
        let user = sample("u@example.com", UserRole::User);
        insert(db.pool(), &user).await.unwrap();
        link_client(db.pool(), &user.user_id, "acme").await.unwrap();

        assert!(can_see_client(db.pool(), &user, "acme").await.unwrap());
        assert!(!can_see_client(db.pool(), &user, "other").await.unwrap());
    }

    #[tokio::test]
    async fn admin_sees_every_client() {
        let db = create_test_db().await;
        let admin = sample("admin@example.com", UserRole::Admin);
        insert(db.pool(), &admin).await.unwrap();
        assert!(can_see_client(db.pool(), &admin, "whatever").await.unwrap());
    }
}
