//! SQLite-backed persistence for the Store of record.
//!
//! Every entity table is a thin serde-shaped mirror of `broker_common::model`;
//! row <-> struct conversion is hand-written (`row_to_*`), preferring
//! explicit mapping over a query-macro or ORM layer.

pub mod audit;
pub mod certificates;
pub mod clients;
pub mod messages;
pub mod migrations;
pub mod users;

use broker_common::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Database connection pool shared by every route handler.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect(database_url)
            .await
            .map_err(|e| Error::Fatal(format!("database connection failed: {e}")))?;

        tracing::info!("database connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("database connection closed");
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn create_test_db() -> Database {
    let db = Database::new("sqlite::memory:").await.expect("open in-memory db");
    db.migrate().await.expect("migrate in-memory db");
    db
}
