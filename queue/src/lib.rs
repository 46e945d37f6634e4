//! Durable FIFO of `message_id` tokens.
//!
//! This is a SQLite-backed FIFO, using the same `sqlx` access pattern
//! `store::db` already uses: `Enqueue` is a single-row `INSERT`,
//! `PopBlocking` selects-and-deletes the
//! oldest unpopped row inside one transaction, polling on a short interval up
//! to the caller's timeout (SQLite has no native blocking-pop primitive).
//! Two concurrent `PopBlocking` calls against the same row cannot both
//! succeed, since the delete happens inside a transaction holding that row's
//! lock — this is what gives the at-most-once-pop guarantee without any additional coordination.

use broker_common::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

/// How often `pop_blocking` re-polls the table while waiting for a new
/// entry. Short enough to keep the spec's 5s worker pop timeout responsive, long enough not to hammer the database.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Queue {
    pool: SqlitePool,
}

impl Queue {
    /// `database_url` is the spec's `QUEUE_URL` — for this SQLite-backed
    /// implementation, exactly analogous to the Store's `DATABASE_URL`.
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| Error::Fatal(format!("queue database connection failed: {e}")))?;

        tracing::info!("queue database connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                enqueued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;
        tracing::info!("queue migrations completed");
        Ok(())
    }

    /// Append `message_id` to the tail of the queue. Atomic and durable
    /// before returning — a plain committed `INSERT` satisfies both.
    pub async fn enqueue(&self, message_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO queue_entries (message_id) VALUES (?)")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove and return the oldest entry, or `None` if `timeout` elapses
    /// with the queue empty. At-most-once among concurrent callers: the
    /// select-and-delete happens inside one transaction per poll.
    pub async fn pop_blocking(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message_id) = self.try_pop().await? {
                return Ok(Some(message_id));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
        }
    }

    async fn try_pop(&self) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT id, message_id FROM queue_entries ORDER BY id ASC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let message_id: String = row.get("message_id");

        let deleted = sqlx::query("DELETE FROM queue_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if deleted.rows_affected() == 0 {
            // Lost the race to another popper between select and delete;
            // try again rather than returning a token nobody now owns.
            return Ok(None);
        }
        Ok(Some(message_id))
    }

    /// Observable queue depth, for Ingress backpressure and metrics.
    pub async fn length(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM queue_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_queue() -> Queue {
        let q = Queue::new("sqlite::memory:").await.unwrap();
        q.migrate().await.unwrap();
        q
    }

    #[tokio::test]
    async fn enqueue_then_pop_is_fifo() {
        let q = test_queue().await;
        q.enqueue("m1").await.unwrap();
        q.enqueue("m2").await.unwrap();
        q.enqueue("m3").await.unwrap();

        assert_eq!(q.pop_blocking(Duration::from_millis(50)).await.unwrap(), Some("m1".to_string()));
        assert_eq!(q.pop_blocking(Duration::from_millis(50)).await.unwrap(), Some("m2".to_string()));
        assert_eq!(q.pop_blocking(Duration::from_millis(50)).await.unwrap(), Some("m3".to_string()));
    }

    #[tokio::test]
    async fn pop_blocking_times_out_on_empty_queue() {
        let q = test_queue().await;
        let start = tokio::time::Instant::now();
        let result = q.pop_blocking(Duration::from_millis(300)).await.unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn length_reflects_pending_entries() {
        let q = test_queue().await;
        assert_eq!(q.length().await.unwrap(), 0);
        q.enqueue("m1").await.unwrap();
        q.enqueue("m2").await.unwrap();
        assert_eq!(q.length().await.unwrap(), 2);
        q.pop_blocking(Duration::from_millis(50)).await.unwrap();
        assert_eq!(q.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_pops_never_see_the_same_entry() {
        let q = std::sync::Arc::new(test_queue().await);
        for i in 0..20 {
            q.enqueue(&format!("m{i}")).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut popped = Vec::new();
                while let Some(id) = q.pop_blocking(Duration::from_millis(100)).await.unwrap() {
                    popped.push(id);
                }
                popped
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(all, expected);
    }
}
