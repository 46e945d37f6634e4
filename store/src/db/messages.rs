//! Message CRUD.

use broker_common::model::{Message, MessageStatus};
use broker_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Idempotent on `message_id` only when the resubmitted payload is
/// identical. A second call with the same
/// id but different `client_id`/`sender_fingerprint`/`sender_masked`/
/// `body_ciphertext` is a conflict, not a silent no-op.
pub async fn insert(pool: &SqlitePool, msg: &Message) -> Result<()> {
    if let Some(row) = sqlx::query("SELECT * FROM messages WHERE message_id = ?")
        .bind(&msg.message_id)
        .fetch_optional(pool)
        .await?
    {
        let existing = row_to_message(&row)?;
        if existing.client_id == msg.client_id
            && existing.sender_fingerprint == msg.sender_fingerprint
            && existing.sender_masked == msg.sender_masked
            && existing.body_ciphertext == msg.body_ciphertext
        {
            return Ok(());
        }
        return Err(Error::IdempotencyConflict(msg.message_id.clone()));
    }

    sqlx::query(
        "INSERT INTO messages
            (message_id, client_id, sender_fingerprint, sender_masked, body_ciphertext,
             status, attempts, last_error, created_at, updated_at, delivered_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&msg.message_id)
    .bind(&msg.client_id)
    .bind(&msg.sender_fingerprint)
    .bind(&msg.sender_masked)
    .bind(&msg.body_ciphertext)
    .bind(msg.status.as_str())
    .bind(msg.attempts as i64)
    .bind(&msg.last_error)
    .bind(msg.created_at)
    .bind(msg.updated_at)
    .bind(msg.delivered_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, message_id: &str) -> Result<Message> {
    let row = sqlx::query("SELECT * FROM messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    row_to_message(&row)
}

/// Claims the oldest queued message for delivery, atomically transitioning
/// it to `delivering`.
///
/// Increments `attempts` here, at the start of a delivery attempt
/// (`UpdateStatus(message_id, delivering, attempts+1)`) — not on the later
/// retry-to-`queued` transition. This is what makes "N attempts" come out
/// right for N-1 failures followed by a success: each pop that reaches
/// `delivering` counts as one attempt, regardless of how it ends.
pub async fn claim_for_delivery(pool: &SqlitePool, message_id: &str) -> Result<Message> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query("SELECT * FROM messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    let mut msg = row_to_message(&row)?;

    if !msg.status.can_transition_to(MessageStatus::Delivering) {
        return Err(Error::IllegalTransition(format!(
            "{} -> delivering",
            msg.status.as_str()
        )));
    }

    let now = Utc::now();
    msg.status = MessageStatus::Delivering;
    msg.attempts += 1;
    msg.updated_at = now;

    sqlx::query("UPDATE messages SET status = ?, attempts = ?, updated_at = ? WHERE message_id = ?")
        .bind(msg.status.as_str())
        .bind(msg.attempts as i64)
        .bind(now)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(msg)
}

pub struct StatusUpdate {
    pub status: MessageStatus,
    pub last_error: Option<String>,
}

/// Applies a worker-reported delivery outcome, enforcing the Message
/// transition table and the terminal invariants (`delivered_at` set iff
/// delivered).
/// Does not touch `attempts` — that counter is bumped once per attempt by
/// [`claim_for_delivery`], not again here on the retry-to-`queued` path.
pub async fn update_status(pool: &SqlitePool, message_id: &str, update: StatusUpdate) -> Result<Message> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query("SELECT * FROM messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    let mut msg = row_to_message(&row)?;

    if !msg.status.can_transition_to(update.status) {
        return Err(Error::IllegalTransition(format!(
            "{} -> {}",
            msg.status.as_str(),
            update.status.as_str()
        )));
    }

    let now = Utc::now();
    msg.status = update.status;
    msg.last_error = update.last_error;
    msg.updated_at = now;
    msg.delivered_at = if update.status == MessageStatus::Delivered {
        Some(now)
    } else {
        None
    };

    sqlx::query(
        "UPDATE messages SET status = ?, attempts = ?, last_error = ?, updated_at = ?, delivered_at = ?
         WHERE message_id = ?",
    )
    .bind(msg.status.as_str())
    .bind(msg.attempts as i64)
    .bind(&msg.last_error)
    .bind(now)
    .bind(msg.delivered_at)
    .bind(message_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(msg)
}

/// Operator-only terminal transition, permitted from any non-terminal state
///.
pub async fn cancel(pool: &SqlitePool, message_id: &str) -> Result<Message> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query("SELECT * FROM messages WHERE message_id = ?")
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    let mut msg = row_to_message(&row)?;

    if !msg.status.can_transition_to(MessageStatus::Cancelled) {
        return Err(Error::IllegalTransition(format!(
            "{} -> cancelled",
            msg.status.as_str()
        )));
    }

    let now = Utc::now();
    msg.status = MessageStatus::Cancelled;
    msg.updated_at = now;

    sqlx::query("UPDATE messages SET status = ?, updated_at = ? WHERE message_id = ?")
        .bind(msg.status.as_str())
        .bind(now)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(msg)
}

pub struct MessageFilter {
    pub client_id: Option<String>,
    pub status: Option<MessageStatus>,
    /// Restricts results to this set of client CNs, for a non-admin
    /// operator. `None` means unrestricted
    /// (admin).
    pub allowed_clients: Option<Vec<String>>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list(pool: &SqlitePool, filter: &MessageFilter) -> Result<Vec<Message>> {
    let mut sql = String::from("SELECT * FROM messages WHERE 1=1");
    if filter.client_id.is_some() {
        sql.push_str(" AND client_id = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if let Some(allowed) = &filter.allowed_clients {
        if allowed.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = allowed.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        sql.push_str(&format!(" AND client_id IN ({placeholders})"));
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

    let mut query = sqlx::query(&sql);
    if let Some(cid) = &filter.client_id {
        query = query.bind(cid);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(allowed) = &filter.allowed_clients {
        for cn in allowed {
            query = query.bind(cn);
        }
    }
    query = query.bind(filter.limit).bind(filter.offset);

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_message).collect()
}

/// Rows stuck in `delivering` past `2 * timeout`, for the worker's startup
/// reconciliation sweep.
pub async fn find_stuck_delivering(pool: &SqlitePool, older_than: DateTime<Utc>) -> Result<Vec<Message>> {
    let rows = sqlx::query("SELECT * FROM messages WHERE status = 'delivering' AND updated_at < ?")
        .bind(older_than)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_message).collect()
}

pub struct MessageStats {
    pub queued: i64,
    pub delivering: i64,
    pub delivered: i64,
    pub failed: i64,
    pub cancelled: i64,
}

pub async fn stats(pool: &SqlitePool) -> Result<MessageStats> {
    async fn count(pool: &SqlitePool, status: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM messages WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    Ok(MessageStats {
        queued: count(pool, "queued").await?,
        delivering: count(pool, "delivering").await?,
        delivered: count(pool, "delivered").await?,
        failed: count(pool, "failed").await?,
        cancelled: count(pool, "cancelled").await?,
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let status_str: String = row.get("status");
    let status = MessageStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("unknown message status in db: {status_str}")))?;

    Ok(Message {
        message_id: row.get("message_id"),
        client_id: row.get("client_id"),
        sender_fingerprint: row.get("sender_fingerprint"),
        sender_masked: row.get("sender_masked"),
        body_ciphertext: row.get("body_ciphertext"),
        status,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        delivered_at: row.get("delivered_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_db;

    fn sample(id: &str) -> Message {
        let now = Utc::now();
        Message {
            message_id: id.to_string(),
            client_id: "acme".to_string(),
            sender_fingerprint: vec![1, 2, 3],
            sender_masked: "+12*****0123".to_string(),
            body_ciphertext: vec![9, 9, 9],
            status: MessageStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let db = create_test_db().await;
        let msg = sample("m1");
        insert(db.pool(), &msg).await.unwrap();
        let fetched = get(db.pool(), "m1").await.unwrap();
        assert_eq!(fetched.message_id, "m1");
        assert_eq!(fetched.status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn insert_is_idempotent() {
        let db = create_test_db().await;
        let msg = sample("m2");
        insert(db.pool(), &msg).await.unwrap();
        insert(db.pool(), &msg).await.unwrap();
        let all = list(
            db.pool(),
            &MessageFilter { client_id: None, status: None, allowed_clients: None, limit: 10, offset: 0 },
        )
        .await
        .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn insert_rejects_conflicting_payload_with_same_id() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("m2b")).await.unwrap();
        let mut conflicting = sample("m2b");
        conflicting.body_ciphertext = vec![1, 1, 1];
        let err = insert(db.pool(), &conflicting).await.unwrap_err();
        assert!(matches!(err, Error::IdempotencyConflict(_)));
    }

    #[tokio::test]
    async fn claim_then_deliver_transitions_correctly() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("m3")).await.unwrap();

        let claimed = claim_for_delivery(db.pool(), "m3").await.unwrap();
        assert_eq!(claimed.status, MessageStatus::Delivering);

        let delivered = update_status(
            db.pool(),
            "m3",
            StatusUpdate { status: MessageStatus::Delivered, last_error: None },
        )
        .await
        .unwrap();
        assert_eq!(delivered.status, MessageStatus::Delivered);
        assert!(delivered.delivered_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("m4")).await.unwrap();
        let err = update_status(
            db.pool(),
            "m4",
            StatusUpdate { status: MessageStatus::Delivered, last_error: None },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let db = create_test_db().await;
        insert(db.pool(), &sample("m5")).await.unwrap();
        cancel(db.pool(), "m5").await.unwrap();
        let err = cancel(db.pool(), "m5").await.unwrap_err();
        assert!(matches!(err, Error::IllegalTransition(_)));
    }
}
