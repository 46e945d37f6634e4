//! Database schema migrations for the Store.

use broker_common::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    run_migration(pool, "001_create_messages_table", MIGRATION_001_MESSAGES).await?;
    run_migration(pool, "002_create_clients_table", MIGRATION_002_CLIENTS).await?;
    run_migration(pool, "003_create_users_table", MIGRATION_003_USERS).await?;
    run_migration(pool, "004_create_certificates_table", MIGRATION_004_CERTIFICATES).await?;
    run_migration(pool, "005_create_audit_log_table", MIGRATION_005_AUDIT_LOG).await?;
    run_migration(pool, "006_create_user_clients_table", MIGRATION_006_USER_CLIENTS).await?;

    Ok(())
}

async fn run_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    use sqlx::Row;

    let row = sqlx::query("SELECT COUNT(*) as count FROM migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    let count: i64 = row.get("count");
    if count > 0 {
        tracing::debug!(migration = name, "already applied");
        return Ok(());
    }

    tracing::info!(migration = name, "running migration");
    sqlx::query(sql).execute(pool).await?;
    sqlx::query("INSERT INTO migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

// `delivered_at` is enforced non-null-iff-delivered at the application
// layer (store::db::messages), not by a SQL CHECK constraint, preferring
// to enforce row invariants in Rust rather than in schema DDL.
const MIGRATION_001_MESSAGES: &str = "
CREATE TABLE messages (
    message_id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    sender_fingerprint BLOB NOT NULL,
    sender_masked TEXT NOT NULL,
    body_ciphertext BLOB NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL,
    delivered_at TIMESTAMP
);

CREATE INDEX idx_messages_status ON messages(status);
CREATE INDEX idx_messages_client ON messages(client_id);
CREATE INDEX idx_messages_updated ON messages(updated_at);
";

const MIGRATION_002_CLIENTS: &str = "
CREATE TABLE clients (
    cn TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMP NOT NULL,
    domain_tag TEXT
);

CREATE INDEX idx_clients_active ON clients(active);
";

const MIGRATION_003_USERS: &str = "
CREATE TABLE users (
    user_id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    last_login_at TIMESTAMP
);

CREATE INDEX idx_users_email ON users(email);
";

const MIGRATION_004_CERTIFICATES: &str = "
CREATE TABLE certificates (
    serial TEXT PRIMARY KEY,
    subject_cn TEXT NOT NULL,
    kind TEXT NOT NULL,
    issued_at TIMESTAMP NOT NULL,
    expires_at TIMESTAMP NOT NULL,
    fingerprint_sha256 TEXT NOT NULL,
    revoked_at TIMESTAMP,
    revocation_reason TEXT
);

CREATE INDEX idx_certificates_cn ON certificates(subject_cn);
CREATE INDEX idx_certificates_kind ON certificates(kind);
CREATE INDEX idx_certificates_revoked ON certificates(revoked_at);
";

const MIGRATION_005_AUDIT_LOG: &str = "
CREATE TABLE audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT NOT NULL,
    at TIMESTAMP NOT NULL,
    details_json TEXT
);

CREATE INDEX idx_audit_action ON audit_log(action);
CREATE INDEX idx_audit_at ON audit_log(at);
";

// A `user` role sees only messages for clients they are linked to — a
// many-to-many join table, since a `user` is not restricted to exactly
// one client.
const MIGRATION_006_USER_CLIENTS: &str = "
CREATE TABLE user_clients (
    user_id TEXT NOT NULL,
    client_cn TEXT NOT NULL,
    PRIMARY KEY (user_id, client_cn),
    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE,
    FOREIGN KEY (client_cn) REFERENCES clients(cn) ON DELETE CASCADE
);
";
