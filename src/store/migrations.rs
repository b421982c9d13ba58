//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "warmup_core",
        sql: r#"
            CREATE TABLE IF NOT EXISTS warmup_schedules (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'not_started',
                day INTEGER NOT NULL DEFAULT 0,
                total_days INTEGER NOT NULL,
                base_volume INTEGER NOT NULL,
                max_daily INTEGER NOT NULL,
                target_daily_volume INTEGER NOT NULL,
                health_score INTEGER NOT NULL DEFAULT 50,
                replies_received INTEGER NOT NULL DEFAULT 0,
                total_emails_sent INTEGER NOT NULL DEFAULT 0,
                last_ticked_on TEXT,
                auto_pause_on_bounce INTEGER NOT NULL DEFAULT 1,
                pause_threshold INTEGER NOT NULL DEFAULT 30,
                utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_warmup_schedules_status ON warmup_schedules(status);

            CREATE TABLE IF NOT EXISTS quota_ledger (
                account_id TEXT NOT NULL,
                date TEXT NOT NULL,
                daily_limit INTEGER NOT NULL,
                sent_count INTEGER NOT NULL DEFAULT 0,
                last_granted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, date),
                CHECK (sent_count <= daily_limit)
            );

            CREATE TABLE IF NOT EXISTS warmup_logs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                account_id TEXT NOT NULL,
                day INTEGER NOT NULL,
                recipient_email TEXT NOT NULL,
                subject TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_warmup_logs_account_created
                ON warmup_logs(account_id, created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "send_policies_and_templates",
        sql: r#"
            CREATE TABLE IF NOT EXISTS send_policies (
                account_id TEXT PRIMARY KEY,
                daily_limit INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                html TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
