//! libSQL backend for the async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::template::EmailTemplate;
use crate::error::DatabaseError;
use crate::ledger::LedgerEntry;
use crate::store::migrations;
use crate::store::traits::{Database, LogCount};
use crate::warmup::model::{RampPolicy, WarmupLogEntry, WarmupSchedule};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("bad date '{s}': {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_u32(v: i64) -> u32 {
    v.clamp(0, i64::from(u32::MAX)) as u32
}

fn query_err(op: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

// ── Row mappers ─────────────────────────────────────────────────────

const SCHEDULE_COLUMNS: &str = "id, account_id, status, day, total_days, base_volume, max_daily, target_daily_volume, health_score, replies_received, total_emails_sent, last_ticked_on, auto_pause_on_bounce, pause_threshold, utc_offset_minutes, created_at, updated_at";

const LEDGER_COLUMNS: &str = "account_id, date, daily_limit, sent_count";

const LOG_COLUMNS: &str =
    "id, kind, status, account_id, day, recipient_email, subject, error, created_at";

fn row_to_schedule(row: &libsql::Row) -> Result<WarmupSchedule, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("schedule row parse: {e}"));

    let id_str: String = row.get(0).map_err(get_err)?;
    let status_str: String = row.get(2).map_err(get_err)?;
    let last_ticked: Option<String> = row.get(11).map_err(get_err)?;
    let created_str: String = row.get(15).map_err(get_err)?;
    let updated_str: String = row.get(16).map_err(get_err)?;

    Ok(WarmupSchedule {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("bad schedule id: {e}")))?,
        account_id: row.get(1).map_err(get_err)?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        day: to_u32(row.get::<i64>(3).map_err(get_err)?),
        ramp: RampPolicy {
            total_days: to_u32(row.get::<i64>(4).map_err(get_err)?),
            base_volume: to_u32(row.get::<i64>(5).map_err(get_err)?),
            max_daily: to_u32(row.get::<i64>(6).map_err(get_err)?),
        },
        target_daily_volume: to_u32(row.get::<i64>(7).map_err(get_err)?),
        health_score: row.get::<i64>(8).map_err(get_err)?.clamp(0, 100) as u8,
        replies_received: row.get::<i64>(9).map_err(get_err)?.max(0) as u64,
        total_emails_sent: row.get::<i64>(10).map_err(get_err)?.max(0) as u64,
        last_ticked_on: last_ticked.as_deref().map(parse_date).transpose()?,
        auto_pause_on_bounce: row.get::<i64>(12).map_err(get_err)? != 0,
        pause_threshold: row.get::<i64>(13).map_err(get_err)?.clamp(0, 100) as u8,
        utc_offset_minutes: row.get::<i64>(14).map_err(get_err)? as i32,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_ledger(row: &libsql::Row) -> Result<LedgerEntry, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("ledger row parse: {e}"));
    let date_str: String = row.get(1).map_err(get_err)?;
    Ok(LedgerEntry {
        account_id: row.get(0).map_err(get_err)?,
        date: parse_date(&date_str)?,
        daily_limit: to_u32(row.get::<i64>(2).map_err(get_err)?),
        sent_count: to_u32(row.get::<i64>(3).map_err(get_err)?),
    })
}

fn row_to_log(row: &libsql::Row) -> Result<WarmupLogEntry, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("log row parse: {e}"));
    let id_str: String = row.get(0).map_err(get_err)?;
    let kind_str: String = row.get(1).map_err(get_err)?;
    let status_str: String = row.get(2).map_err(get_err)?;
    let created_str: String = row.get(8).map_err(get_err)?;

    Ok(WarmupLogEntry {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        kind: kind_str.parse().map_err(DatabaseError::Serialization)?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        account_id: row.get(3).map_err(get_err)?,
        day: to_u32(row.get::<i64>(4).map_err(get_err)?),
        recipient_email: row.get(5).map_err(get_err)?,
        subject: row.get(6).map_err(get_err)?,
        error: row.get(7).map_err(get_err)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_template(row: &libsql::Row) -> Result<EmailTemplate, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("template row parse: {e}"));
    let created_str: String = row.get(4).map_err(get_err)?;
    let updated_str: String = row.get(5).map_err(get_err)?;
    Ok(EmailTemplate {
        id: row.get(0).map_err(get_err)?,
        name: row.get(1).map_err(get_err)?,
        subject: row.get(2).map_err(get_err)?,
        html: row.get(3).map_err(get_err)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Schedules ───────────────────────────────────────────────────

    async fn insert_schedule(&self, schedule: &WarmupSchedule) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO warmup_schedules ({SCHEDULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    schedule.id.to_string(),
                    schedule.account_id.clone(),
                    schedule.status.as_str(),
                    i64::from(schedule.day),
                    i64::from(schedule.ramp.total_days),
                    i64::from(schedule.ramp.base_volume),
                    i64::from(schedule.ramp.max_daily),
                    i64::from(schedule.target_daily_volume),
                    i64::from(schedule.health_score),
                    schedule.replies_received as i64,
                    schedule.total_emails_sent as i64,
                    opt_text(schedule.last_ticked_on.map(|d| d.to_string()).as_deref()),
                    schedule.auto_pause_on_bounce as i64,
                    i64::from(schedule.pause_threshold),
                    i64::from(schedule.utc_offset_minutes),
                    schedule.created_at.to_rfc3339(),
                    schedule.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "account {} already has a warmup schedule",
                        schedule.account_id
                    ))
                } else {
                    DatabaseError::Query(format!("insert_schedule: {e}"))
                }
            })?;

        debug!(schedule_id = %schedule.id, account_id = %schedule.account_id, "Schedule inserted");
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<WarmupSchedule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM warmup_schedules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_schedule"))?;

        match rows.next().await.map_err(query_err("get_schedule"))? {
            Some(row) => Ok(Some(row_to_schedule(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_schedule_by_account(
        &self,
        account_id: &str,
    ) -> Result<Option<WarmupSchedule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM warmup_schedules WHERE account_id = ?1"),
                params![account_id],
            )
            .await
            .map_err(query_err("get_schedule_by_account"))?;

        match rows.next().await.map_err(query_err("get_schedule_by_account"))? {
            Some(row) => Ok(Some(row_to_schedule(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_schedules(&self) -> Result<Vec<WarmupSchedule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM warmup_schedules ORDER BY created_at"),
                (),
            )
            .await
            .map_err(query_err("list_schedules"))?;

        let mut schedules = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_schedules"))? {
            schedules.push(row_to_schedule(&row)?);
        }
        Ok(schedules)
    }

    async fn update_schedule(&self, schedule: &WarmupSchedule) -> Result<(), DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE warmup_schedules SET status = ?2, day = ?3, total_days = ?4, base_volume = ?5,
                    max_daily = ?6, target_daily_volume = ?7, health_score = ?8, last_ticked_on = ?9,
                    auto_pause_on_bounce = ?10, pause_threshold = ?11, utc_offset_minutes = ?12,
                    updated_at = ?13
                 WHERE id = ?1",
                params![
                    schedule.id.to_string(),
                    schedule.status.as_str(),
                    i64::from(schedule.day),
                    i64::from(schedule.ramp.total_days),
                    i64::from(schedule.ramp.base_volume),
                    i64::from(schedule.ramp.max_daily),
                    i64::from(schedule.target_daily_volume),
                    i64::from(schedule.health_score),
                    opt_text(schedule.last_ticked_on.map(|d| d.to_string()).as_deref()),
                    schedule.auto_pause_on_bounce as i64,
                    i64::from(schedule.pause_threshold),
                    i64::from(schedule.utc_offset_minutes),
                    schedule.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("update_schedule"))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "warmup_schedule".into(),
                id: schedule.id.to_string(),
            });
        }
        debug!(schedule_id = %schedule.id, status = %schedule.status, day = schedule.day, "Schedule updated");
        Ok(())
    }

    async fn increment_schedule_counters(
        &self,
        account_id: &str,
        sent: u64,
        replies: u64,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE warmup_schedules
                 SET total_emails_sent = total_emails_sent + ?2,
                     replies_received = replies_received + ?3,
                     updated_at = ?4
                 WHERE account_id = ?1",
                params![account_id, sent as i64, replies as i64, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err("increment_schedule_counters"))?;
        Ok(count > 0)
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM warmup_schedules WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err("delete_schedule"))?;
        Ok(count > 0)
    }

    // ── Quota ledger ────────────────────────────────────────────────

    async fn ensure_ledger_entry(
        &self,
        account_id: &str,
        date: NaiveDate,
        daily_limit: u32,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO quota_ledger (account_id, date, daily_limit, sent_count, last_granted, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)",
                params![account_id, date.to_string(), i64::from(daily_limit), now],
            )
            .await
            .map_err(query_err("ensure_ledger_entry"))?;
        Ok(())
    }

    async fn raise_daily_limit(
        &self,
        account_id: &str,
        date: NaiveDate,
        daily_limit: u32,
    ) -> Result<LedgerEntry, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO quota_ledger (account_id, date, daily_limit, sent_count, last_granted, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
                     ON CONFLICT (account_id, date) DO UPDATE
                        SET daily_limit = MAX(daily_limit, excluded.daily_limit),
                            updated_at = excluded.updated_at
                     RETURNING {LEDGER_COLUMNS}"
                ),
                params![account_id, date.to_string(), i64::from(daily_limit), now],
            )
            .await
            .map_err(query_err("raise_daily_limit"))?;

        match rows.next().await.map_err(query_err("raise_daily_limit"))? {
            Some(row) => row_to_ledger(&row),
            None => Err(DatabaseError::Query(
                "raise_daily_limit: upsert returned no row".into(),
            )),
        }
    }

    async fn reserve_quota(
        &self,
        account_id: &str,
        date: NaiveDate,
        requested: u32,
    ) -> Result<Option<(u32, LedgerEntry)>, DatabaseError> {
        // SET expressions see the pre-update row, so last_granted and the new
        // sent_count are computed from the same snapshot in one statement.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE quota_ledger
                     SET last_granted = MAX(0, MIN(?3, daily_limit - sent_count)),
                         sent_count = sent_count + MAX(0, MIN(?3, daily_limit - sent_count)),
                         updated_at = ?4
                     WHERE account_id = ?1 AND date = ?2
                     RETURNING last_granted, {LEDGER_COLUMNS}"
                ),
                params![
                    account_id,
                    date.to_string(),
                    i64::from(requested),
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_err("reserve_quota"))?;

        let Some(row) = rows.next().await.map_err(query_err("reserve_quota"))? else {
            return Ok(None);
        };
        let granted = to_u32(row.get::<i64>(0).map_err(query_err("reserve_quota"))?);
        let get_err = query_err("reserve_quota");
        let date_str: String = row.get(2).map_err(&get_err)?;
        let entry = LedgerEntry {
            account_id: row.get(1).map_err(&get_err)?,
            date: parse_date(&date_str)?,
            daily_limit: to_u32(row.get::<i64>(3).map_err(&get_err)?),
            sent_count: to_u32(row.get::<i64>(4).map_err(&get_err)?),
        };
        Ok(Some((granted, entry)))
    }

    async fn get_ledger_entry(
        &self,
        account_id: &str,
        date: NaiveDate,
    ) -> Result<Option<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM quota_ledger WHERE account_id = ?1 AND date = ?2"
                ),
                params![account_id, date.to_string()],
            )
            .await
            .map_err(query_err("get_ledger_entry"))?;

        match rows.next().await.map_err(query_err("get_ledger_entry"))? {
            Some(row) => Ok(Some(row_to_ledger(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_ledger_entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEDGER_COLUMNS} FROM quota_ledger WHERE account_id = ?1 ORDER BY date DESC LIMIT ?2"
                ),
                params![account_id, limit as i64],
            )
            .await
            .map_err(query_err("list_ledger_entries"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_ledger_entries"))? {
            entries.push(row_to_ledger(&row)?);
        }
        Ok(entries)
    }

    // ── Warmup logs ─────────────────────────────────────────────────

    async fn insert_log(&self, entry: &WarmupLogEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO warmup_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    entry.id.to_string(),
                    entry.kind.as_str(),
                    entry.status.as_str(),
                    entry.account_id.clone(),
                    i64::from(entry.day),
                    entry.recipient_email.clone(),
                    opt_text(entry.subject.as_deref()),
                    opt_text(entry.error.as_deref()),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("insert_log"))?;
        Ok(())
    }

    async fn list_logs(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WarmupLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM warmup_logs
                     WHERE account_id = ?1 AND created_at >= ?2
                     ORDER BY created_at DESC LIMIT ?3"
                ),
                params![account_id, since.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(query_err("list_logs"))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_logs"))? {
            entries.push(row_to_log(&row)?);
        }
        Ok(entries)
    }

    async fn count_logs_since(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LogCount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT kind, status, COUNT(*) FROM warmup_logs
                 WHERE account_id = ?1 AND created_at >= ?2
                 GROUP BY kind, status",
                params![account_id, since.to_rfc3339()],
            )
            .await
            .map_err(query_err("count_logs_since"))?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("count_logs_since"))? {
            let kind: String = row.get(0).map_err(query_err("count_logs_since"))?;
            let status: String = row.get(1).map_err(query_err("count_logs_since"))?;
            let count: i64 = row.get(2).map_err(query_err("count_logs_since"))?;
            counts.push(LogCount {
                kind: kind.parse().map_err(DatabaseError::Serialization)?,
                status: status.parse().map_err(DatabaseError::Serialization)?,
                count: count.max(0) as u64,
            });
        }
        Ok(counts)
    }

    // ── Send policies ───────────────────────────────────────────────

    async fn get_send_policy(&self, account_id: &str) -> Result<Option<u32>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT daily_limit FROM send_policies WHERE account_id = ?1",
                params![account_id],
            )
            .await
            .map_err(query_err("get_send_policy"))?;

        match rows.next().await.map_err(query_err("get_send_policy"))? {
            Some(row) => Ok(Some(to_u32(
                row.get::<i64>(0).map_err(query_err("get_send_policy"))?,
            ))),
            None => Ok(None),
        }
    }

    async fn set_send_policy(
        &self,
        account_id: &str,
        daily_limit: u32,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO send_policies (account_id, daily_limit, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (account_id) DO UPDATE SET daily_limit = ?2, updated_at = ?3",
                params![account_id, i64::from(daily_limit), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(query_err("set_send_policy"))?;
        Ok(())
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn upsert_template(&self, template: &EmailTemplate) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO templates (id, name, subject, html, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET name = ?2, subject = ?3, html = ?4, updated_at = ?6",
                params![
                    template.id.clone(),
                    template.name.clone(),
                    template.subject.clone(),
                    template.html.clone(),
                    template.created_at.to_rfc3339(),
                    template.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("upsert_template"))?;
        Ok(())
    }

    async fn get_template(&self, id: &str) -> Result<Option<EmailTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, subject, html, created_at, updated_at FROM templates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(query_err("get_template"))?;

        match rows.next().await.map_err(query_err("get_template"))? {
            Some(row) => Ok(Some(row_to_template(&row)?)),
            None => Ok(None),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
