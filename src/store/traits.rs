//! Unified `Database` trait: one async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::dispatch::template::EmailTemplate;
use crate::error::DatabaseError;
use crate::ledger::LedgerEntry;
use crate::warmup::model::{LogKind, LogStatus, WarmupLogEntry, WarmupSchedule};

/// Grouped count of log entries for one (kind, status) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCount {
    pub kind: LogKind,
    pub status: LogStatus,
    pub count: u64,
}

/// Backend-agnostic database trait covering schedules, the ledger, logs,
/// send policies and templates.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Schedules ───────────────────────────────────────────────────

    /// Insert a new schedule. Fails if the account already has one.
    async fn insert_schedule(&self, schedule: &WarmupSchedule) -> Result<(), DatabaseError>;

    async fn get_schedule(&self, id: Uuid) -> Result<Option<WarmupSchedule>, DatabaseError>;

    async fn get_schedule_by_account(
        &self,
        account_id: &str,
    ) -> Result<Option<WarmupSchedule>, DatabaseError>;

    async fn list_schedules(&self) -> Result<Vec<WarmupSchedule>, DatabaseError>;

    /// Persist state-machine fields. Cumulative counters are never written
    /// here; use `increment_schedule_counters`.
    async fn update_schedule(&self, schedule: &WarmupSchedule) -> Result<(), DatabaseError>;

    /// Atomically add to the cumulative counters. Returns false if the
    /// account has no schedule.
    async fn increment_schedule_counters(
        &self,
        account_id: &str,
        sent: u64,
        replies: u64,
    ) -> Result<bool, DatabaseError>;

    /// Delete a schedule. Returns true if a row was removed.
    async fn delete_schedule(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Quota ledger ────────────────────────────────────────────────

    /// Create the entry if absent; an existing entry is left untouched.
    async fn ensure_ledger_entry(
        &self,
        account_id: &str,
        date: NaiveDate,
        daily_limit: u32,
    ) -> Result<(), DatabaseError>;

    /// Set or raise the day's ceiling. Never lowers it.
    async fn raise_daily_limit(
        &self,
        account_id: &str,
        date: NaiveDate,
        daily_limit: u32,
    ) -> Result<LedgerEntry, DatabaseError>;

    /// Atomic compare-and-increment. Grants `min(requested, remaining)` and
    /// adds it to `sent_count` in one statement. `None` if no entry exists.
    async fn reserve_quota(
        &self,
        account_id: &str,
        date: NaiveDate,
        requested: u32,
    ) -> Result<Option<(u32, LedgerEntry)>, DatabaseError>;

    async fn get_ledger_entry(
        &self,
        account_id: &str,
        date: NaiveDate,
    ) -> Result<Option<LedgerEntry>, DatabaseError>;

    /// Most recent entries first.
    async fn list_ledger_entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, DatabaseError>;

    // ── Warmup logs ─────────────────────────────────────────────────

    async fn insert_log(&self, entry: &WarmupLogEntry) -> Result<(), DatabaseError>;

    /// Entries for an account since `since`, newest first, up to `limit`.
    async fn list_logs(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WarmupLogEntry>, DatabaseError>;

    /// Counts grouped by (kind, status) since `since`.
    async fn count_logs_since(
        &self,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LogCount>, DatabaseError>;

    // ── Send policies ───────────────────────────────────────────────

    async fn get_send_policy(&self, account_id: &str) -> Result<Option<u32>, DatabaseError>;

    async fn set_send_policy(&self, account_id: &str, daily_limit: u32)
    -> Result<(), DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn upsert_template(&self, template: &EmailTemplate) -> Result<(), DatabaseError>;

    async fn get_template(&self, id: &str) -> Result<Option<EmailTemplate>, DatabaseError>;
}
