//! Warmup scheduler: owns the per-account state machine and pushes each
//! day's ceiling into the quota ledger.
//!
//! Every read-modify-write of a schedule runs under a per-account lock.
//! Different accounts never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{
    LogKind, LogStatus, TickOutcome, WarmupLogEntry, WarmupPolicy, WarmupSchedule,
};
use crate::config::WarmupConfig;
use crate::dispatch::{BatchObserver, DispatchSummary};
use crate::error::WarmupError;
use crate::health::HealthScorer;
use crate::ledger::QuotaLedger;
use crate::store::Database;

/// Read-only view of an account's sending allowance for today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLimit {
    pub is_ramping: bool,
    pub daily_limit: u32,
    pub sent_today: u32,
    pub remaining: u32,
    pub day: u32,
    pub ramp_days: u32,
}

pub struct WarmupScheduler {
    store: Arc<dyn Database>,
    ledger: Arc<QuotaLedger>,
    scorer: HealthScorer,
    config: WarmupConfig,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl WarmupScheduler {
    pub fn new(
        store: Arc<dyn Database>,
        ledger: Arc<QuotaLedger>,
        scorer: HealthScorer,
        config: WarmupConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            scorer,
            config,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    async fn lock(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(account_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut locks = self.locks.write().await;
                Arc::clone(locks.entry(account_id.to_string()).or_default())
            }
        };
        lock.lock_owned().await
    }

    /// Drop an account's lock entry unless some task still holds or awaits it.
    async fn release_lock(&self, account_id: &str) {
        let mut locks = self.locks.write().await;
        if locks.get(account_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(account_id);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Begin (or restart) warmup for an account at day 0 with the configured
    /// ramp.
    pub async fn start(&self, account_id: &str) -> Result<WarmupSchedule, WarmupError> {
        self.start_with(account_id, &WarmupPolicy::default()).await
    }

    /// Begin (or restart) warmup with per-account overrides.
    ///
    /// A schedule that is already warming is rejected. Today counts as day 0,
    /// so the first advance happens on the next local date. A restart keeps
    /// the schedule's previous policy for any field `policy` leaves unset.
    pub async fn start_with(
        &self,
        account_id: &str,
        policy: &WarmupPolicy,
    ) -> Result<WarmupSchedule, WarmupError> {
        let _guard = self.lock(account_id).await;
        let now = Utc::now();

        let schedule = match self.store.get_schedule_by_account(account_id).await? {
            Some(mut existing) => {
                existing.restart()?;
                existing.apply_policy(policy)?;
                existing.last_ticked_on = Some(existing.local_date(now));
                self.store.update_schedule(&existing).await?;
                existing
            }
            None => {
                let mut schedule = WarmupSchedule::new(account_id, &self.config);
                schedule.apply_policy(policy)?;
                schedule.last_ticked_on = Some(schedule.local_date(now));
                self.store.insert_schedule(&schedule).await?;
                schedule
            }
        };

        self.ledger
            .set_daily_limit(account_id, schedule.local_date(now), schedule.target_daily_volume)
            .await?;

        info!(
            account_id,
            schedule_id = %schedule.id,
            target = schedule.target_daily_volume,
            total_days = schedule.ramp.total_days,
            "Warmup started"
        );
        Ok(schedule)
    }

    /// Advance the account's schedule for the account-local date `today`.
    ///
    /// Idempotent per date. Runs the health check after a real tick.
    pub async fn tick(&self, account_id: &str, today: NaiveDate) -> Result<TickOutcome, WarmupError> {
        let _guard = self.lock(account_id).await;
        let mut schedule = self.require_account(account_id).await?;

        let outcome = schedule.advance(today);
        if outcome == TickOutcome::AlreadyTicked {
            debug!(account_id, %today, "Tick already applied");
            return Ok(outcome);
        }

        // The ledger refuses closed days; push the limit before persisting
        // so a refused tick leaves the schedule untouched.
        if let TickOutcome::Advanced { target, .. } | TickOutcome::Completed { target } = outcome {
            self.ledger.set_daily_limit(account_id, today, target).await?;
        }
        self.store.update_schedule(&schedule).await?;

        match outcome {
            TickOutcome::Advanced { day, target } => info!(account_id, day, target, "Warmup advanced"),
            TickOutcome::Completed { target } => info!(account_id, target, "Warmup complete, account ready"),
            TickOutcome::Skipped(status) => debug!(account_id, %status, "Tick skipped"),
            TickOutcome::AlreadyTicked => {}
        }

        self.check_health(&mut schedule, Utc::now()).await?;
        Ok(outcome)
    }

    /// `Warming -> Paused`.
    pub async fn pause(&self, id: Uuid) -> Result<WarmupSchedule, WarmupError> {
        self.transition(id, "pause", WarmupSchedule::pause).await
    }

    /// `Paused -> Warming`, continuing from the frozen day.
    pub async fn resume(&self, id: Uuid) -> Result<WarmupSchedule, WarmupError> {
        self.transition(id, "resume", WarmupSchedule::resume).await
    }

    async fn transition(
        &self,
        id: Uuid,
        action: &'static str,
        apply: fn(&mut WarmupSchedule) -> Result<(), WarmupError>,
    ) -> Result<WarmupSchedule, WarmupError> {
        let account_id = self.snapshot(id).await?.account_id;
        let _guard = self.lock(&account_id).await;

        let mut schedule = self.snapshot(id).await?;
        apply(&mut schedule)?;
        self.store.update_schedule(&schedule).await?;
        info!(account_id = %account_id, schedule_id = %id, action, status = %schedule.status, "Warmup transition");
        Ok(schedule)
    }

    /// Delete a schedule. Logs and ledger history are kept.
    pub async fn remove(&self, id: Uuid) -> Result<bool, WarmupError> {
        let Some(schedule) = self.store.get_schedule(id).await? else {
            return Ok(false);
        };
        let removed = {
            let _guard = self.lock(&schedule.account_id).await;
            self.store.delete_schedule(id).await?
        };
        self.release_lock(&schedule.account_id).await;
        if removed {
            info!(account_id = %schedule.account_id, schedule_id = %id, "Warmup removed");
        }
        Ok(removed)
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Re-score the account and auto-pause it if the score is too low.
    pub async fn apply_health(&self, account_id: &str) -> Result<WarmupSchedule, WarmupError> {
        let _guard = self.lock(account_id).await;
        let mut schedule = self.require_account(account_id).await?;
        self.check_health(&mut schedule, Utc::now()).await?;
        Ok(schedule)
    }

    /// Caller holds the account lock.
    async fn check_health(
        &self,
        schedule: &mut WarmupSchedule,
        now: DateTime<Utc>,
    ) -> Result<(), WarmupError> {
        let score = self.scorer.score(&schedule.account_id, now).await?;
        schedule.health_score = score;

        let failing = score < schedule.pause_threshold;
        let mut entry = WarmupLogEntry::new(
            LogKind::HealthCheck,
            if failing {
                LogStatus::Failed
            } else {
                LogStatus::Success
            },
            &schedule.account_id,
            schedule.day,
            &schedule.account_id,
        );

        if failing {
            entry = entry.with_error(format!(
                "health score {score} below threshold {}",
                schedule.pause_threshold
            ));
            if schedule.auto_pause_on_bounce && schedule.pause().is_ok() {
                warn!(
                    account_id = %schedule.account_id,
                    score,
                    threshold = schedule.pause_threshold,
                    "Warmup auto-paused on low health"
                );
            }
        }

        self.store.update_schedule(schedule).await?;
        self.store.insert_log(&entry).await?;
        debug!(account_id = %schedule.account_id, score, failing, "Health check recorded");
        Ok(())
    }

    // ── Background ticking ──────────────────────────────────────────

    /// Tick every schedule using its own local date. One account's failure
    /// does not stop the rest.
    pub async fn tick_all(&self, now: DateTime<Utc>) -> usize {
        let schedules = match self.store.list_schedules().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to list schedules for tick");
                return 0;
            }
        };

        let mut advanced = 0;
        for schedule in schedules {
            let today = schedule.local_date(now);
            match self.tick(&schedule.account_id, today).await {
                Ok(TickOutcome::Advanced { .. } | TickOutcome::Completed { .. }) => advanced += 1,
                Ok(_) => {}
                Err(e) => warn!(account_id = %schedule.account_id, error = %e, "Tick failed"),
            }
        }
        if advanced > 0 {
            info!(advanced, "Warmup tick pass complete");
        }
        advanced
    }

    // ── Signals ─────────────────────────────────────────────────────

    /// Attribute sends made outside the pipeline. Goes through the ledger,
    /// so at most the remaining allowance is attributed.
    pub async fn record_sends(&self, account_id: &str, count: u32) -> Result<u32, WarmupError> {
        let today = self.ledger.today(account_id, Utc::now()).await?;
        let reservation = self.ledger.reserve(account_id, today, count).await?;
        if reservation.granted > 0 {
            self.store
                .increment_schedule_counters(account_id, u64::from(reservation.granted), 0)
                .await?;
        }
        Ok(reservation.granted)
    }

    pub async fn record_reply(&self, account_id: &str, from: &str) -> Result<(), WarmupError> {
        self.record_signal(account_id, LogKind::ReplyReceived, from).await
    }

    /// Record a deliverability signal. Bounces and complaints re-run the
    /// health check right away.
    pub async fn record_signal(
        &self,
        account_id: &str,
        kind: LogKind,
        recipient: &str,
    ) -> Result<(), WarmupError> {
        let day = self
            .store
            .get_schedule_by_account(account_id)
            .await?
            .map(|s| s.day)
            .unwrap_or(0);
        self.store
            .insert_log(&WarmupLogEntry::new(kind, LogStatus::Success, account_id, day, recipient))
            .await?;

        match kind {
            LogKind::ReplyReceived => {
                self.store.increment_schedule_counters(account_id, 0, 1).await?;
            }
            LogKind::Bounced | LogKind::Complaint => {
                if self.store.get_schedule_by_account(account_id).await?.is_some() {
                    self.apply_health(account_id).await?;
                }
            }
            _ => {}
        }
        debug!(account_id, kind = kind.as_str(), recipient, "Signal recorded");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub async fn snapshot(&self, id: Uuid) -> Result<WarmupSchedule, WarmupError> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or(WarmupError::NotFound { id })
    }

    pub async fn get_by_account(&self, account_id: &str) -> Result<Option<WarmupSchedule>, WarmupError> {
        Ok(self.store.get_schedule_by_account(account_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<WarmupSchedule>, WarmupError> {
        Ok(self.store.list_schedules().await?)
    }

    /// Today's allowance, whether or not the account is warming.
    pub async fn send_limit(&self, account_id: &str) -> Result<SendLimit, WarmupError> {
        let today = self.ledger.today(account_id, Utc::now()).await?;
        let snapshot = self.ledger.remaining(account_id, today).await?;
        let schedule = self.store.get_schedule_by_account(account_id).await?;
        Ok(SendLimit {
            is_ramping: schedule.as_ref().is_some_and(|s| s.status.is_ramping()),
            daily_limit: snapshot.daily_limit,
            sent_today: snapshot.sent_count,
            remaining: snapshot.remaining,
            day: schedule.as_ref().map_or(0, |s| s.day),
            ramp_days: schedule.as_ref().map_or(0, |s| s.ramp.total_days),
        })
    }

    async fn require_account(&self, account_id: &str) -> Result<WarmupSchedule, WarmupError> {
        self.store
            .get_schedule_by_account(account_id)
            .await?
            .ok_or_else(|| WarmupError::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }
}

#[async_trait]
impl BatchObserver for WarmupScheduler {
    async fn batch_completed(&self, account_id: &str, summary: &DispatchSummary) {
        match self
            .store
            .increment_schedule_counters(account_id, summary.sent as u64, 0)
            .await
        {
            Ok(true) => {
                if let Err(e) = self.apply_health(account_id).await {
                    warn!(account_id, error = %e, "Post-batch health check failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(account_id, error = %e, "Failed to record batch sends"),
        }
    }
}

/// Tick every schedule on a fixed interval, starting immediately.
pub fn spawn_tick_task(
    scheduler: Arc<WarmupScheduler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            scheduler.tick_all(Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::error::LedgerError;
    use crate::health::HealthWeights;
    use crate::store::LibSqlBackend;
    use crate::warmup::model::{WarmupStatus, local_date};

    async fn setup() -> (Arc<dyn Database>, WarmupScheduler) {
        setup_with(WarmupConfig::default()).await
    }

    async fn setup_with(config: WarmupConfig) -> (Arc<dyn Database>, WarmupScheduler) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let ledger = Arc::new(QuotaLedger::new(Arc::clone(&store), LedgerConfig::default()));
        let scorer = HealthScorer::new(Arc::clone(&store), HealthWeights::default(), 7);
        let scheduler = WarmupScheduler::new(Arc::clone(&store), ledger, scorer, config);
        (store, scheduler)
    }

    /// `n` days from today (UTC).
    fn day(n: u64) -> NaiveDate {
        Utc::now().date_naive() + chrono::Days::new(n)
    }

    async fn insert_logs(store: &Arc<dyn Database>, kind: LogKind, n: usize) {
        for i in 0..n {
            store
                .insert_log(&WarmupLogEntry::new(kind, LogStatus::Success, "acct", 0, format!("p{i}@x.io")))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn start_creates_schedule_and_pushes_base_limit() {
        let (_store, scheduler) = setup().await;
        let schedule = scheduler.start("acct").await.unwrap();
        assert_eq!(schedule.status, WarmupStatus::Warming);
        assert_eq!(schedule.day, 0);

        let limit = scheduler.send_limit("acct").await.unwrap();
        assert!(limit.is_ramping);
        assert_eq!(limit.daily_limit, 5);
        assert_eq!(limit.remaining, 5);
        assert_eq!(limit.ramp_days, 14);
    }

    #[tokio::test]
    async fn start_while_warming_is_rejected() {
        let (_store, scheduler) = setup().await;
        scheduler.start("acct").await.unwrap();
        assert!(matches!(
            scheduler.start("acct").await,
            Err(WarmupError::InvalidTransition { action: "start", .. })
        ));
    }

    #[tokio::test]
    async fn start_counts_today_as_day_zero() {
        let (_store, scheduler) = setup().await;
        scheduler.start("acct").await.unwrap();
        assert_eq!(scheduler.tick("acct", day(0)).await.unwrap(), TickOutcome::AlreadyTicked);
        assert_eq!(
            scheduler.tick("acct", day(1)).await.unwrap(),
            TickOutcome::Advanced { day: 1, target: 9 }
        );
    }

    #[tokio::test]
    async fn stale_tick_does_not_advance() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        let yesterday = Utc::now().date_naive() - chrono::Days::new(1);

        assert_eq!(scheduler.tick("acct", yesterday).await.unwrap(), TickOutcome::AlreadyTicked);
        assert_eq!(
            scheduler.tick("acct", day(1)).await.unwrap(),
            TickOutcome::Advanced { day: 1, target: 9 }
        );
        assert_eq!(scheduler.snapshot(id).await.unwrap().day, 1);
    }

    #[tokio::test]
    async fn refused_tick_leaves_schedule_unchanged() {
        let (store, scheduler) = setup().await;
        let mut schedule = scheduler.start("acct").await.unwrap();
        let three_days_ago = Utc::now().date_naive() - chrono::Days::new(3);
        let yesterday = Utc::now().date_naive() - chrono::Days::new(1);
        schedule.last_ticked_on = Some(three_days_ago);
        store.update_schedule(&schedule).await.unwrap();

        // Yesterday's ledger day is closed.
        assert!(matches!(
            scheduler.tick("acct", yesterday).await,
            Err(WarmupError::Ledger(LedgerError::DayClosed { .. }))
        ));
        let after = scheduler.snapshot(schedule.id).await.unwrap();
        assert_eq!(after.day, 0);
        assert_eq!(after.last_ticked_on, Some(three_days_ago));
    }

    #[tokio::test]
    async fn tick_is_idempotent_per_date() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        scheduler.tick("acct", day(1)).await.unwrap();
        let once = scheduler.snapshot(id).await.unwrap();

        assert_eq!(scheduler.tick("acct", day(1)).await.unwrap(), TickOutcome::AlreadyTicked);
        let twice = scheduler.snapshot(id).await.unwrap();
        assert_eq!((once.day, once.target_daily_volume, once.status), (twice.day, twice.target_daily_volume, twice.status));
    }

    #[tokio::test]
    async fn ramp_reaches_ready_and_limit_is_pushed() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        for n in 1..=13 {
            scheduler.tick("acct", day(n)).await.unwrap();
        }
        assert_eq!(
            scheduler.tick("acct", day(14)).await.unwrap(),
            TickOutcome::Completed { target: 50 }
        );
        let schedule = scheduler.snapshot(id).await.unwrap();
        assert_eq!(schedule.status, WarmupStatus::Ready);
        assert_eq!(schedule.day, 14);

        let entry = scheduler.ledger().remaining("acct", day(14)).await.unwrap();
        assert_eq!(entry.daily_limit, 50);
        let day7 = scheduler.ledger().remaining("acct", day(7)).await.unwrap();
        assert_eq!(day7.daily_limit, 28);
    }

    #[tokio::test]
    async fn pause_and_resume_continue_from_frozen_day() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        for n in 1..=5 {
            scheduler.tick("acct", day(n)).await.unwrap();
        }

        let paused = scheduler.pause(id).await.unwrap();
        assert_eq!(paused.status, WarmupStatus::Paused);
        assert_eq!(paused.day, 5);

        // Paused days do not advance.
        scheduler.tick("acct", day(6)).await.unwrap();
        let resumed = scheduler.resume(id).await.unwrap();
        assert_eq!((resumed.day, resumed.target_daily_volume), (paused.day, paused.target_daily_volume));

        let expected = resumed.ramp.volume_for_day(6);
        assert_eq!(
            scheduler.tick("acct", day(7)).await.unwrap(),
            TickOutcome::Advanced { day: 6, target: expected }
        );
    }

    #[tokio::test]
    async fn invalid_transitions_leave_state_unchanged() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        assert!(matches!(
            scheduler.resume(id).await,
            Err(WarmupError::InvalidTransition { .. })
        ));
        assert_eq!(scheduler.snapshot(id).await.unwrap().status, WarmupStatus::Warming);

        assert!(matches!(
            scheduler.pause(Uuid::new_v4()).await,
            Err(WarmupError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn restart_from_paused_resets_to_day_zero() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        scheduler.tick("acct", day(1)).await.unwrap();
        scheduler.tick("acct", day(2)).await.unwrap();
        scheduler.pause(id).await.unwrap();

        let restarted = scheduler.start("acct").await.unwrap();
        assert_eq!(restarted.id, id);
        assert_eq!(restarted.status, WarmupStatus::Warming);
        assert_eq!(restarted.day, 0);
    }

    #[tokio::test]
    async fn low_health_auto_pauses_and_logs_failure() {
        let (store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        insert_logs(&store, LogKind::Sent, 16).await;
        insert_logs(&store, LogKind::Bounced, 5).await;

        let schedule = scheduler.apply_health("acct").await.unwrap();
        assert_eq!(schedule.health_score, 25);
        assert_eq!(schedule.status, WarmupStatus::Paused);
        assert_eq!(scheduler.snapshot(id).await.unwrap().status, WarmupStatus::Paused);

        let counts = store
            .count_logs_since("acct", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(counts.iter().any(|c| c.kind == LogKind::HealthCheck && c.status == LogStatus::Failed));
    }

    #[tokio::test]
    async fn low_health_without_auto_pause_keeps_warming() {
        let config = WarmupConfig {
            auto_pause_on_bounce: false,
            ..Default::default()
        };
        let (store, scheduler) = setup_with(config).await;
        scheduler.start("acct").await.unwrap();
        insert_logs(&store, LogKind::Sent, 4).await;
        insert_logs(&store, LogKind::Bounced, 4).await;

        let schedule = scheduler.apply_health("acct").await.unwrap();
        assert_eq!(schedule.health_score, 0);
        assert_eq!(schedule.status, WarmupStatus::Warming);
    }

    #[tokio::test]
    async fn healthy_tick_logs_success() {
        let (store, scheduler) = setup().await;
        scheduler.start("acct").await.unwrap();
        scheduler.tick("acct", day(1)).await.unwrap();

        let logs = store
            .list_logs("acct", Utc::now() - chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(logs.iter().any(|l| l.kind == LogKind::HealthCheck && l.status == LogStatus::Success));
    }

    #[tokio::test]
    async fn tick_unknown_account_is_error() {
        let (_store, scheduler) = setup().await;
        assert!(matches!(
            scheduler.tick("ghost", day(0)).await,
            Err(WarmupError::AccountNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tick_all_uses_each_local_date() {
        let (_store, scheduler) = setup().await;
        let east = WarmupPolicy {
            utc_offset_minutes: Some(600),
            ..Default::default()
        };
        let west = WarmupPolicy {
            utc_offset_minutes: Some(-600),
            ..Default::default()
        };
        let a = scheduler.start_with("a", &east).await.unwrap().id;
        let b = scheduler.start_with("b", &west).await.unwrap().id;
        scheduler.start("c").await.unwrap();

        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(scheduler.tick_all(tomorrow).await, 3);
        assert_eq!(scheduler.tick_all(tomorrow).await, 0);

        let a = scheduler.snapshot(a).await.unwrap();
        let b = scheduler.snapshot(b).await.unwrap();
        assert_eq!(a.last_ticked_on, Some(local_date(600, tomorrow)));
        assert_eq!(b.last_ticked_on, Some(local_date(-600, tomorrow)));

        // The ledger keys the account's days by the same local calendar.
        let now = Utc::now();
        assert_eq!(scheduler.ledger().today("a", now).await.unwrap(), local_date(600, now));
        assert_eq!(scheduler.ledger().today("b", now).await.unwrap(), local_date(-600, now));
    }

    #[tokio::test]
    async fn start_with_custom_ramp() {
        let (_store, scheduler) = setup().await;
        let policy = WarmupPolicy {
            base_volume: Some(10),
            max_daily: Some(40),
            total_days: Some(3),
            pause_threshold: Some(45),
            auto_pause_on_bounce: Some(false),
            ..Default::default()
        };
        let schedule = scheduler.start_with("acct", &policy).await.unwrap();
        assert_eq!(schedule.target_daily_volume, 10);
        assert_eq!(schedule.pause_threshold, 45);
        assert!(!schedule.auto_pause_on_bounce);
        assert_eq!(scheduler.send_limit("acct").await.unwrap().daily_limit, 10);

        assert_eq!(
            scheduler.tick("acct", day(1)).await.unwrap(),
            TickOutcome::Advanced { day: 1, target: 20 }
        );
        scheduler.tick("acct", day(2)).await.unwrap();
        assert_eq!(
            scheduler.tick("acct", day(3)).await.unwrap(),
            TickOutcome::Completed { target: 40 }
        );

        // A restart without overrides keeps the account's own ramp.
        let restarted = scheduler.start("acct").await.unwrap();
        assert_eq!(restarted.ramp.total_days, 3);
        assert_eq!(restarted.target_daily_volume, 10);
    }

    #[tokio::test]
    async fn invalid_policy_creates_nothing() {
        let (store, scheduler) = setup().await;
        let policy = WarmupPolicy {
            base_volume: Some(80),
            max_daily: Some(20),
            ..Default::default()
        };
        assert!(matches!(
            scheduler.start_with("acct", &policy).await,
            Err(WarmupError::InvalidPolicy(_))
        ));
        assert!(store.get_schedule_by_account("acct").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_entry_survives_while_in_use() {
        let (_store, scheduler) = setup().await;
        let guard = scheduler.lock("acct").await;
        scheduler.release_lock("acct").await;
        assert!(scheduler.locks.read().await.contains_key("acct"));

        drop(guard);
        scheduler.release_lock("acct").await;
        assert!(!scheduler.locks.read().await.contains_key("acct"));
    }

    #[tokio::test]
    async fn remove_keeps_history() {
        let (store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        scheduler.record_sends("acct", 2).await.unwrap();

        assert!(scheduler.remove(id).await.unwrap());
        assert!(!scheduler.remove(id).await.unwrap());
        assert!(scheduler.get_by_account("acct").await.unwrap().is_none());

        let history = scheduler.ledger().history("acct", 5).await.unwrap();
        assert_eq!(history[0].sent_count, 2);
        drop(store);
    }

    #[tokio::test]
    async fn record_sends_is_capped_and_counted() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;

        assert_eq!(scheduler.record_sends("acct", 3).await.unwrap(), 3);
        assert_eq!(scheduler.record_sends("acct", 10).await.unwrap(), 2);
        assert_eq!(scheduler.snapshot(id).await.unwrap().total_emails_sent, 5);

        let limit = scheduler.send_limit("acct").await.unwrap();
        assert_eq!((limit.sent_today, limit.remaining), (5, 0));
    }

    #[tokio::test]
    async fn replies_bump_counter() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        scheduler.record_reply("acct", "peer@x.io").await.unwrap();
        scheduler.record_reply("acct", "peer@x.io").await.unwrap();
        assert_eq!(scheduler.snapshot(id).await.unwrap().replies_received, 2);
    }

    #[tokio::test]
    async fn bounce_signal_triggers_health_check() {
        let (store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        insert_logs(&store, LogKind::Sent, 2).await;

        scheduler.record_signal("acct", LogKind::Bounced, "p0@x.io").await.unwrap();
        let schedule = scheduler.snapshot(id).await.unwrap();
        assert_eq!(schedule.health_score, 10);
        assert_eq!(schedule.status, WarmupStatus::Paused);
    }

    #[tokio::test]
    async fn batch_observer_counts_successes() {
        let (_store, scheduler) = setup().await;
        let id = scheduler.start("acct").await.unwrap().id;
        let summary = DispatchSummary {
            sent: 4,
            failed: 1,
            total: 5,
            not_attempted: 0,
        };
        scheduler.batch_completed("acct", &summary).await;
        assert_eq!(scheduler.snapshot(id).await.unwrap().total_emails_sent, 4);

        // Unknown accounts are ignored.
        scheduler.batch_completed("nobody", &summary).await;
    }

    #[tokio::test]
    async fn send_limit_without_schedule_uses_default() {
        let (_store, scheduler) = setup().await;
        let limit = scheduler.send_limit("free").await.unwrap();
        assert!(!limit.is_ramping);
        assert_eq!(limit.daily_limit, LedgerConfig::default().default_daily_limit);
        assert_eq!((limit.day, limit.ramp_days), (0, 0));
    }

    #[test]
    fn send_limit_serializes_camel_case() {
        let json = serde_json::to_value(SendLimit {
            is_ramping: true,
            daily_limit: 9,
            sent_today: 2,
            remaining: 7,
            day: 1,
            ramp_days: 14,
        })
        .unwrap();
        assert_eq!(json["isRamping"], true);
        assert_eq!(json["sentToday"], 2);
        assert_eq!(json["rampDays"], 14);
    }
}
