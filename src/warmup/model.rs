//! Warmup data model: schedules, ramp policy and log entries.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::WarmupConfig;
use crate::error::WarmupError;

/// Lifecycle status of a warmup schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    NotStarted,
    Warming,
    Paused,
    Ready,
}

impl WarmupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Warming => "warming",
            Self::Paused => "paused",
            Self::Ready => "ready",
        }
    }

    /// Whether the ramp (rather than the send policy) governs the daily limit.
    pub fn is_ramping(&self) -> bool {
        matches!(self, Self::Warming | Self::Paused)
    }
}

impl std::fmt::Display for WarmupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarmupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "warming" => Ok(Self::Warming),
            "paused" => Ok(Self::Paused),
            "ready" => Ok(Self::Ready),
            other => Err(format!("unknown warmup status: {other}")),
        }
    }
}

/// Per-account ramp inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RampPolicy {
    pub base_volume: u32,
    pub max_daily: u32,
    pub total_days: u32,
}

impl RampPolicy {
    pub fn from_config(config: &WarmupConfig) -> Self {
        Self {
            base_volume: config.base_volume,
            max_daily: config.max_daily,
            total_days: config.total_days,
        }
    }

    /// Daily ceiling for `day` of the ramp.
    ///
    /// `min(max_daily, base + ceil(day * (max_daily - base) / total_days))`.
    /// Non-decreasing in `day`; a zero-length ramp is already at `max_daily`.
    pub fn volume_for_day(&self, day: u32) -> u32 {
        if self.total_days == 0 {
            return self.max_daily;
        }
        let span = u64::from(self.max_daily.saturating_sub(self.base_volume));
        let total = u64::from(self.total_days);
        let step = (u64::from(day) * span).div_ceil(total);
        let volume = u64::from(self.base_volume) + step;
        volume.min(u64::from(self.max_daily)) as u32
    }
}

/// Largest UTC offset a schedule may carry, in minutes.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Per-account overrides supplied when warmup starts. Unset fields keep the
/// schedule's current values (the configured defaults for a new schedule).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WarmupPolicy {
    pub base_volume: Option<u32>,
    pub max_daily: Option<u32>,
    pub total_days: Option<u32>,
    pub pause_threshold: Option<u8>,
    pub auto_pause_on_bounce: Option<bool>,
    pub utc_offset_minutes: Option<i32>,
}

/// What a single tick did to a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Already ticked for this date.
    AlreadyTicked,
    /// Not warming; only `last_ticked_on` moved.
    Skipped(WarmupStatus),
    /// Moved to the next ramp day.
    Advanced { day: u32, target: u32 },
    /// Reached the end of the ramp.
    Completed { target: u32 },
}

/// Per-account warmup ramp state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupSchedule {
    pub id: Uuid,
    pub account_id: String,
    pub status: WarmupStatus,
    pub day: u32,
    pub ramp: RampPolicy,
    pub target_daily_volume: u32,
    pub health_score: u8,
    pub replies_received: u64,
    pub total_emails_sent: u64,
    /// Account-local date of the last tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ticked_on: Option<NaiveDate>,
    pub auto_pause_on_bounce: bool,
    pub pause_threshold: u8,
    /// Offset used to derive the account-local calendar day.
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WarmupSchedule {
    /// A fresh schedule in `Warming` at day 0.
    pub fn new(account_id: impl Into<String>, config: &WarmupConfig) -> Self {
        let ramp = RampPolicy::from_config(config);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            status: WarmupStatus::Warming,
            day: 0,
            ramp,
            target_daily_volume: ramp.volume_for_day(0),
            health_score: 50,
            replies_received: 0,
            total_emails_sent: 0,
            last_ticked_on: None,
            auto_pause_on_bounce: config.auto_pause_on_bounce,
            pause_threshold: config.pause_threshold,
            utc_offset_minutes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set the account-local UTC offset.
    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Apply per-account overrides. Validated as a whole; on error nothing
    /// changes.
    pub fn apply_policy(&mut self, policy: &WarmupPolicy) -> Result<(), WarmupError> {
        let ramp = RampPolicy {
            base_volume: policy.base_volume.unwrap_or(self.ramp.base_volume),
            max_daily: policy.max_daily.unwrap_or(self.ramp.max_daily),
            total_days: policy.total_days.unwrap_or(self.ramp.total_days),
        };
        let pause_threshold = policy.pause_threshold.unwrap_or(self.pause_threshold);
        let utc_offset_minutes = policy.utc_offset_minutes.unwrap_or(self.utc_offset_minutes);

        if ramp.max_daily == 0 {
            return Err(WarmupError::InvalidPolicy("maxDaily must be positive".into()));
        }
        if ramp.base_volume > ramp.max_daily {
            return Err(WarmupError::InvalidPolicy(format!(
                "baseVolume {} exceeds maxDaily {}",
                ramp.base_volume, ramp.max_daily
            )));
        }
        if pause_threshold > 100 {
            return Err(WarmupError::InvalidPolicy(format!(
                "pauseThreshold {pause_threshold} is above 100"
            )));
        }
        if utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(WarmupError::InvalidPolicy(format!(
                "utcOffsetMinutes {utc_offset_minutes} is out of range"
            )));
        }

        self.ramp = ramp;
        self.day = self.day.min(ramp.total_days);
        self.target_daily_volume = ramp.volume_for_day(self.day);
        self.pause_threshold = pause_threshold;
        self.utc_offset_minutes = utc_offset_minutes;
        if let Some(auto_pause) = policy.auto_pause_on_bounce {
            self.auto_pause_on_bounce = auto_pause;
        }
        self.touch();
        Ok(())
    }

    /// Account-local calendar date for `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(self.utc_offset_minutes, now)
    }

    /// Restart the ramp from day 0. Allowed from `Ready`, `Paused` and `NotStarted`.
    pub fn restart(&mut self) -> Result<(), WarmupError> {
        if self.status == WarmupStatus::Warming {
            return Err(WarmupError::InvalidTransition {
                state: self.status,
                action: "start",
            });
        }
        self.status = WarmupStatus::Warming;
        self.day = 0;
        self.target_daily_volume = self.ramp.volume_for_day(0);
        self.touch();
        Ok(())
    }

    /// `Warming -> Paused`. Day and target stay as they are.
    pub fn pause(&mut self) -> Result<(), WarmupError> {
        if self.status != WarmupStatus::Warming {
            return Err(WarmupError::InvalidTransition {
                state: self.status,
                action: "pause",
            });
        }
        self.status = WarmupStatus::Paused;
        self.touch();
        Ok(())
    }

    /// `Paused -> Warming`. The ramp continues from the current day.
    pub fn resume(&mut self) -> Result<(), WarmupError> {
        if self.status != WarmupStatus::Paused {
            return Err(WarmupError::InvalidTransition {
                state: self.status,
                action: "resume",
            });
        }
        self.status = WarmupStatus::Warming;
        self.touch();
        Ok(())
    }

    /// Advance one ramp day for `today`. Idempotent per date; a date at or
    /// before the last tick is a no-op.
    pub fn advance(&mut self, today: NaiveDate) -> TickOutcome {
        if self.last_ticked_on.is_some_and(|last| today <= last) {
            return TickOutcome::AlreadyTicked;
        }
        self.last_ticked_on = Some(today);
        self.touch();

        if self.status != WarmupStatus::Warming {
            return TickOutcome::Skipped(self.status);
        }

        self.day = (self.day + 1).min(self.ramp.total_days);
        if self.day >= self.ramp.total_days {
            self.status = WarmupStatus::Ready;
            self.target_daily_volume = self.ramp.max_daily;
            TickOutcome::Completed {
                target: self.target_daily_volume,
            }
        } else {
            self.target_daily_volume = self.ramp.volume_for_day(self.day);
            TickOutcome::Advanced {
                day: self.day,
                target: self.target_daily_volume,
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Calendar date at a fixed UTC offset. Out-of-range offsets fall back to UTC.
pub fn local_date(utc_offset_minutes: i32, now: DateTime<Utc>) -> NaiveDate {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}

/// Kind of warmup log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Sent,
    ReplyReceived,
    Bounced,
    Opened,
    Complaint,
    HealthCheck,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::ReplyReceived => "reply_received",
            Self::Bounced => "bounced",
            Self::Opened => "opened",
            Self::Complaint => "complaint",
            Self::HealthCheck => "health_check",
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "reply_received" => Ok(Self::ReplyReceived),
            "bounced" => Ok(Self::Bounced),
            "opened" => Ok(Self::Opened),
            "complaint" => Ok(Self::Complaint),
            "health_check" => Ok(Self::HealthCheck),
            other => Err(format!("unknown log kind: {other}")),
        }
    }
}

/// Outcome recorded with a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only record of a send attempt or health event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupLogEntry {
    pub id: Uuid,
    pub kind: LogKind,
    pub status: LogStatus,
    pub account_id: String,
    pub day: u32,
    pub recipient_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WarmupLogEntry {
    pub fn new(
        kind: LogKind,
        status: LogStatus,
        account_id: impl Into<String>,
        day: u32,
        recipient_email: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status,
            account_id: account_id.into(),
            day,
            recipient_email: recipient_email.into(),
            subject: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: set subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Builder: set error text.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
