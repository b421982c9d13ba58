//! Quota ledger: per-account, per-day send ceiling and usage.
//!
//! The ledger is the only component that grants sending capacity. Every
//! grant goes through [`QuotaLedger::reserve`], which is a single atomic
//! compare-and-increment in the store, so concurrent producers (campaign
//! dispatches and background warmup traffic) can never push `sent_count`
//! past `daily_limit`.
//!
//! Entries are keyed by account-local date: a new day starts at zero sent
//! without any reset, and past days are read-only.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::Database;
use crate::warmup::model::{WarmupStatus, local_date};

/// One (account, day) row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account_id: String,
    pub date: NaiveDate,
    pub daily_limit: u32,
    pub sent_count: u32,
}

impl LedgerEntry {
    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.sent_count)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            daily_limit: self.daily_limit,
            sent_count: self.sent_count,
            remaining: self.remaining(),
        }
    }
}

/// Read-only view of a day's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub daily_limit: u32,
    pub sent_count: u32,
    pub remaining: u32,
}

/// Result of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub requested: u32,
    pub granted: u32,
    /// Ledger state after the grant was applied.
    pub after: LedgerSnapshot,
}

impl Reservation {
    pub fn is_empty(&self) -> bool {
        self.granted == 0
    }
}

/// Shared daily send-quota ledger.
pub struct QuotaLedger {
    store: Arc<dyn Database>,
    config: LedgerConfig,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn Database>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Account-local calendar date at `now`.
    pub async fn today(&self, account_id: &str, now: DateTime<Utc>) -> Result<NaiveDate, LedgerError> {
        let offset = self
            .store
            .get_schedule_by_account(account_id)
            .await?
            .map(|s| s.utc_offset_minutes)
            .unwrap_or(0);
        Ok(local_date(offset, now))
    }

    /// Set or raise the ceiling for (account, date). Past days are closed.
    pub async fn set_daily_limit(
        &self,
        account_id: &str,
        date: NaiveDate,
        limit: u32,
    ) -> Result<LedgerEntry, LedgerError> {
        self.ensure_open(account_id, date).await?;
        let entry = self.store.raise_daily_limit(account_id, date, limit).await?;
        debug!(
            account_id,
            %date,
            requested_limit = limit,
            daily_limit = entry.daily_limit,
            "Daily limit set"
        );
        Ok(entry)
    }

    /// Grant up to `requested` sends for (account, date) and count them
    /// immediately. Failed sends keep their slot; there is no refund.
    pub async fn reserve(
        &self,
        account_id: &str,
        date: NaiveDate,
        requested: u32,
    ) -> Result<Reservation, LedgerError> {
        self.ensure_open(account_id, date).await?;
        let limit = self.resolve_limit(account_id).await?;
        self.store.ensure_ledger_entry(account_id, date, limit).await?;

        let (granted, entry) = match self.store.reserve_quota(account_id, date, requested).await? {
            Some(result) => result,
            None => {
                return Err(LedgerError::Database(
                    crate::error::DatabaseError::NotFound {
                        entity: "quota_ledger".into(),
                        id: format!("{account_id}/{date}"),
                    },
                ));
            }
        };

        info!(
            account_id,
            %date,
            requested,
            granted,
            remaining = entry.remaining(),
            "Quota reserved"
        );

        Ok(Reservation {
            requested,
            granted,
            after: entry.snapshot(),
        })
    }

    /// Read-only snapshot. An untouched day reports the resolved limit with
    /// nothing sent.
    pub async fn remaining(
        &self,
        account_id: &str,
        date: NaiveDate,
    ) -> Result<LedgerSnapshot, LedgerError> {
        match self.store.get_ledger_entry(account_id, date).await? {
            Some(entry) => Ok(entry.snapshot()),
            None => {
                let limit = self.resolve_limit(account_id).await?;
                Ok(LedgerSnapshot {
                    daily_limit: limit,
                    sent_count: 0,
                    remaining: limit,
                })
            }
        }
    }

    /// Past daily usage, newest first.
    pub async fn history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.store.list_ledger_entries(account_id, limit).await?)
    }

    /// Ceiling for an entry created lazily: the ramp target while warming or
    /// paused, then the configured send policy, then a finished ramp's target,
    /// then the global default.
    async fn resolve_limit(&self, account_id: &str) -> Result<u32, LedgerError> {
        let schedule = self.store.get_schedule_by_account(account_id).await?;
        if let Some(ref s) = schedule
            && s.status.is_ramping()
        {
            return Ok(s.target_daily_volume);
        }
        if let Some(limit) = self.store.get_send_policy(account_id).await? {
            return Ok(limit);
        }
        match schedule {
            Some(s) if s.status == WarmupStatus::Ready => Ok(s.target_daily_volume),
            _ => Ok(self.config.default_daily_limit),
        }
    }

    async fn ensure_open(&self, account_id: &str, date: NaiveDate) -> Result<(), LedgerError> {
        let today = self.today(account_id, Utc::now()).await?;
        if date < today {
            return Err(LedgerError::DayClosed {
                account_id: account_id.to_string(),
                date,
            });
        }
        Ok(())
    }
}
