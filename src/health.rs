//! Health scoring: a 0 to 100 reputation proxy from recent deliverability signals.
//!
//! The score starts at a neutral 50, gains for replies and loses for bounces
//! and complaints, each weighted by its rate relative to sends in a trailing
//! window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::{Database, LogCount};
use crate::warmup::model::LogKind;

/// Neutral score for an account with no sending history.
pub const BASELINE_SCORE: f64 = 50.0;

/// Tunable weights of the scoring formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub reply: f64,
    pub bounce: f64,
    pub complaint: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            reply: 40.0,
            bounce: 80.0,
            complaint: 120.0,
        }
    }
}

/// Raw signal counts over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignals {
    pub sent: u64,
    pub bounced: u64,
    pub replies: u64,
    pub complaints: u64,
    pub opened: u64,
}

impl HealthSignals {
    /// Fold grouped log counts into signals. Every send attempt counts as sent.
    pub fn from_counts(counts: &[LogCount]) -> Self {
        let mut signals = Self::default();
        for c in counts {
            match c.kind {
                LogKind::Sent => signals.sent += c.count,
                LogKind::Bounced => signals.bounced += c.count,
                LogKind::ReplyReceived => signals.replies += c.count,
                LogKind::Complaint => signals.complaints += c.count,
                LogKind::Opened => signals.opened += c.count,
                LogKind::HealthCheck => {}
            }
        }
        signals
    }

    fn rate(&self, count: u64) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            count as f64 / self.sent as f64
        }
    }
}

/// Pure scoring function, always within `0..=100`.
pub fn score(signals: &HealthSignals, weights: &HealthWeights) -> u8 {
    let raw = BASELINE_SCORE + weights.reply * signals.rate(signals.replies)
        - weights.bounce * signals.rate(signals.bounced)
        - weights.complaint * signals.rate(signals.complaints);
    if raw.is_nan() {
        return BASELINE_SCORE as u8;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Reads the trailing window of log entries for an account and scores it.
pub struct HealthScorer {
    store: Arc<dyn Database>,
    weights: HealthWeights,
    window_days: u32,
}

impl HealthScorer {
    pub fn new(store: Arc<dyn Database>, weights: HealthWeights, window_days: u32) -> Self {
        Self {
            store,
            weights,
            window_days,
        }
    }

    /// Signals for the window ending at `now`.
    pub async fn signals(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HealthSignals, DatabaseError> {
        let since = now - Duration::days(i64::from(self.window_days));
        let counts = self.store.count_logs_since(account_id, since).await?;
        Ok(HealthSignals::from_counts(&counts))
    }

    pub async fn score(&self, account_id: &str, now: DateTime<Utc>) -> Result<u8, DatabaseError> {
        let signals = self.signals(account_id, now).await?;
        let value = score(&signals, &self.weights);
        debug!(
            account_id,
            sent = signals.sent,
            bounced = signals.bounced,
            replies = signals.replies,
            complaints = signals.complaints,
            score = value,
            "Health scored"
        );
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::warmup::model::{LogStatus, WarmupLogEntry};

    fn signals(sent: u64, bounced: u64, replies: u64, complaints: u64) -> HealthSignals {
        HealthSignals {
            sent,
            bounced,
            replies,
            complaints,
            opened: 0,
        }
    }

    #[test]
    fn no_sends_is_neutral() {
        assert_eq!(score(&HealthSignals::default(), &HealthWeights::default()), 50);
        // Signals without sends carry no rate.
        assert_eq!(score(&signals(0, 3, 0, 2), &HealthWeights::default()), 50);
    }

    #[test]
    fn bounces_lower_and_replies_raise() {
        let weights = HealthWeights::default();
        assert_eq!(score(&signals(16, 5, 0, 0), &weights), 25);
        assert_eq!(score(&signals(10, 0, 5, 0), &weights), 70);
        assert!(score(&signals(10, 0, 0, 1), &weights) < score(&signals(10, 1, 0, 0), &weights));
    }

    #[test]
    fn score_is_bounded() {
        let weights = HealthWeights::default();
        for (sent, bounced, replies, complaints) in [
            (1, 1, 0, 1),
            (1, 0, 50, 0),
            (3, 100, 0, 100),
            (1000, 0, 1000, 0),
            (u64::MAX, u64::MAX, u64::MAX, u64::MAX),
        ] {
            let value = score(&signals(sent, bounced, replies, complaints), &weights);
            assert!(value <= 100);
        }
        assert_eq!(score(&signals(1, 1, 0, 1), &weights), 0);
        assert_eq!(score(&signals(1, 0, 50, 0), &weights), 100);
    }

    #[test]
    fn from_counts_folds_kinds() {
        let counts = [
            LogCount { kind: LogKind::Sent, status: LogStatus::Success, count: 8 },
            LogCount { kind: LogKind::Sent, status: LogStatus::Failed, count: 2 },
            LogCount { kind: LogKind::Bounced, status: LogStatus::Success, count: 1 },
            LogCount { kind: LogKind::HealthCheck, status: LogStatus::Failed, count: 4 },
        ];
        let signals = HealthSignals::from_counts(&counts);
        assert_eq!(signals.sent, 10);
        assert_eq!(signals.bounced, 1);
        assert_eq!(signals.replies, 0);
    }

    #[tokio::test]
    async fn scorer_reads_window_from_store() {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for _ in 0..4 {
            store
                .insert_log(&WarmupLogEntry::new(LogKind::Sent, LogStatus::Success, "acct", 1, "p@x.io"))
                .await
                .unwrap();
        }
        store
            .insert_log(&WarmupLogEntry::new(LogKind::ReplyReceived, LogStatus::Success, "acct", 1, "p@x.io"))
            .await
            .unwrap();

        // Outside the window.
        let mut old = WarmupLogEntry::new(LogKind::Bounced, LogStatus::Success, "acct", 1, "p@x.io");
        old.created_at = Utc::now() - Duration::days(30);
        store.insert_log(&old).await.unwrap();

        let scorer = HealthScorer::new(store, HealthWeights::default(), 7);
        assert_eq!(scorer.score("acct", Utc::now()).await.unwrap(), 60);
    }
}
