//! Background warmup traffic: short conversational emails sent to a pool of
//! peer mailboxes through the regular dispatch pipeline, so they draw on the
//! same daily quota as user campaigns.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use super::model::WarmupStatus;
use super::scheduler::WarmupScheduler;
use crate::config::WarmupConfig;
use crate::dispatch::{Contact, DispatchPipeline, DispatchRequest, DispatchSummary, TemplateSource};
use crate::error::{ConfigError, DispatchError, WarmupError};

const TRAFFIC_SUBJECT: &str = "Quick question, {{first_name}}";
const TRAFFIC_HTML: &str = "<p>Hi {{first_name}},</p>\
<p>Hope your week is going well. Do you have a few minutes later to catch up on the {{company}} update?</p>\
<p>Thanks!</p>";

pub struct WarmupTraffic {
    scheduler: Arc<WarmupScheduler>,
    pipeline: Arc<DispatchPipeline>,
    config: WarmupConfig,
    runs_per_day: u32,
}

impl WarmupTraffic {
    pub fn new(
        scheduler: Arc<WarmupScheduler>,
        pipeline: Arc<DispatchPipeline>,
        config: WarmupConfig,
    ) -> Self {
        let runs_per_day = runs_per_day(&config.traffic_schedule).unwrap_or(1);
        Self {
            scheduler,
            pipeline,
            config,
            runs_per_day,
        }
    }

    /// Most peers one run may mail: the traffic share of `target`, split
    /// evenly across the day's runs and rounded up.
    pub fn run_budget(&self, target: u32) -> u32 {
        let share = u64::from(target) * u64::from(self.config.traffic_share_percent.min(100));
        share.div_ceil(100 * u64::from(self.runs_per_day)) as u32
    }

    /// Send one round of warmup traffic for a warming account.
    ///
    /// Returns `None` when nothing was sent: the schedule is not warming, no
    /// peers are configured, or today's allowance is used up.
    pub async fn send(&self, account_id: &str) -> Result<Option<DispatchSummary>, WarmupError> {
        let schedule = self
            .scheduler
            .get_by_account(account_id)
            .await?
            .ok_or_else(|| WarmupError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;
        if schedule.status != WarmupStatus::Warming {
            debug!(account_id, status = %schedule.status, "No warmup traffic for non-warming schedule");
            return Ok(None);
        }

        let ledger = self.scheduler.ledger();
        let today = ledger.today(account_id, Utc::now()).await?;
        let remaining = ledger.remaining(account_id, today).await?.remaining;
        let budget = remaining.min(self.run_budget(schedule.target_daily_volume)) as usize;

        let recipients = self.pick_peers(account_id, budget);
        if recipients.is_empty() {
            debug!(account_id, remaining, budget, "No warmup traffic to send");
            return Ok(None);
        }

        let request = DispatchRequest::new(
            account_id,
            TemplateSource::Inline {
                subject: TRAFFIC_SUBJECT.to_string(),
                html: TRAFFIC_HTML.to_string(),
            },
            recipients,
        )
        .with_delay_ms(self.config.traffic_delay.as_millis() as u64);

        match self.pipeline.dispatch(request).await {
            Ok(handle) => {
                let outcome = handle.collect().await;
                info!(
                    account_id,
                    sent = outcome.summary.sent,
                    failed = outcome.summary.failed,
                    "Warmup traffic round complete"
                );
                Ok(Some(outcome.summary))
            }
            // Another producer drained the quota after our read.
            Err(DispatchError::QuotaExhausted { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one round for every warming schedule, accounts in parallel.
    pub async fn run_all(&self) -> usize {
        let schedules = match self.scheduler.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to list schedules for warmup traffic");
                return 0;
            }
        };

        let rounds = schedules
            .iter()
            .filter(|s| s.status == WarmupStatus::Warming)
            .map(|s| self.send(&s.account_id));

        let mut sent_rounds = 0;
        for result in join_all(rounds).await {
            match result {
                Ok(Some(_)) => sent_rounds += 1,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Warmup traffic round failed"),
            }
        }
        sent_rounds
    }

    /// Up to `budget` distinct peers, never the account itself, in random order.
    fn pick_peers(&self, account_id: &str, budget: usize) -> Vec<Contact> {
        let peers: Vec<&String> = self
            .config
            .peer_addresses
            .iter()
            .filter(|p| !p.eq_ignore_ascii_case(account_id))
            .collect();
        let mut rng = rand::thread_rng();
        peers
            .choose_multiple(&mut rng, budget)
            .map(|p| Contact::new(p.as_str()))
            .collect()
    }
}

fn parse_schedule(expression: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expression).map_err(|e| ConfigError::InvalidValue {
        key: "WARMUP_TRAFFIC_SCHEDULE".into(),
        message: format!("invalid cron: {e}"),
    })
}

/// Fire times of `expression` in the next 24 hours, at least 1.
pub fn runs_per_day(expression: &str) -> Result<u32, ConfigError> {
    let schedule = parse_schedule(expression)?;
    let horizon = Utc::now() + chrono::Duration::days(1);
    let runs = schedule
        .upcoming(Utc)
        .take_while(|fire| *fire <= horizon)
        .take(24 * 60)
        .count();
    Ok((runs as u32).max(1))
}

/// Run warmup traffic at each fire time of `expression` (cron with seconds).
pub fn spawn_traffic_task(
    traffic: Arc<WarmupTraffic>,
    expression: &str,
) -> Result<tokio::task::JoinHandle<()>, ConfigError> {
    let schedule = parse_schedule(expression)?;

    Ok(tokio::spawn(async move {
        while let Some(next) = schedule.upcoming(Utc).next() {
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            let rounds = traffic.run_all().await;
            debug!(rounds, "Warmup traffic pass complete");
        }
    }))
}
