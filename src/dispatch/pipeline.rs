//! Dispatch pipeline.
//!
//! `dispatch` reserves quota for the whole batch up front, then hands the
//! capped recipient list to a spawned task that sends sequentially with the
//! requested pacing. Dropping the handle stops the task before the next
//! recipient; slots already reserved are kept.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::template::{Contact, EmailTemplate};
use super::transport::{MailTransport, OutgoingEmail};
use super::{BatchObserver, DispatchEvent, DispatchRequest, DispatchSummary, TemplateSource};
use crate::error::DispatchError;
use crate::ledger::QuotaLedger;
use crate::store::Database;
use crate::warmup::model::{LogKind, LogStatus, WarmupLogEntry};

const EVENT_BUFFER: usize = 64;

/// Per-recipient result collected from the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientResult {
    pub email: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Everything a drained dispatch produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub results: Vec<RecipientResult>,
    pub not_attempted: Vec<String>,
    pub summary: DispatchSummary,
}

/// Handle to a running dispatch.
pub struct DispatchHandle {
    pub granted: usize,
    pub not_attempted: usize,
    events: ReceiverStream<DispatchEvent>,
}

impl DispatchHandle {
    /// Next event, or `None` once the batch is finished.
    pub async fn next(&mut self) -> Option<DispatchEvent> {
        self.events.next().await
    }

    pub fn into_stream(self) -> ReceiverStream<DispatchEvent> {
        self.events
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut summary = None;
        while let Some(event) = self.next().await {
            match event {
                DispatchEvent::Capped { not_attempted, .. } => outcome.not_attempted = not_attempted,
                DispatchEvent::Result {
                    email,
                    success,
                    error,
                } => outcome.results.push(RecipientResult {
                    email,
                    success,
                    error,
                }),
                DispatchEvent::Complete(s) => summary = Some(s),
            }
        }
        outcome.summary = summary.unwrap_or_else(|| {
            let sent = outcome.results.iter().filter(|r| r.success).count();
            DispatchSummary {
                sent,
                failed: outcome.results.len() - sent,
                total: outcome.results.len(),
                not_attempted: outcome.not_attempted.len(),
            }
        });
        outcome
    }
}

/// Reserves from the ledger and runs paced batches.
pub struct DispatchPipeline {
    store: Arc<dyn Database>,
    ledger: Arc<QuotaLedger>,
    transport: Arc<dyn MailTransport>,
    observer: Option<Arc<dyn BatchObserver>>,
}

impl DispatchPipeline {
    pub fn new(
        store: Arc<dyn Database>,
        ledger: Arc<QuotaLedger>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            store,
            ledger,
            transport,
            observer: None,
        }
    }

    /// Builder: notify `observer` when each batch completes.
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start a dispatch.
    ///
    /// Fails without side effects on an empty batch or unknown template, and
    /// with [`DispatchError::QuotaExhausted`] when nothing could be reserved.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchHandle, DispatchError> {
        if request.recipients.is_empty() {
            return Err(DispatchError::EmptyRecipients);
        }
        let template = self.resolve_template(&request.template).await?;

        let account_id = request.account_id;
        let requested = request.recipients.len();
        let today = self.ledger.today(&account_id, Utc::now()).await?;
        let reservation = self
            .ledger
            .reserve(&account_id, today, u32::try_from(requested).unwrap_or(u32::MAX))
            .await?;

        if reservation.is_empty() {
            warn!(account_id = %account_id, requested, "Dispatch refused, daily quota exhausted");
            return Err(DispatchError::QuotaExhausted {
                account_id,
                daily_limit: reservation.after.daily_limit,
                requested,
            });
        }

        let granted = (reservation.granted as usize).min(requested);
        let mut recipients = request.recipients;
        let not_attempted: Vec<String> = recipients
            .split_off(granted)
            .into_iter()
            .map(|c| c.email)
            .collect();

        let day = self
            .store
            .get_schedule_by_account(&account_id)
            .await?
            .map(|s| s.day)
            .unwrap_or(0);

        info!(
            account_id = %account_id,
            requested,
            granted,
            not_attempted = not_attempted.len(),
            "Dispatch started"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = DispatchHandle {
            granted,
            not_attempted: not_attempted.len(),
            events: ReceiverStream::new(rx),
        };

        let batch = Batch {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            observer: self.observer.clone(),
            from: request.from.unwrap_or_else(|| account_id.clone()),
            account_id,
            day,
            template,
            recipients,
            not_attempted,
            delay: Duration::from_millis(request.delay_ms),
        };
        tokio::spawn(batch.run(tx));

        Ok(handle)
    }

    async fn resolve_template(&self, source: &TemplateSource) -> Result<EmailTemplate, DispatchError> {
        match source {
            TemplateSource::Stored { template_id } => self
                .store
                .get_template(template_id)
                .await?
                .ok_or_else(|| DispatchError::TemplateNotFound(template_id.clone())),
            TemplateSource::Inline { subject, html } => Ok(EmailTemplate::new(
                "inline",
                "inline",
                subject.clone(),
                html.clone(),
            )),
        }
    }
}

/// State moved into the spawned batch task.
struct Batch {
    store: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    observer: Option<Arc<dyn BatchObserver>>,
    account_id: String,
    from: String,
    day: u32,
    template: EmailTemplate,
    recipients: Vec<Contact>,
    not_attempted: Vec<String>,
    delay: Duration,
}

impl Batch {
    async fn run(self, tx: mpsc::Sender<DispatchEvent>) {
        let mut summary = DispatchSummary {
            not_attempted: self.not_attempted.len(),
            ..Default::default()
        };

        let mut cancelled = false;
        if !self.not_attempted.is_empty() {
            let capped = DispatchEvent::Capped {
                granted: self.recipients.len(),
                not_attempted: self.not_attempted.clone(),
            };
            cancelled = tx.send(capped).await.is_err();
        }

        for (i, contact) in self.recipients.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if cancelled || tx.is_closed() {
                cancelled = true;
                break;
            }

            let event = self.send_one(contact).await;
            if let DispatchEvent::Result { success, .. } = &event {
                summary.total += 1;
                if *success {
                    summary.sent += 1;
                } else {
                    summary.failed += 1;
                }
            }
            if tx.send(event).await.is_err() {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            info!(
                account_id = %self.account_id,
                attempted = summary.total,
                remaining = self.recipients.len() - summary.total,
                "Dispatch cancelled by receiver"
            );
        } else {
            info!(
                account_id = %self.account_id,
                sent = summary.sent,
                failed = summary.failed,
                total = summary.total,
                "Dispatch complete"
            );
        }

        if let Some(observer) = &self.observer {
            observer.batch_completed(&self.account_id, &summary).await;
        }
        let _ = tx.send(DispatchEvent::Complete(summary)).await;
    }

    /// Render, send, and log one recipient. Never fails the batch.
    async fn send_one(&self, contact: &Contact) -> DispatchEvent {
        let rendered = self.template.render(contact);
        let email = OutgoingEmail {
            from: self.from.clone(),
            to: contact.email.clone(),
            subject: rendered.subject,
            html: rendered.html,
        };

        let error = match self.transport.send(&email).await {
            Ok(()) => {
                debug!(account_id = %self.account_id, to = %email.to, "Recipient sent");
                None
            }
            Err(e) => {
                warn!(account_id = %self.account_id, to = %email.to, error = %e, "Recipient failed");
                Some(e.to_string())
            }
        };

        let status = if error.is_none() {
            LogStatus::Success
        } else {
            LogStatus::Failed
        };
        let mut entry = WarmupLogEntry::new(LogKind::Sent, status, &self.account_id, self.day, &email.to)
            .with_subject(&email.subject);
        entry.error = error.clone();
        if let Err(e) = self.store.insert_log(&entry).await {
            warn!(account_id = %self.account_id, error = %e, "Failed to write send log");
        }

        DispatchEvent::Result {
            email: email.to,
            success: error.is_none(),
            error,
        }
    }
}
