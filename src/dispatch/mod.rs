//! Bulk dispatch: reserve quota, then send a personalized batch one
//! recipient at a time, streaming per-recipient outcomes.

pub mod pipeline;
pub mod template;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use pipeline::{DispatchHandle, DispatchOutcome, DispatchPipeline};
pub use template::{Contact, EmailTemplate};
pub use transport::{MailTransport, OutgoingEmail, SmtpConfig, SmtpMailer};

/// Where the batch's template comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    /// A template stored in the `templates` table.
    Stored { template_id: String },
    /// Subject and body supplied with the request.
    Inline { subject: String, html: String },
}

/// One bulk-send invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub account_id: String,
    #[serde(flatten)]
    pub template: TemplateSource,
    pub recipients: Vec<Contact>,
    /// Pause between consecutive recipients.
    #[serde(default)]
    pub delay_ms: u64,
    /// Sender address; defaults to the account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl DispatchRequest {
    pub fn new(
        account_id: impl Into<String>,
        template: TemplateSource,
        recipients: Vec<Contact>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            template,
            recipients,
            delay_ms: 0,
            from: None,
        }
    }

    /// Builder: set the inter-recipient delay.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Builder: set the sender address.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

/// Aggregate of a finished (or cancelled) batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Recipients actually attempted.
    pub total: usize,
    /// Recipients dropped by the quota cap.
    pub not_attempted: usize,
}

/// Streamed over the lifetime of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Emitted first when the ledger granted fewer slots than recipients.
    Capped {
        granted: usize,
        not_attempted: Vec<String>,
    },
    /// One recipient's outcome.
    Result {
        email: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Final aggregate; nothing follows.
    Complete(DispatchSummary),
}

/// Notified once per batch after the last recipient.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn batch_completed(&self, account_id: &str, summary: &DispatchSummary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_stored_or_inline_template() {
        let stored: DispatchRequest = serde_json::from_value(json!({
            "account_id": "a@x.io",
            "template_id": "intro",
            "recipients": [{"email": "b@y.io"}]
        }))
        .unwrap();
        assert_eq!(
            stored.template,
            TemplateSource::Stored {
                template_id: "intro".into()
            }
        );
        assert_eq!(stored.delay_ms, 0);

        let inline: DispatchRequest = serde_json::from_value(json!({
            "account_id": "a@x.io",
            "subject": "Hi {{first_name}}",
            "html": "<p>hello</p>",
            "recipients": [],
            "delay_ms": 250
        }))
        .unwrap();
        assert!(matches!(inline.template, TemplateSource::Inline { .. }));
        assert_eq!(inline.delay_ms, 250);
    }

    #[test]
    fn events_are_tagged_by_type() {
        let result = serde_json::to_value(DispatchEvent::Result {
            email: "b@y.io".into(),
            success: true,
            error: None,
        })
        .unwrap();
        assert_eq!(result, json!({"type": "result", "email": "b@y.io", "success": true}));

        let complete = serde_json::to_value(DispatchEvent::Complete(DispatchSummary {
            sent: 3,
            failed: 2,
            total: 5,
            not_attempted: 0,
        }))
        .unwrap();
        assert_eq!(complete["type"], "complete");
        assert_eq!(complete["sent"], 3);
        assert_eq!(complete["total"], 5);
    }
}
