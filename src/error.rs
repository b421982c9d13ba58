//! Error types for mail-warmup.

use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::warmup::model::WarmupStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Quota ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger day {date} for account {account_id} is closed")]
    DayClosed { account_id: String, date: NaiveDate },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Warmup schedule errors.
#[derive(Debug, thiserror::Error)]
pub enum WarmupError {
    #[error("Warmup schedule {id} not found")]
    NotFound { id: Uuid },

    #[error("No warmup schedule for account {account_id}")]
    AccountNotFound { account_id: String },

    #[error("Cannot {action} a schedule in state {state}")]
    InvalidTransition {
        state: WarmupStatus,
        action: &'static str,
    },

    #[error("Invalid warmup policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Dispatch pipeline errors. Per-recipient transport failures are not
/// errors at this level; they are reported as result events.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No send capacity left today for account {account_id} (limit {daily_limit})")]
    QuotaExhausted {
        account_id: String,
        daily_limit: u32,
        requested: usize,
    },

    #[error("Template {0} not found")]
    TemplateNotFound(String),

    #[error("Dispatch has no recipients")]
    EmptyRecipients,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Mail transport errors for a single send attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Provider rejected message: {0}")]
    Rejected(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}
