//! Mail warmup: ramps a sender's daily volume and gates every bulk send
//! through a shared per-day quota.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod ledger;
pub mod store;
pub mod warmup;
