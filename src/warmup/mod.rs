//! Sender-reputation warmup: ramp schedules, the background ticker, and
//! warmup traffic.

pub mod model;
pub mod scheduler;
pub mod traffic;

pub use model::{
    LogKind, LogStatus, RampPolicy, TickOutcome, WarmupLogEntry, WarmupPolicy, WarmupSchedule,
    WarmupStatus,
};
pub use scheduler::{SendLimit, WarmupScheduler, spawn_tick_task};
pub use traffic::{WarmupTraffic, spawn_traffic_task};
