//! Periodic background work for the inf index.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware schedules, an overlap
//! guard, and graceful shutdown through a `CancellationToken`.
//!
//! # Example
//!
//! ```ignore
//! use inf_scheduler::{create_compaction_job, CompactionJobConfig, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::from_settings(&settings)).await?;
//! create_compaction_job(&scheduler, engine, CompactionJobConfig::from(&settings.compaction)).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
pub mod jobs;
mod overlap;
mod scheduler;

pub use config::{parse_timezone, SchedulerConfig};
pub use error::SchedulerError;
pub use jobs::{
    create_compaction_job, create_heartbeat_job, heartbeat_cron, CompactionJobConfig,
    HeartbeatJobConfig, COMPACTION_JOB, HEARTBEAT_JOB,
};
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use scheduler::{validate_cron, JobSpec, ScheduledJob, SchedulerService};
