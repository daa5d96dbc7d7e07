//! Predefined jobs.

pub mod compaction;
pub mod heartbeat;

pub use compaction::{create_compaction_job, CompactionJobConfig, COMPACTION_JOB};
pub use heartbeat::{create_heartbeat_job, heartbeat_cron, HeartbeatJobConfig, HEARTBEAT_JOB};
