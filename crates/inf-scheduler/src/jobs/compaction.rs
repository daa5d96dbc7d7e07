//! Periodic index compaction.
//!
//! Folds the drafts of the index into a new baseline on a cron schedule.
//! Compaction is blocking file I/O, so it runs on the blocking pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use inf_ray::Engine;
use inf_types::CompactionSettings;

use crate::{JobSpec, SchedulerError, SchedulerService};

/// Name of the registered job.
pub const COMPACTION_JOB: &str = "index-compaction";

/// Schedule of the compaction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionJobConfig {
    /// Cron expression (default every 15 minutes)
    pub cron: String,

    /// Timezone (default "UTC")
    pub timezone: String,
}

impl Default for CompactionJobConfig {
    fn default() -> Self {
        Self::from(&CompactionSettings::default())
    }
}

impl From<&CompactionSettings> for CompactionJobConfig {
    fn from(settings: &CompactionSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            timezone: settings.timezone.clone(),
        }
    }
}

/// Register the compaction job; overlapping runs are skipped.
pub async fn create_compaction_job(
    scheduler: &SchedulerService,
    engine: Arc<Engine>,
    config: CompactionJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let spec = JobSpec::new(COMPACTION_JOB, config.cron).in_timezone(config.timezone);
    scheduler
        .schedule(spec, move || {
            let engine = engine.clone();
            async move {
                let summary = tokio::task::spawn_blocking(move || engine.compact())
                    .await
                    .map_err(|e| format!("compaction task panicked: {}", e))?
                    .map_err(|e| e.to_string())?;
                info!(
                    version = summary.version,
                    baselines = summary.reports.len(),
                    entries = summary.from_backlog(),
                    elapsed_ms = summary.elapsed_ms,
                    "Scheduled compaction done"
                );
                Ok(())
            }
        })
        .await
}
