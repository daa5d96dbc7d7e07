//! Lock heartbeat.
//!
//! Writes renew draft locks, but a quiet `serve` writes nothing. This job
//! touches every draft lock at a quarter of the lock TTL so contenders
//! never judge a live owner abandoned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use inf_ray::Engine;
use inf_types::LockSettings;

use crate::{JobSpec, SchedulerError, SchedulerService};

/// Name of the registered job.
pub const HEARTBEAT_JOB: &str = "lock-heartbeat";

/// Schedule of the heartbeat job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatJobConfig {
    /// Cron expression, derived from the lock TTL
    pub cron: String,
}

impl Default for HeartbeatJobConfig {
    fn default() -> Self {
        Self::from(&LockSettings::default())
    }
}

impl From<&LockSettings> for HeartbeatJobConfig {
    fn from(settings: &LockSettings) -> Self {
        Self {
            cron: heartbeat_cron(settings.ttl_secs),
        }
    }
}

/// Cron firing at least every `ttl_secs / 4` seconds.
pub fn heartbeat_cron(ttl_secs: u64) -> String {
    let period = (ttl_secs / 4).max(1);
    if period < 60 {
        format!("*/{} * * * * *", period)
    } else {
        format!("0 */{} * * * *", (period / 60).min(59))
    }
}

/// Register the heartbeat job.
pub async fn create_heartbeat_job(
    scheduler: &SchedulerService,
    engine: Arc<Engine>,
    config: HeartbeatJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let spec = JobSpec::new(HEARTBEAT_JOB, config.cron);
    scheduler
        .schedule(spec, move || {
            let engine = engine.clone();
            async move {
                let touched = tokio::task::spawn_blocking(move || engine.heartbeat())
                    .await
                    .map_err(|e| format!("heartbeat task panicked: {}", e))?
                    .map_err(|e| e.to_string())?;
                debug!(drafts = touched, "Lock heartbeat");
                Ok(())
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{validate_cron, SchedulerConfig};
    use inf_types::Settings;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_cron_follows_ttl() {
        assert_eq!(heartbeat_cron(600), "0 */2 * * * *");
        assert_eq!(heartbeat_cron(60), "*/15 * * * * *");
        assert_eq!(heartbeat_cron(2), "*/1 * * * * *");
        assert_eq!(heartbeat_cron(86_400), "0 */59 * * * *");
        for ttl in [1, 2, 60, 239, 240, 600, 86_400] {
            validate_cron(&heartbeat_cron(ttl)).unwrap();
        }
        assert_eq!(HeartbeatJobConfig::default().cron, "0 */2 * * * *");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_engine_keeps_its_lock() {
        let tmp = TempDir::new().unwrap();
        let mut settings = Settings::in_dir(tmp.path());
        settings.sync_writes = false;
        settings.lock.ttl_secs = 2;
        let engine = Arc::new(Engine::open(&settings).unwrap());

        let mut scheduler = SchedulerService::new(SchedulerConfig {
            grace_secs: 0,
            ..Default::default()
        })
        .await
        .unwrap();
        create_heartbeat_job(&scheduler, engine.clone(), HeartbeatJobConfig::from(&settings.lock))
            .await
            .unwrap();
        assert_eq!(scheduler.jobs()[0].name, HEARTBEAT_JOB);

        scheduler.start().await.unwrap();
        // Idle for longer than the TTL
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // A second engine on the same data dir must still be locked out
        let mut contender = settings.clone();
        contender.lock.wait_ms = 100;
        assert!(Engine::open(&contender).is_err());

        scheduler.shutdown().await.unwrap();
        assert_eq!(engine.heartbeat().unwrap(), 1);
    }
}
