//! Cron-driven job runner.
//!
//! Jobs are declared with a [`JobSpec`] and fire on timezone-aware
//! schedules. Shutdown cancels a shared token first, so a job that is
//! about to fire sees it and stays quiet, then stops the cron engine.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono_tz::Tz;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::parse_timezone;
use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::{SchedulerConfig, SchedulerError};

/// Check a 6-field cron expression (sec min hour day month weekday).
///
/// ```
/// use inf_scheduler::validate_cron;
///
/// assert!(validate_cron("0 */15 * * * *").is_ok());
/// assert!(validate_cron("every now and then").is_err());
/// ```
pub fn validate_cron(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_, _| Box::pin(async {}))
        .map(drop)
        .map_err(|e| SchedulerError::Cron(format!("'{}': {}", expr, e)))
}

/// Declaration of a recurring job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Name used in logs and listings
    pub name: String,
    /// Cron expression
    pub cron: String,
    /// IANA zone; the scheduler's own when absent
    pub timezone: Option<String>,
    /// What to do when a run is still going at the next tick
    pub overlap: OverlapPolicy,
}

impl JobSpec {
    /// A job in the scheduler's zone that skips overlapping runs.
    pub fn new(name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            timezone: None,
            overlap: OverlapPolicy::default(),
        }
    }

    /// Run in the given zone.
    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Change the overlap policy.
    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }
}

/// A registered job, as listed by [`SchedulerService::jobs`].
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    /// Job name
    pub name: String,
    /// Id assigned by the cron engine
    pub id: Uuid,
    /// Cron expression
    pub cron: String,
    /// Resolved zone name
    pub timezone: String,
}

/// Owns the cron engine and the jobs registered on it.
pub struct SchedulerService {
    engine: JobScheduler,
    config: SchedulerConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl SchedulerService {
    /// A stopped scheduler; fails on a bad default zone.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.zone()?;
        Ok(Self {
            engine: JobScheduler::new().await?,
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            jobs: Mutex::new(Vec::new()),
        })
    }

    /// Begin firing jobs.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.engine.start().await?;
        info!(jobs = self.jobs().len(), "Scheduler started");
        Ok(())
    }

    /// Cancel, give running jobs the configured grace, then stop the engine.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotStarted);
        }
        self.cancel.cancel();
        debug!(grace_secs = self.config.grace_secs, "Waiting for running jobs");
        tokio::time::sleep(self.config.grace()).await;

        if let Err(e) = self.engine.shutdown().await {
            warn!(error = %e, "Cron engine did not stop cleanly");
        }
        self.started.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
        Ok(())
    }

    /// Token cancelled when shutdown begins.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether jobs are firing.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Jobs registered so far, in registration order.
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().map(|j| j.clone()).unwrap_or_default()
    }

    fn zone_of(&self, spec: &JobSpec) -> Result<Tz, SchedulerError> {
        match spec.timezone.as_deref() {
            Some(name) => parse_timezone(name),
            None => self.config.zone(),
        }
    }

    /// Register a fallible job.
    ///
    /// A failed run is logged and the job keeps its schedule. Runs that
    /// fire after shutdown began are skipped.
    pub async fn schedule<F, Fut>(&self, spec: JobSpec, run: F) -> Result<Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let tz = self.zone_of(&spec)?;
        validate_cron(&spec.cron)?;

        let guard = Arc::new(OverlapGuard::new(spec.overlap));
        let name: Arc<str> = Arc::from(spec.name.as_str());
        let cancel = self.cancel.clone();
        let job = Job::new_async_tz(spec.cron.as_str(), tz, move |_, _| {
            let (guard, name, cancel, run) = (guard.clone(), name.clone(), cancel.clone(), run.clone());
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return;
                }
                let Some(_permit) = guard.try_acquire() else {
                    info!(job = %name, "Previous run still active, skipping");
                    return;
                };
                let began = Instant::now();
                match run().await {
                    Ok(()) => debug!(job = %name, took_ms = began.elapsed().as_millis() as u64, "Job ran"),
                    Err(e) => error!(job = %name, error = %e, "Job failed"),
                }
            })
        })
        .map_err(|e| SchedulerError::Cron(format!("'{}': {}", spec.cron, e)))?;

        let id = self.engine.add(job).await?;
        info!(job = %spec.name, %id, cron = %spec.cron, timezone = %tz.name(), "Job scheduled");
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(ScheduledJob {
                name: spec.name,
                id,
                cron: spec.cron,
                timezone: tz.name().to_string(),
            });
        }
        Ok(id)
    }
}
