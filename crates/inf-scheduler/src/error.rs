//! Scheduler failures.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// What went wrong while scheduling background work.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron engine refused an operation
    #[error("Cron engine: {0}")]
    Engine(String),

    /// Not a 6-field cron expression
    #[error("Bad cron expression {0}")]
    Cron(String),

    /// Not an IANA timezone name
    #[error("Unknown timezone {0:?}")]
    Timezone(String),

    /// `start` called twice
    #[error("Scheduler already started")]
    AlreadyStarted,

    /// `shutdown` without a prior `start`
    #[error("Scheduler not started")]
    NotStarted,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::Cron("'x': too short".to_string());
        assert_eq!(err.to_string(), "Bad cron expression 'x': too short");

        let err = SchedulerError::Timezone("Mars/Olympus".to_string());
        assert_eq!(err.to_string(), "Unknown timezone \"Mars/Olympus\"");

        assert_eq!(SchedulerError::AlreadyStarted.to_string(), "Scheduler already started");
    }
}
