//! Scheduler settings.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use inf_types::Settings;

use crate::SchedulerError;

/// Parse an IANA timezone name such as `Europe/Berlin`.
pub fn parse_timezone(name: &str) -> Result<Tz, SchedulerError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::Timezone(name.to_string()))
}

/// How the scheduler itself behaves, independent of any job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Zone of jobs that don't name one
    #[serde(default = "utc")]
    pub timezone: String,

    /// Time running jobs get after cancellation before the engine stops
    #[serde(default = "five")]
    pub grace_secs: u64,
}

fn utc() -> String {
    "UTC".to_string()
}

fn five() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: utc(),
            grace_secs: five(),
        }
    }
}

impl SchedulerConfig {
    /// Follow the zone configured for compaction.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timezone: settings.compaction.timezone.clone(),
            ..Self::default()
        }
    }

    /// The zone of jobs that don't name one.
    pub fn zone(&self) -> Result<Tz, SchedulerError> {
        parse_timezone(&self.timezone)
    }

    /// Shutdown grace as a duration.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.zone().unwrap(), Tz::UTC);
        assert_eq!(config.grace(), Duration::from_secs(5));

        let parsed: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.timezone, "UTC");
        assert_eq!(parsed.grace_secs, 5);
    }

    #[test]
    fn test_follows_compaction_zone() {
        let mut settings = Settings::default();
        settings.compaction.timezone = "Asia/Tokyo".to_string();
        let config = SchedulerConfig::from_settings(&settings);
        assert_eq!(config.zone().unwrap(), Tz::Asia__Tokyo);
    }

    #[test]
    fn test_unknown_zone() {
        match parse_timezone("Atlantis/Central") {
            Err(SchedulerError::Timezone(name)) => assert_eq!(name, "Atlantis/Central"),
            other => panic!("Expected Timezone error, got {:?}", other),
        }
    }
}
