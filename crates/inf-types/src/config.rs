//! Configuration loading.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/inf/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::InfError;

/// Which source wins when a pending backlog entry and an existing catalog
/// entry carry the same value during compaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    /// The backlog entry replaces the catalog entry (it is strictly newer)
    #[default]
    Backlog,
    /// The catalog entry is kept and the backlog entry is dropped
    Catalog,
}

/// Draft directory lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// A lock whose stamp is older than this is considered abandoned.
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,

    /// How long to wait for a contended lock before giving up.
    #[serde(default = "default_lock_wait")]
    pub wait_ms: u64,

    /// Polling interval while waiting.
    #[serde(default = "default_lock_poll")]
    pub poll_ms: u64,
}

fn default_lock_ttl() -> u64 {
    600
}

fn default_lock_wait() -> u64 {
    5_000
}

fn default_lock_poll() -> u64 {
    50
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl(),
            wait_ms: default_lock_wait(),
            poll_ms: default_lock_poll(),
        }
    }
}

impl LockSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("lock.ttl_secs must be > 0".to_string());
        }
        if self.poll_ms == 0 {
            return Err("lock.poll_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Compaction ("baselining") settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Cron expression of the periodic trigger (6 fields, seconds first)
    #[serde(default = "default_compaction_cron")]
    pub cron: String,

    /// Timezone of the cron expression
    #[serde(default = "default_compaction_timezone")]
    pub timezone: String,

    /// Tie-break between backlog and catalog entries of equal value
    #[serde(default)]
    pub precedence: Precedence,
}

fn default_compaction_cron() -> String {
    "0 */15 * * * *".to_string()
}

fn default_compaction_timezone() -> String {
    "UTC".to_string()
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            cron: default_compaction_cron(),
            timezone: default_compaction_timezone(),
            precedence: Precedence::default(),
        }
    }
}

/// Triples store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriplesSettings {
    /// Open result cursors are closed after this many seconds.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Rows fetched per page by lazy result cursors.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_grace() -> u64 {
    60
}

fn default_page_size() -> usize {
    64
}

impl Default for TriplesSettings {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
            page_size: default_page_size(),
        }
    }
}

impl TriplesSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("triples.page_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory of the attribute index (baselines and drafts)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory of the triples store
    #[serde(default = "default_triples_dir")]
    pub triples_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Fsync every backlog append
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,

    /// Unmodified posting lists kept in memory, per attribute
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Draft lock settings
    #[serde(default)]
    pub lock: LockSettings,

    /// Compaction settings
    #[serde(default)]
    pub compaction: CompactionSettings,

    /// Triples settings
    #[serde(default)]
    pub triples: TriplesSettings,
}

fn default_data_dir() -> String {
    ProjectDirs::from("", "", "inf")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
        .to_string_lossy()
        .to_string()
}

fn default_triples_dir() -> String {
    ProjectDirs::from("", "", "inf")
        .map(|p| p.data_local_dir().join("triples"))
        .unwrap_or_else(|| PathBuf::from("./triples"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sync_writes() -> bool {
    true
}

fn default_cache_size() -> usize {
    4096
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            triples_dir: default_triples_dir(),
            log_level: default_log_level(),
            sync_writes: default_sync_writes(),
            cache_size: default_cache_size(),
            lock: LockSettings::default(),
            compaction: CompactionSettings::default(),
            triples: TriplesSettings::default(),
        }
    }
}

impl Settings {
    /// Settings rooted in the given directory, everything else default.
    ///
    /// Used by tests and embedders that manage their own layout.
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data_dir: root.join("index").to_string_lossy().to_string(),
            triples_dir: root.join("triples").to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/inf/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INF_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, InfError> {
        let config_dir = ProjectDirs::from("", "", "inf")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("data_dir", default_data_dir())
            .map_err(|e| InfError::Config(e.to_string()))?
            .set_default("triples_dir", default_triples_dir())
            .map_err(|e| InfError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| InfError::Config(e.to_string()))?
            .set_default("sync_writes", default_sync_writes())
            .map_err(|e| InfError::Config(e.to_string()))?
            .set_default("cache_size", default_cache_size() as u64)
            .map_err(|e| InfError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: INF_DATA_DIR, INF_LOCK__TTL_SECS, INF_COMPACTION__CRON, etc.
        builder = builder.add_source(
            Environment::with_prefix("INF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| InfError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| InfError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate all nested sections.
    pub fn validate(&self) -> Result<(), InfError> {
        if self.cache_size == 0 {
            return Err(InfError::Config("cache_size must be > 0".to_string()));
        }
        self.lock.validate().map_err(InfError::Config)?;
        self.triples.validate().map_err(InfError::Config)?;
        Ok(())
    }

    /// Expand ~ in data_dir
    pub fn expanded_data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Expand ~ in triples_dir
    pub fn expanded_triples_dir(&self) -> PathBuf {
        expand_home(&self.triples_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
