//! Command implementations for `inf`.
//!
//! Every command loads settings (defaults, config file, env, CLI flags),
//! opens what it needs, does one thing and returns printable results.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use inf_ray::Engine;
use inf_scheduler::{
    create_compaction_job, create_heartbeat_job, CompactionJobConfig, HeartbeatJobConfig,
    SchedulerConfig, SchedulerService,
};
use inf_triples::{Triples, TriplesConfig};
use inf_types::{Notice, RecordId, Settings};

use crate::cli::{Cli, Commands, TriplesCommands};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level: Option<&str>,
    data_dir: Option<&Path>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(root) = data_dir {
        let rooted = Settings::in_dir(root);
        settings.data_dir = rooted.data_dir;
        settings.triples_dir = rooted.triples_dir;
    }
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level.
///
/// Logs go to stderr, stdout carries command output.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn open_engine(settings: &Settings) -> Result<Engine> {
    Engine::open(settings).with_context(|| {
        format!("Failed to open index at {}", settings.expanded_data_dir().display())
    })
}

fn open_triples(settings: &Settings) -> Result<Triples> {
    let dir = settings.expanded_triples_dir();
    fs::create_dir_all(&dir).context("Failed to create triples directory")?;
    Triples::open(&dir, TriplesConfig::from(&settings.triples))
        .with_context(|| format!("Failed to open triples at {}", dir.display()))
}

/// Records matching `expr`, newest first, at most `limit` of them.
pub fn run_query(settings: &Settings, expr: &str, limit: Option<usize>) -> Result<Vec<RecordId>> {
    let engine = open_engine(settings)?;
    let matches = engine
        .matches(expr)
        .with_context(|| format!("Invalid query: {}", expr))?;
    let records = matches
        .take(limit.unwrap_or(usize::MAX))
        .collect::<Result<Vec<_>, _>>()
        .context("Query failed")?;
    Ok(records)
}

/// Outcome of feeding notices into the index.
#[derive(Debug, Default)]
pub struct PostSummary {
    /// Notices read
    pub notices: usize,
    /// Handlers that succeeded
    pub handled: usize,
    /// Handler failures
    pub errors: Vec<String>,
}

/// Parse one notice object or an array of them.
pub fn parse_notices(json: &str) -> Result<Vec<Notice>> {
    let value: Value = serde_json::from_str(json).context("Notice file is not valid JSON")?;
    let notices = match value {
        Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|n| vec![n]),
    }
    .context("Malformed notice")?;
    Ok(notices)
}

/// Deliver every notice in `file` ("-" for stdin) to the functors.
pub fn post_notices(settings: &Settings, file: &Path) -> Result<PostSummary> {
    let json = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read notices from stdin")?;
        buf
    } else {
        fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    let notices = parse_notices(&json)?;

    let engine = open_engine(settings)?;
    let mut summary = PostSummary::default();
    for notice in &notices {
        let report = engine
            .see(notice)
            .with_context(|| format!("Failed to apply {} notice", notice.kind()))?;
        summary.notices += 1;
        summary.handled += report.handled;
        summary.errors.extend(report.errors);
    }
    info!(
        notices = summary.notices,
        handled = summary.handled,
        errors = summary.errors.len(),
        "Notices posted"
    );
    Ok(summary)
}

/// Run one compaction and return its summary as JSON.
pub fn compact(settings: &Settings) -> Result<Value> {
    let engine = open_engine(settings)?;
    let summary = engine.compact().context("Compaction failed")?;
    Ok(serde_json::to_value(&summary)?)
}

/// Index statistics as JSON.
pub fn stats(settings: &Settings) -> Result<Value> {
    let engine = open_engine(settings)?;
    let stats = engine.stats().context("Failed to read statistics")?;
    Ok(serde_json::to_value(&stats)?)
}

/// Take a CLI value as JSON, or as a plain string when it is not JSON.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Run a triples command and return its output lines.
pub fn handle_triples(settings: &Settings, command: TriplesCommands) -> Result<Vec<String>> {
    let triples = open_triples(settings)?;
    let lines = match command {
        TriplesCommands::Put { id, name, value } => {
            let added = triples.put(id, &name, &parse_value(&value))?;
            vec![if added { "added" } else { "exists" }.to_string()]
        }
        TriplesCommands::Get { id, name } => {
            let value: Value = triples.get(id, &name)?;
            vec![value.to_string()]
        }
        TriplesCommands::All { id, name } => triples
            .all::<Value>(id, &name)?
            .map(|v| v.map(|v| v.to_string()))
            .collect::<Result<Vec<_>, _>>()?,
        TriplesCommands::Reverse { name, value, join } => {
            let value = parse_value(&value);
            let rows = match join {
                Some(join) => triples.reverse_join(&name, &join, &value)?,
                None => triples.reverse(&name, &value)?,
            };
            rows.map(|id| id.map(|id| id.to_string()))
                .collect::<Result<Vec<_>, _>>()?
        }
        TriplesCommands::Clear { id, name } => {
            vec![triples.clear(id, &name)?.to_string()]
        }
    };
    triples.close().context("Failed to close triples")?;
    Ok(lines)
}

/// Compact on schedule until Ctrl+C or SIGTERM.
pub async fn serve(settings: &Settings, cron_override: Option<&str>) -> Result<()> {
    let engine = Arc::new(open_engine(settings)?);

    let mut job = CompactionJobConfig::from(&settings.compaction);
    if let Some(cron) = cron_override {
        job.cron = cron.to_string();
    }

    let mut scheduler = SchedulerService::new(SchedulerConfig::from_settings(settings))
        .await
        .context("Failed to create scheduler")?;
    create_compaction_job(&scheduler, engine.clone(), job)
        .await
        .context("Failed to register compaction job")?;
    create_heartbeat_job(&scheduler, engine.clone(), HeartbeatJobConfig::from(&settings.lock))
        .await
        .context("Failed to register lock heartbeat")?;
    scheduler.start().await.context("Failed to start scheduler")?;
    info!(path = %settings.expanded_data_dir().display(), "Serving");

    shutdown_signal().await;

    scheduler.shutdown().await.context("Scheduler shutdown failed")?;
    let flushed = engine.flush().context("Final flush failed")?;
    info!(flushed, "Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(
        cli.config.as_deref(),
        cli.log_level.as_deref(),
        cli.data_dir.as_deref(),
    )?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Query { expr, limit } => {
            for record in run_query(&settings, &expr, limit)? {
                println!("{}", record);
            }
        }
        Commands::Post { file } => {
            let summary = post_notices(&settings, &file)?;
            println!(
                "{} notices, {} handlers succeeded, {} failed",
                summary.notices,
                summary.handled,
                summary.errors.len()
            );
            if !summary.errors.is_empty() {
                for error in &summary.errors {
                    eprintln!("  {}", error);
                }
                anyhow::bail!("{} handlers failed", summary.errors.len());
            }
        }
        Commands::Compact => {
            println!("{}", serde_json::to_string_pretty(&compact(&settings)?)?);
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&stats(&settings)?)?);
        }
        Commands::Triples { command } => {
            for line in handle_triples(&settings, command)? {
                println!("{}", line);
            }
        }
        Commands::Serve { cron } => {
            serve(&settings, cron.as_deref()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(tmp: &TempDir) -> Settings {
        let mut settings = load_settings(None, Some("warn"), Some(tmp.path())).unwrap();
        settings.sync_writes = false;
        settings
    }

    const NOTICES: &str = r#"[
        {
            "kind": "message_posted",
            "message": {"number": 1, "bout": 7, "author": "alice", "text": "hi", "date": 1700000000000},
            "bout": {"number": 7, "title": "lunch", "participants": ["bob"]}
        },
        {
            "kind": "message_posted",
            "message": {"number": 2, "bout": 7, "author": "bob", "text": "yo", "date": 1700000001000},
            "bout": {"number": 7, "title": "lunch", "participants": ["alice"]}
        }
    ]"#;

    #[test]
    fn test_load_settings_overrides() {
        let tmp = TempDir::new().unwrap();
        let settings = load_settings(None, Some("debug"), Some(tmp.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.expanded_data_dir(), tmp.path().join("index"));
        assert_eq!(settings.expanded_triples_dir(), tmp.path().join("triples"));
    }

    #[test]
    fn test_parse_notices() {
        assert_eq!(parse_notices(NOTICES).unwrap().len(), 2);

        let single = r#"{"kind": "bout_renamed", "bout": {"number": 7, "title": "dinner"}}"#;
        let notices = parse_notices(single).unwrap();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], Notice::BoutRenamed { .. }));

        assert!(parse_notices("{not json").is_err());
        assert!(parse_notices(r#"{"kind": "unheard_of"}"#).is_err());
    }

    #[test]
    fn test_post_query_compact_stats() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(&tmp);
        let file = tmp.path().join("notices.json");
        fs::write(&file, NOTICES).unwrap();

        let summary = post_notices(&settings, &file).unwrap();
        assert_eq!(summary.notices, 2);
        assert!(summary.errors.is_empty());

        assert_eq!(run_query(&settings, "(talks-with 'alice')", None).unwrap(), vec![2, 1]);
        assert_eq!(run_query(&settings, "(talks-with 'alice')", Some(1)).unwrap(), vec![2]);
        assert!(run_query(&settings, "(bogus)", None).is_err());

        let summary = compact(&settings).unwrap();
        assert!(summary["version"].as_u64().unwrap() > 0);

        let stats = stats(&settings).unwrap();
        assert_eq!(stats["version"], summary["version"]);
        assert_eq!(run_query(&settings, "(equal $author.name 'bob')", None).unwrap(), vec![2]);
    }

    #[test]
    fn test_post_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = post_notices(&settings(&tmp), &tmp.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_triples_commands() {
        let tmp = TempDir::new().unwrap();
        let settings = settings(&tmp);
        let run = |command| handle_triples(&settings, command).unwrap();

        let put = |id, value: &str| TriplesCommands::Put {
            id,
            name: "color".to_string(),
            value: value.to_string(),
        };
        assert_eq!(run(put(1, "red")), vec!["added"]);
        assert_eq!(run(put(1, "red")), vec!["exists"]);
        assert_eq!(run(put(2, "\"red\"")), vec!["added"]);

        let get = run(TriplesCommands::Get {
            id: 1,
            name: "color".to_string(),
        });
        assert_eq!(get, vec!["\"red\""]);

        let reverse = run(TriplesCommands::Reverse {
            name: "color".to_string(),
            value: "red".to_string(),
            join: None,
        });
        assert_eq!(reverse, vec!["2", "1"]);

        let cleared = run(TriplesCommands::Clear {
            id: 1,
            name: "color".to_string(),
        });
        assert_eq!(cleared, vec!["1"]);
        let all = run(TriplesCommands::All {
            id: 1,
            name: "color".to_string(),
        });
        assert!(all.is_empty());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), Value::from(42u64));
        assert_eq!(parse_value("hello"), Value::String("hello".to_string()));
        assert_eq!(parse_value("\"quoted\""), Value::String("quoted".to_string()));
    }
}
