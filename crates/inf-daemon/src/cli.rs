//! CLI argument parsing for `inf`.
//!
//! CLI flags override the config file and `INF_*` environment variables.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Attribute index over a stream of messages
#[derive(Parser, Debug)]
#[command(name = "inf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/inf/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Root directory holding `index/` and `triples/`
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the records matching a query, newest first
    Query {
        /// Query expression, e.g. (and (equal $bout.number 7) (talks-with 'bob'))
        expr: String,

        /// Stop after this many records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Feed notices from a JSON file ("-" for stdin) into the index
    Post {
        /// File with one notice object or an array of them
        file: PathBuf,
    },

    /// Fold pending drafts into a new baseline
    Compact,

    /// Show index statistics
    Stats,

    /// Relation store commands
    Triples {
        #[command(subcommand)]
        command: TriplesCommands,
    },

    /// Run periodic compaction until interrupted
    Serve {
        /// Override the compaction cron expression
        #[arg(long)]
        cron: Option<String>,
    },
}

/// Triples subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum TriplesCommands {
    /// Add a value to a relation of a record
    Put {
        /// Record id
        id: u64,
        /// Relation name
        name: String,
        /// Value as JSON; bare words are taken as strings
        value: String,
    },

    /// Print the first value of a relation
    Get {
        /// Record id
        id: u64,
        /// Relation name
        name: String,
    },

    /// Print every value of a relation
    All {
        /// Record id
        id: u64,
        /// Relation name
        name: String,
    },

    /// Print the records having a value, newest first
    Reverse {
        /// Relation name
        name: String,
        /// Value as JSON; bare words are taken as strings
        value: String,

        /// Follow through a second relation keyed by numeric values
        #[arg(long)]
        join: Option<String>,
    },

    /// Remove every value of a relation of a record
    Clear {
        /// Record id
        id: u64,
        /// Relation name
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_query() {
        let cli = Cli::parse_from(["inf", "query", "(equal $author.name 'bob')", "-n", "5"]);
        match cli.command {
            Commands::Query { expr, limit } => {
                assert_eq!(expr, "(equal $author.name 'bob')");
                assert_eq!(limit, Some(5));
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "inf",
            "stats",
            "--data-dir",
            "/tmp/inf",
            "--log-level",
            "debug",
            "-c",
            "/etc/inf.toml",
        ]);
        assert!(matches!(cli.command, Commands::Stats));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/inf")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config.as_deref(), Some("/etc/inf.toml"));
    }

    #[test]
    fn test_cli_triples_reverse_join() {
        let cli = Cli::parse_from(["inf", "triples", "reverse", "bout", "42", "--join", "alias"]);
        match cli.command {
            Commands::Triples {
                command: TriplesCommands::Reverse { name, value, join },
            } => {
                assert_eq!(name, "bout");
                assert_eq!(value, "42");
                assert_eq!(join.as_deref(), Some("alias"));
            }
            _ => panic!("Expected Triples Reverse command"),
        }
    }

    #[test]
    fn test_cli_serve_cron() {
        let cli = Cli::parse_from(["inf", "serve", "--cron", "*/30 * * * * *"]);
        match cli.command {
            Commands::Serve { cron } => assert_eq!(cron.as_deref(), Some("*/30 * * * * *")),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["inf"]).is_err());
    }
}
