//! Library side of the `inf` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (query, post, compact, stats, triples, serve)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, TriplesCommands};
pub use commands::{
    compact, handle_triples, init_logging, load_settings, parse_notices, post_notices, run,
    run_query, serve, stats, PostSummary,
};
