//! inf: attribute index over a stream of messages.
//!
//! # Usage
//!
//! ```bash
//! inf query "(and (equal \$bout.number 7) (talks-with 'bob'))"
//! inf post notices.json
//! inf compact
//! inf stats
//! inf triples put 1 color red
//! inf serve [--cron EXPR]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/inf/config.toml)
//! 3. Environment variables (INF_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use inf_daemon::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}
