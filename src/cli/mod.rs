//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "enrichd",
    version,
    about = "Asset-metadata enrichment for security telemetry streams",
    long_about = "Enrichd reads newline-delimited telemetry events (Suricata EVE, Windows event \
                  logs, syslog, process-exec records), substitutes full network-asset metadata \
                  for each event's asset fields from a persistent registry, and writes the \
                  enriched stream back out."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/enrichd/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the enrichment loop over an event stream
    Run {
        /// Input NDJSON file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file for enriched NDJSON (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat every input line as this event kind
        /// (suricata, windows, syslog, process_exec);
        /// without it each line must be a {"kind": .., "event": ..} envelope
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show persisted state: registry size and cached asset dump
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
