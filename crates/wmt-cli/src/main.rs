//! wmt - worth-my-time bookmark triage CLI.
//!
//! Thin command surface over `wmt-core`: one-shot processing, a polling
//! watcher, direct URL processing, and ledger status.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use wmt_core::config::AppConfig;

mod commands;

/// wmt - bookmark triage pipeline
#[derive(Parser, Debug)]
#[command(name = "wmt")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (default: $WMT_CONFIG or ~/.config/wmt/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process one unprocessed Inbox bookmark
    ProcessOne,

    /// Process a URL directly (bypasses the bookmark inbox, shares the ledger)
    ProcessUrl {
        /// URL to analyse
        url: String,

        /// Optional title hint (used for the output filename)
        #[arg(long)]
        title: Option<String>,

        /// Read a transcript from stdin and use it as the primary source
        /// (skips automatic transcript retrieval)
        #[arg(long)]
        transcript_stdin: bool,
    },

    /// Watch the bookmarks file and process new items on an interval
    Watch {
        /// Process one stable update and exit
        #[arg(long)]
        once: bool,
    },

    /// Show ledger counts
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cfg = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::ProcessOne => commands::process_one::run(&cfg),
        Commands::ProcessUrl {
            url,
            title,
            transcript_stdin,
        } => commands::process_url::run(&cfg, &url, title.as_deref(), transcript_stdin),
        Commands::Watch { once } => commands::watch::run(&cfg, once),
        Commands::Status => commands::status::run(&cfg),
    }
}
