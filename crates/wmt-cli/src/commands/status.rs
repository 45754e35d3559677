//! `wmt status`: print ledger counts.

use anyhow::{Context, Result};
use wmt_core::config::AppConfig;
use wmt_core::ledger::open_ledger;

pub fn run(cfg: &AppConfig) -> Result<()> {
    let ledger =
        open_ledger(&cfg.ledger.path, cfg.ledger.backend).context("failed to open ledger")?;
    let counts = ledger.counts().context("failed to read ledger counts")?;
    println!(
        "done={} failed={} in_progress={}",
        counts.done, counts.failed, counts.in_progress
    );
    Ok(())
}
