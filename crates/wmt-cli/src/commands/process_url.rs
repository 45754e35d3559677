//! `wmt process-url`: direct processing of one URL.
//!
//! Bypasses the item store and selector but still goes through
//! claim/enrich/publish/finalize against the shared ledger, so direct runs
//! and the watcher cannot double-process the same link.

use std::io::Read;

use anyhow::{Context, Result};
use wmt_core::bookmarks::BookmarkItem;
use wmt_core::config::AppConfig;
use wmt_core::ledger::open_ledger;
use wmt_core::output::TriageOutputSink;
use wmt_core::pipeline::Pipeline;

use super::{enricher, lease_owner, lease_ttl, report};

pub fn run(
    cfg: &AppConfig,
    url: &str,
    title: Option<&str>,
    transcript_stdin: bool,
) -> Result<()> {
    let transcript = if transcript_stdin {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read transcript from stdin")?;
        Some(buffer)
    } else {
        None
    };

    let ledger =
        open_ledger(&cfg.ledger.path, cfg.ledger.backend).context("failed to open ledger")?;
    let enricher = enricher(cfg);
    let sink = TriageOutputSink::new(cfg);

    let pipeline = Pipeline {
        ledger: ledger.as_ref(),
        enricher: &enricher,
        sink: &sink,
        lease_ttl: lease_ttl(cfg),
        lease_owner: lease_owner(),
    };

    let item = BookmarkItem::manual(url, title.map(str::to_string));
    let outcome = pipeline
        .process_item(&item, transcript.as_deref())
        .context("pipeline failed")?;
    report(&outcome);
    Ok(())
}
