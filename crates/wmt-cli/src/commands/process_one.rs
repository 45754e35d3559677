//! `wmt process-one`: one pipeline cycle against the bookmark inbox.

use anyhow::{Context, Result};
use wmt_core::config::AppConfig;
use wmt_core::ledger::open_ledger;
use wmt_core::output::TriageOutputSink;
use wmt_core::pipeline::Pipeline;

use super::{bookmark_source, enricher, lease_owner, lease_ttl, report};

pub fn run(cfg: &AppConfig) -> Result<()> {
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

    let outcome = pipeline
        .run_once(&bookmark_source(cfg))
        .context("pipeline cycle failed")?;
    report(&outcome);
    Ok(())
}
