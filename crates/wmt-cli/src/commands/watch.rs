//! `wmt watch`: poll the bookmarks file and process at most one item per
//! cycle.
//!
//! The watcher is scheduling only - each cycle is the same coordinator a
//! one-shot run uses, so a watcher and concurrent one-shot runs cooperate
//! through the ledger's claim atomicity rather than any coordination here.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use wmt_core::config::AppConfig;
use wmt_core::ledger::open_ledger;
use wmt_core::output::TriageOutputSink;
use wmt_core::pipeline::{Pipeline, RunOutcome};
use wmt_core::stable::StableFileTracker;

use super::{bookmark_source, enricher, lease_owner, lease_ttl, report};

pub fn run(cfg: &AppConfig, once: bool) -> Result<()> {
    let mut tracker = StableFileTracker::new(Duration::from_secs(cfg.processing.stable_seconds));
    let poll_interval = Duration::from_secs(cfg.processing.poll_interval_seconds.max(1));

    info!(path = %cfg.paths.bookmarks_file.display(), "watching bookmarks file");
    loop {
        match run_cycle(cfg, &mut tracker, once) {
            Ok(Some(outcome)) => {
                if once {
                    report(&outcome);
                    return Ok(());
                }
                if let RunOutcome::Done { output_file, .. } = &outcome {
                    info!(output = %output_file.display(), "processed bookmark");
                }
            }
            Ok(None) => {
                if once {
                    eprintln!("bookmarks file not ready (missing or still changing)");
                    return Ok(());
                }
            }
            Err(err) => {
                if once {
                    return Err(err);
                }
                // A transient failure (browser mid-write, ledger busy) must
                // not kill a long-lived watcher.
                warn!(error = %err, "watch cycle failed");
            }
        }
        thread::sleep(poll_interval);
    }
}

/// Runs one watch cycle. Returns `None` when the bookmarks file is absent
/// or not yet stable.
fn run_cycle(
    cfg: &AppConfig,
    tracker: &mut StableFileTracker,
    wait_for_stable: bool,
) -> Result<Option<RunOutcome>> {
    let bookmarks_path = cfg.paths.bookmarks_file.clone();
    if !bookmarks_path.exists() {
        warn!(path = %bookmarks_path.display(), "bookmarks file does not exist");
        return Ok(None);
    }

    let candidates = vec![bookmarks_path];
    let mut stable = tracker.observe(&candidates);
    if stable.is_empty() && wait_for_stable && cfg.processing.stable_seconds > 0 {
        // A --once run gets one stability window's worth of patience.
        let deadline =
            std::time::Instant::now() + Duration::from_secs(cfg.processing.stable_seconds);
        while stable.is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(500));
            stable = tracker.observe(&candidates);
        }
    }
    if stable.is_empty() {
        info!(
            window_secs = cfg.processing.stable_seconds,
            "bookmarks file not stable yet"
        );
        return Ok(None);
    }

    // Reopen the ledger each cycle so manual edits and concurrent one-off
    // runs take effect without restarting the watcher.
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
    Ok(Some(outcome))
}
