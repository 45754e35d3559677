//! Subcommand implementations and shared wiring.

pub mod process_one;
pub mod process_url;
pub mod status;
pub mod watch;

use chrono::{Duration, Utc};
use wmt_core::bookmarks::BraveBookmarkSource;
use wmt_core::config::AppConfig;
use wmt_core::enrich::CodexEnricher;
use wmt_core::pipeline::RunOutcome;

/// Opaque token identifying this runner instance in ledger entries.
/// Diagnostic only; correctness comes from claim atomicity.
pub(crate) fn lease_owner() -> String {
    format!("wmt-{}-{}", std::process::id(), Utc::now().timestamp())
}

pub(crate) fn lease_ttl(cfg: &AppConfig) -> Duration {
    // Cap at a year; chrono durations panic far out of range.
    #[allow(clippy::cast_possible_wrap)]
    let secs = cfg.processing.lease_ttl_seconds.min(365 * 24 * 3600) as i64;
    Duration::seconds(secs)
}

pub(crate) fn bookmark_source(cfg: &AppConfig) -> BraveBookmarkSource {
    BraveBookmarkSource {
        path: cfg.paths.bookmarks_file.clone(),
        root_name: cfg.bookmarks.root_name.clone(),
        inbox_folder: cfg.bookmarks.inbox_folder_name.clone(),
    }
}

pub(crate) fn enricher(cfg: &AppConfig) -> CodexEnricher {
    CodexEnricher {
        codex: cfg.codex.clone(),
        fetch: cfg.fetch,
        prompt_template: cfg.paths.triage_prompt_file.clone(),
    }
}

/// Prints the invocation outcome for a human. The output file path goes to
/// stdout so it can be piped; everything else goes to stderr.
pub(crate) fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::NoWork => eprintln!("nothing to do"),
        RunOutcome::Skipped { url, reason } => eprintln!("skipped {url}: {reason}"),
        RunOutcome::Done { output_file, .. } => println!("{}", output_file.display()),
        RunOutcome::Failed { url, reason, .. } => {
            eprintln!("recorded failure for {url}: {reason}");
        }
    }
}
