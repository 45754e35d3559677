//! Selector: picks the next claimable item without claiming it.
//!
//! Claiming is a separate, later step owned by the pipeline so that claim
//! timing and enrich/publish timing can be measured and failures
//! attributed precisely. The selector may therefore lose a race it
//! appeared to win; the pipeline handles that by re-selecting.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::bookmarks::{BookmarkItem, ItemSource, SourceError};
use crate::lease;
use crate::ledger::{LedgerError, LedgerStore};
use crate::urls;

/// Errors from candidate selection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SelectorError {
    /// The item source could not be listed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The ledger could not be consulted.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Returns the first claimable candidate, or `None` when there is nothing
/// to do (the normal idle outcome for a polling caller).
///
/// Non-http(s) URLs are skipped before any ledger interaction.
///
/// # Errors
///
/// Returns [`SelectorError`] when the source or ledger fails.
pub fn pick_next(
    source: &dyn ItemSource,
    ledger: &dyn LedgerStore,
    now: DateTime<Utc>,
    lease_ttl: Duration,
) -> Result<Option<BookmarkItem>, SelectorError> {
    for item in source.list_candidates()? {
        let normalized = urls::normalize_url(&item.url);
        if !urls::is_probably_http_url(&normalized) {
            debug!(url = %item.url, "skipping non-http bookmark");
            continue;
        }
        let item_id = item.identity_sha256(&normalized);
        let entry = ledger.get(&item_id)?;
        if lease::is_claimable(entry.as_ref(), now, lease_ttl) {
            return Ok(Some(item));
        }
    }
    Ok(None)
}
