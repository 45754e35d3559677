//! Pipeline coordinator: claim -> enrich -> publish -> finalize, once.
//!
//! One invocation processes at most one item. Losing a claim race is not
//! an error - the coordinator loops back to selection so concurrent
//! runners cooperate instead of failing. Collaborator failures (enrichment
//! or the sink) are absorbed into a terminal `failed` ledger entry with
//! the reason as its note; the invocation itself still succeeds, because
//! "this item could not be processed" is a valid, durably recorded
//! outcome. Only source and ledger storage errors are fatal.
//!
//! If the process dies between claim and finalize, the entry stays
//! `in_progress` until the lease TTL elapses, at which point any runner's
//! next selection reclaims it. That expiry is the sole recovery mechanism.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::bookmarks::{BookmarkItem, ItemSource, SourceError};
use crate::enrich::EnrichError;
use crate::ledger::{ClaimOutcome, LedgerError, LedgerStore, Outcome};
use crate::selector::{self, SelectorError};
use crate::urls;

/// Input to the enrichment collaborator.
#[derive(Debug, Clone)]
pub struct EnrichRequest<'a> {
    /// Normalized item URL.
    pub url: &'a str,
    /// Title hint from the bookmark, if any.
    pub title_hint: Option<&'a str>,
    /// Caller-supplied transcript; when present it is the primary source
    /// and automatic transcript retrieval is skipped.
    pub transcript: Option<&'a str>,
}

/// Output of the enrichment collaborator. Opaque to the coordinator.
#[derive(Debug, Clone)]
pub struct EnrichedDocument {
    /// The generated analysis document.
    pub markdown: String,
    /// Title extracted during enrichment, used as a filename fallback when
    /// the bookmark has none.
    pub title: Option<String>,
}

/// External analysis collaborator.
pub trait Enricher {
    /// Produces an analysis document for the item.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError`] when no document could be produced; the
    /// coordinator records it as a `failed` ledger outcome.
    fn enrich(&self, request: &EnrichRequest<'_>) -> Result<EnrichedDocument, EnrichError>;
}

/// A stored document, reported back to the caller.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    /// Path of the locally written analysis file.
    pub path: PathBuf,
}

/// Output sink errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The local output file could not be written.
    #[error("failed to write output file {}: {detail}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },

    /// A remote publisher rejected the document.
    #[error("publish failed ({publisher}): {detail}")]
    Publish {
        /// Publisher name.
        publisher: &'static str,
        /// Failure detail.
        detail: String,
    },
}

/// Durable output sink. Local storage first; remote publishers only after
/// the local write succeeds.
pub trait ContentSink {
    /// Stores the generated content for an item.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the document could not be durably
    /// stored or published; the coordinator records it as a `failed`
    /// ledger outcome so a generated-but-unpublished result is never left
    /// silently dangling.
    fn store(&self, title: &str, item_id: &str, markdown: &str)
        -> Result<StoredDocument, SinkError>;
}

/// What one pipeline invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No claimable candidate existed. The normal idle outcome.
    NoWork,
    /// The item was skipped before claiming (already owned, already
    /// processed, or not processable).
    Skipped {
        /// The item URL.
        url: String,
        /// Why it was skipped.
        reason: String,
    },
    /// The item was processed and its analysis stored.
    Done {
        /// Ledger key of the item.
        item_id: String,
        /// Normalized item URL.
        url: String,
        /// Where the analysis was written.
        output_file: PathBuf,
    },
    /// Processing failed; the failure is recorded in the ledger.
    Failed {
        /// Ledger key of the item.
        item_id: String,
        /// Normalized item URL.
        url: String,
        /// The recorded failure reason.
        reason: String,
    },
}

/// Fatal pipeline errors. Collaborator failures are not here - they are
/// data, recorded in the ledger.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The item source could not be listed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Ledger storage failed (or lease discipline was violated).
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<SelectorError> for PipelineError {
    fn from(err: SelectorError) -> Self {
        match err {
            SelectorError::Source(source) => Self::Source(source),
            SelectorError::Ledger(ledger) => Self::Ledger(ledger),
        }
    }
}

enum ClaimedRun {
    Outcome(RunOutcome),
    /// Another runner claimed the item between selection and claiming, or
    /// it was already terminal.
    LostRace,
}

/// The pipeline coordinator. Collaborators are injected so scenario tests
/// can substitute them.
pub struct Pipeline<'a> {
    /// Shared processing ledger.
    pub ledger: &'a dyn LedgerStore,
    /// External analysis collaborator.
    pub enricher: &'a dyn Enricher,
    /// Output sink.
    pub sink: &'a dyn ContentSink,
    /// Lease TTL for claims.
    pub lease_ttl: Duration,
    /// Opaque token identifying this runner instance.
    pub lease_owner: String,
}

impl Pipeline<'_> {
    /// Runs one cycle: select, claim, and process at most one item from
    /// the source.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on source or ledger failure.
    pub fn run_once(&self, source: &dyn ItemSource) -> Result<RunOutcome, PipelineError> {
        loop {
            let Some(item) = selector::pick_next(source, self.ledger, Utc::now(), self.lease_ttl)?
            else {
                info!("no claimable bookmark; nothing to do");
                return Ok(RunOutcome::NoWork);
            };
            match self.claim_and_process(&item, None)? {
                ClaimedRun::Outcome(outcome) => return Ok(outcome),
                // Lost the claim race; the entry now blocks re-selection
                // of the same item, so re-scan for the next candidate.
                ClaimedRun::LostRace => continue,
            }
        }
    }

    /// Processes one externally supplied item, bypassing selection but
    /// going through the same claim/enrich/publish/finalize path.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on ledger failure.
    pub fn process_item(
        &self,
        item: &BookmarkItem,
        transcript: Option<&str>,
    ) -> Result<RunOutcome, PipelineError> {
        if !urls::is_probably_http_url(&item.url) {
            warn!(url = %item.url, "not an http(s) URL");
            return Ok(RunOutcome::Skipped {
                url: item.url.clone(),
                reason: "not an http(s) URL".to_string(),
            });
        }
        match self.claim_and_process(item, transcript)? {
            ClaimedRun::Outcome(outcome) => Ok(outcome),
            ClaimedRun::LostRace => Ok(RunOutcome::Skipped {
                url: item.url.clone(),
                reason: "already processed or in progress elsewhere".to_string(),
            }),
        }
    }

    fn claim_and_process(
        &self,
        item: &BookmarkItem,
        transcript: Option<&str>,
    ) -> Result<ClaimedRun, PipelineError> {
        let normalized = urls::normalize_url(&item.url);
        let item_id = item.identity_sha256(&normalized);

        match self
            .ledger
            .try_claim(&item_id, &self.lease_owner, Utc::now(), self.lease_ttl)?
        {
            ClaimOutcome::AlreadyActive => {
                info!(url = %normalized, "in progress elsewhere (skipping for now)");
                Ok(ClaimedRun::LostRace)
            }
            ClaimOutcome::Exhausted => {
                info!(url = %normalized, "already processed");
                Ok(ClaimedRun::LostRace)
            }
            ClaimOutcome::Claimed => {
                let outcome = self.process_claimed(item, &item_id, &normalized, transcript)?;
                Ok(ClaimedRun::Outcome(outcome))
            }
        }
    }

    fn process_claimed(
        &self,
        item: &BookmarkItem,
        item_id: &str,
        url: &str,
        transcript: Option<&str>,
    ) -> Result<RunOutcome, PipelineError> {
        let title_for_log = item.title.as_deref().unwrap_or("(no title)");
        info!(title = title_for_log, url, "processing bookmark");

        let request = EnrichRequest {
            url,
            title_hint: item.title.as_deref(),
            transcript,
        };
        let document = match self.enricher.enrich(&request) {
            Ok(document) => document,
            Err(err) => return self.record_failure(item_id, url, &err.to_string()),
        };

        let title = item
            .title
            .clone()
            .or_else(|| document.title.clone())
            .unwrap_or_else(|| "Untitled".to_string());
        let stored = match self.sink.store(&title, item_id, &document.markdown) {
            Ok(stored) => stored,
            Err(err) => return self.record_failure(item_id, url, &err.to_string()),
        };

        let note = stored
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string);
        self.ledger
            .finalize(item_id, &self.lease_owner, Outcome::Done, note.as_deref())?;
        info!(output = %stored.path.display(), "processed bookmark");

        Ok(RunOutcome::Done {
            item_id: item_id.to_string(),
            url: url.to_string(),
            output_file: stored.path,
        })
    }

    fn record_failure(
        &self,
        item_id: &str,
        url: &str,
        reason: &str,
    ) -> Result<RunOutcome, PipelineError> {
        warn!(url, reason, "recording item failure");
        self.ledger
            .finalize(item_id, &self.lease_owner, Outcome::Failed, Some(reason))?;
        Ok(RunOutcome::Failed {
            item_id: item_id.to_string(),
            url: url.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use super::*;
    use crate::bookmarks::SourceError;
    use crate::ledger::{ItemState, JsonLedger};

    struct StaticSource(Vec<BookmarkItem>);

    impl ItemSource for StaticSource {
        fn list_candidates(&self) -> Result<Vec<BookmarkItem>, SourceError> {
            Ok(self.0.clone())
        }
    }

    enum MockEnricher {
        Succeed(String),
        Fail(String),
    }

    impl Enricher for MockEnricher {
        fn enrich(&self, _request: &EnrichRequest<'_>) -> Result<EnrichedDocument, EnrichError> {
            match self {
                Self::Succeed(markdown) => Ok(EnrichedDocument {
                    markdown: markdown.clone(),
                    title: None,
                }),
                Self::Fail(reason) => Err(EnrichError::Failed {
                    detail: reason.clone(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: RefCell<Vec<String>>,
        fail_with: Option<String>,
    }

    impl ContentSink for RecordingSink {
        fn store(
            &self,
            title: &str,
            _item_id: &str,
            _markdown: &str,
        ) -> Result<StoredDocument, SinkError> {
            if let Some(reason) = &self.fail_with {
                return Err(SinkError::Publish {
                    publisher: "hackmd",
                    detail: reason.clone(),
                });
            }
            self.stored.borrow_mut().push(title.to_string());
            Ok(StoredDocument {
                path: PathBuf::from(format!("/notes/{title}.md")),
            })
        }
    }

    fn pipeline<'a>(
        ledger: &'a JsonLedger,
        enricher: &'a MockEnricher,
        sink: &'a RecordingSink,
    ) -> Pipeline<'a> {
        Pipeline {
            ledger,
            enricher,
            sink,
            lease_ttl: Duration::seconds(3600),
            lease_owner: "test-runner".to_string(),
        }
    }

    fn ledger_in(dir: &std::path::Path) -> JsonLedger {
        JsonLedger::open(&dir.join("ledger.json")).unwrap()
    }

    #[test]
    fn empty_source_reports_no_work_without_touching_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Succeed("# doc".to_string());
        let sink = RecordingSink::default();

        let outcome = pipeline(&ledger, &enricher, &sink)
            .run_once(&StaticSource(Vec::new()))
            .unwrap();

        assert_eq!(outcome, RunOutcome::NoWork);
        let counts = ledger.counts().unwrap();
        assert_eq!((counts.in_progress, counts.done, counts.failed), (0, 0, 0));
        assert!(sink.stored.borrow().is_empty());
    }

    #[test]
    fn enrichment_failure_is_recorded_and_sink_never_invoked() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Fail("paywalled".to_string());
        let sink = RecordingSink::default();
        let item = BookmarkItem::manual("https://x.example.com/", None);

        let outcome = pipeline(&ledger, &enricher, &sink)
            .run_once(&StaticSource(vec![item.clone()]))
            .unwrap();

        let RunOutcome::Failed { item_id, reason, .. } = outcome else {
            panic!("expected failed outcome, got {outcome:?}");
        };
        assert!(reason.contains("paywalled"), "unexpected reason: {reason}");

        let entry = ledger.get(&item_id).unwrap().unwrap();
        assert_eq!(entry.state, ItemState::Failed);
        assert!(entry.note.as_deref().unwrap_or("").contains("paywalled"));
        assert!(entry.completed_at.is_some());

        assert!(sink.stored.borrow().is_empty(), "sink must not be invoked");
    }

    #[test]
    fn happy_path_finalizes_done() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Succeed("# Analysis".to_string());
        let sink = RecordingSink::default();
        let item = BookmarkItem::manual("https://y.example.com/", Some("A Post".to_string()));

        let outcome = pipeline(&ledger, &enricher, &sink)
            .run_once(&StaticSource(vec![item]))
            .unwrap();

        let RunOutcome::Done { item_id, .. } = outcome else {
            panic!("expected done outcome, got {outcome:?}");
        };
        let entry = ledger.get(&item_id).unwrap().unwrap();
        assert_eq!(entry.state, ItemState::Done);
        assert!(entry.completed_at.is_some());
        assert_eq!(ledger.counts().unwrap().done, 1);
        assert_eq!(sink.stored.borrow().as_slice(), ["A Post"]);
    }

    #[test]
    fn publish_failure_is_recorded_as_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Succeed("# doc".to_string());
        let sink = RecordingSink {
            fail_with: Some("HTTP 401: bad token".to_string()),
            ..RecordingSink::default()
        };
        let item = BookmarkItem::manual("https://z.example.com/", None);

        let outcome = pipeline(&ledger, &enricher, &sink)
            .run_once(&StaticSource(vec![item]))
            .unwrap();

        let RunOutcome::Failed { item_id, reason, .. } = outcome else {
            panic!("expected failed outcome, got {outcome:?}");
        };
        assert!(reason.contains("bad token"));
        let entry = ledger.get(&item_id).unwrap().unwrap();
        assert_eq!(entry.state, ItemState::Failed);
    }

    #[test]
    fn lost_race_falls_through_to_next_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Succeed("# doc".to_string());
        let sink = RecordingSink::default();

        let taken = BookmarkItem::manual("https://taken.example.com/", None);
        let open = BookmarkItem::manual("https://open.example.com/", None);
        let taken_id = taken.identity_sha256(&urls::normalize_url(&taken.url));
        ledger
            .try_claim(&taken_id, "other-runner", Utc::now(), Duration::seconds(3600))
            .unwrap();

        let outcome = pipeline(&ledger, &enricher, &sink)
            .run_once(&StaticSource(vec![taken, open.clone()]))
            .unwrap();

        let RunOutcome::Done { url, .. } = outcome else {
            panic!("expected done outcome, got {outcome:?}");
        };
        assert_eq!(url, urls::normalize_url(&open.url));
    }

    #[test]
    fn process_item_skips_non_http_and_already_processed() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ledger_in(tmp.path());
        let enricher = MockEnricher::Succeed("# doc".to_string());
        let sink = RecordingSink::default();
        let pipeline = pipeline(&ledger, &enricher, &sink);

        let weird = BookmarkItem::manual("mailto:a@example.com", None);
        assert!(matches!(
            pipeline.process_item(&weird, None).unwrap(),
            RunOutcome::Skipped { .. }
        ));

        let item = BookmarkItem::manual("https://once.example.com/", None);
        assert!(matches!(
            pipeline.process_item(&item, None).unwrap(),
            RunOutcome::Done { .. }
        ));
        // Second run is idempotent per URL.
        assert!(matches!(
            pipeline.process_item(&item, None).unwrap(),
            RunOutcome::Skipped { .. }
        ));
    }
}
