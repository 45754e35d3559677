//! Processing ledger: durable record of item lifecycle with atomic claims.
//!
//! One entry per item identity ever claimed. An entry moves along exactly
//! one path: *(absent)* -> `in_progress` -> {`done`, `failed`}. Terminal
//! entries are never reclaimed and never deleted by this crate; they are
//! the "processed once" record. An `in_progress` entry older than the
//! lease TTL is reclaimable - that expiry is the sole crash-recovery
//! mechanism.
//!
//! The claim transition must be atomic with respect to concurrent callers
//! in *separate OS processes*, not just threads: a one-shot run, a polling
//! watcher, and a direct-URL run may all race on the same store. Two
//! backends satisfy that contract:
//!
//! - [`json_store::JsonLedger`]: whole-file exclusive lock around the
//!   read-check-write sequence, atomic-rename persistence.
//! - [`sqlite_store::SqliteLedger`]: a single `BEGIN IMMEDIATE`
//!   transaction per mutation.

pub mod json_store;
pub mod sqlite_store;


use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use json_store::JsonLedger;
pub use sqlite_store::SqliteLedger;

/// Lifecycle state of a ledger entry.
///
/// Absence of an entry means "never attempted" and is not a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Claimed by a runner; becomes reclaimable once the lease expires.
    InProgress,
    /// Processed successfully. Terminal.
    Done,
    /// Processing failed; the entry is the permanent record that this item
    /// needs manual attention. Terminal.
    Failed,
}

impl ItemState {
    /// Whether this state is terminal (`done` or `failed`).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Stable lowercase label, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Current lifecycle state.
    pub state: ItemState,
    /// When the current (or most recent) lease began.
    pub claimed_at: DateTime<Utc>,
    /// Opaque token identifying the claiming runner. Diagnostic, except
    /// that `finalize` refuses a mismatched owner.
    pub lease_owner: String,
    /// When the entry reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Short outcome detail (failure reason, output filename).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LedgerEntry {
    /// A fresh `in_progress` entry for a new claim.
    #[must_use]
    pub fn claimed(owner: &str, now: DateTime<Utc>) -> Self {
        Self {
            state: ItemState::InProgress,
            claimed_at: now,
            lease_owner: owner.to_string(),
            completed_at: None,
            note: None,
        }
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim succeeded; an `in_progress` entry was written.
    Claimed,
    /// Another runner holds an unexpired lease. No mutation.
    AlreadyActive,
    /// The entry is terminal (`done` or `failed`). No mutation.
    Exhausted,
}

/// Terminal outcome passed to `finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All pipeline steps succeeded.
    Done,
    /// Enrichment or publishing failed; the reason goes in the note.
    Failed,
}

impl Outcome {
    pub(crate) const fn into_state(self) -> ItemState {
        match self {
            Self::Done => ItemState::Done,
            Self::Failed => ItemState::Failed,
        }
    }
}

/// Entry counts by state, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    /// Entries currently `in_progress` (expired leases included).
    pub in_progress: usize,
    /// Entries `done`.
    pub done: usize,
    /// Entries `failed`.
    pub failed: usize,
}

/// Ledger errors.
///
/// Storage and corruption errors are fatal to the invocation; there is no
/// internal retry. `NotInProgress` indicates a lease-discipline bug or a
/// finalize attempt by a runner whose lease was reclaimed - surfaced
/// loudly rather than absorbed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Finalize was called for an entry that is not `in_progress` under
    /// the caller's lease.
    #[error("ledger entry for {item_id} is not in progress under this lease")]
    NotInProgress {
        /// The item whose finalize was refused.
        item_id: String,
    },

    /// The ledger exists but cannot be parsed.
    #[error("ledger is corrupt at {}: {detail}", path.display())]
    Corrupt {
        /// Ledger path.
        path: PathBuf,
        /// Parse error detail.
        detail: String,
    },

    /// Underlying storage failed (I/O, locking, database).
    #[error("ledger storage error at {}: {detail}", path.display())]
    Storage {
        /// Ledger path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
}

/// Durable item ledger with atomic claim semantics.
///
/// `try_claim` must behave as a single compare-and-swap on the
/// absent-or-expired condition: of any number of concurrent claim attempts
/// for one item, at most one may observe [`ClaimOutcome::Claimed`].
pub trait LedgerStore {
    /// Returns the entry for `item_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    fn get(&self, item_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Attempts to claim `item_id` for `owner` at `now`.
    ///
    /// Succeeds when no entry exists or an existing `in_progress` entry has
    /// outlived `lease_ttl`; otherwise reports why the item is not
    /// claimable, without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    fn try_claim(
        &self,
        item_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<ClaimOutcome, LedgerError>;

    /// Transitions an `in_progress` entry owned by `owner` to a terminal
    /// state, stamping `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotInProgress`] when the entry is absent,
    /// terminal, or leased by a different owner (a crashed-and-reclaimed
    /// item must not be finalized twice); other variants on storage
    /// failure.
    fn finalize(
        &self,
        item_id: &str,
        owner: &str,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Entry counts by state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on storage failure.
    fn counts(&self) -> Result<LedgerCounts, LedgerError>;
}

/// Ledger backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// Infer from the path extension (`.sqlite3`/`.sqlite`/`.db` ->
    /// sqlite, anything else -> json).
    Auto,
    /// JSON document with whole-file locking.
    Json,
    /// SQLite database.
    Sqlite,
}

impl Default for LedgerBackend {
    fn default() -> Self {
        Self::Auto
    }
}

fn infer_backend(path: &Path, backend: LedgerBackend) -> LedgerBackend {
    if backend != LedgerBackend::Auto {
        return backend;
    }
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "sqlite3" | "sqlite" | "db" => LedgerBackend::Sqlite,
        _ => LedgerBackend::Json,
    }
}

/// Opens the ledger at `path` with the requested backend.
///
/// # Errors
///
/// Returns [`LedgerError`] when the backing storage cannot be prepared.
pub fn open_ledger(
    path: &Path,
    backend: LedgerBackend,
) -> Result<Box<dyn LedgerStore>, LedgerError> {
    match infer_backend(path, backend) {
        LedgerBackend::Sqlite => Ok(Box::new(SqliteLedger::open(path)?)),
        _ => Ok(Box::new(JsonLedger::open(path)?)),
    }
}
