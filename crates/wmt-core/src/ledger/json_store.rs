//! JSON-file ledger backend.
//!
//! Layout (v1):
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": { "<item_id>": { "state": "...", ... } }
//! }
//! ```
//!
//! Claim atomicity across processes comes from a sibling `.lock` file held
//! exclusively for the full read-check-write sequence; readers take the
//! lock shared. The document itself is replaced atomically (temp file in
//! the same directory, fsync, rename) so a crash mid-write never leaves a
//! torn ledger behind.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::{ClaimOutcome, LedgerCounts, LedgerEntry, LedgerError, LedgerStore, Outcome};
use crate::lease;

const LEDGER_VERSION: u32 = 1;

fn default_version() -> u32 {
    LEDGER_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, LedgerEntry>,
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

enum LockKind {
    Shared,
    Exclusive,
}

/// File-locked JSON ledger.
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonLedger {
    /// Opens (or prepares to create) the ledger at `path`.
    ///
    /// The document itself is created lazily on first claim; a missing
    /// file reads as an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] when the parent directory cannot
    /// be created.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| LedgerError::Storage {
                    path: path.to_path_buf(),
                    detail: format!("failed to create ledger directory: {err}"),
                })?;
            }
        }
        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
        })
    }

    fn storage_error(&self, detail: String) -> LedgerError {
        LedgerError::Storage {
            path: self.path.clone(),
            detail,
        }
    }

    fn acquire_lock(&self, kind: &LockKind) -> Result<File, LedgerError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| self.storage_error(format!("failed to open ledger lock: {err}")))?;
        match kind {
            LockKind::Shared => FileExt::lock_shared(&lock_file),
            LockKind::Exclusive => FileExt::lock_exclusive(&lock_file),
        }
        .map_err(|err| self.storage_error(format!("failed to lock ledger: {err}")))?;
        Ok(lock_file)
    }

    /// Loads the document. Caller must hold the lock.
    fn load(&self) -> Result<LedgerDocument, LedgerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(LedgerDocument::default());
            }
            Err(err) => {
                return Err(self.storage_error(format!("failed to read ledger: {err}")));
            }
        };
        if content.trim().is_empty() {
            return Ok(LedgerDocument::default());
        }
        serde_json::from_str(&content).map_err(|err| LedgerError::Corrupt {
            path: self.path.clone(),
            detail: err.to_string(),
        })
    }

    /// Persists the document atomically. Caller must hold the exclusive
    /// lock.
    fn save(&self, document: &LedgerDocument) -> Result<(), LedgerError> {
        let payload = serde_json::to_vec_pretty(document)
            .map_err(|err| self.storage_error(format!("failed to serialize ledger: {err}")))?;
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|err| self.storage_error(format!("failed to create temp ledger file: {err}")))?;
        temp.write_all(&payload)
            .map_err(|err| self.storage_error(format!("failed to write temp ledger file: {err}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| self.storage_error(format!("failed to sync temp ledger file: {err}")))?;
        temp.persist(&self.path)
            .map_err(|err| self.storage_error(format!("failed to persist ledger: {err}")))?;
        Ok(())
    }
}

impl LedgerStore for JsonLedger {
    fn get(&self, item_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let lock_file = self.acquire_lock(&LockKind::Shared)?;
        let document = self.load()?;
        drop(lock_file);
        Ok(document.entries.get(item_id).cloned())
    }

    fn try_claim(
        &self,
        item_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<ClaimOutcome, LedgerError> {
        let lock_file = self.acquire_lock(&LockKind::Exclusive)?;
        let mut document = self.load()?;

        let decision = {
            let existing = document.entries.get(item_id);
            if existing.is_some_and(|entry| entry.state.is_terminal()) {
                ClaimOutcome::Exhausted
            } else if lease::is_claimable(existing, now, lease_ttl) {
                ClaimOutcome::Claimed
            } else {
                ClaimOutcome::AlreadyActive
            }
        };

        if decision == ClaimOutcome::Claimed {
            document
                .entries
                .insert(item_id.to_string(), LedgerEntry::claimed(owner, now));
            self.save(&document)?;
        }
        drop(lock_file);
        Ok(decision)
    }

    fn finalize(
        &self,
        item_id: &str,
        owner: &str,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<(), LedgerError> {
        let lock_file = self.acquire_lock(&LockKind::Exclusive)?;
        let mut document = self.load()?;

        let entry = document
            .entries
            .get_mut(item_id)
            .filter(|entry| entry.state == super::ItemState::InProgress)
            .filter(|entry| entry.lease_owner == owner)
            .ok_or_else(|| LedgerError::NotInProgress {
                item_id: item_id.to_string(),
            })?;

        entry.state = outcome.into_state();
        entry.completed_at = Some(Utc::now());
        entry.note = note.map(str::to_string);

        self.save(&document)?;
        drop(lock_file);
        Ok(())
    }

    fn counts(&self) -> Result<LedgerCounts, LedgerError> {
        let lock_file = self.acquire_lock(&LockKind::Shared)?;
        let document = self.load()?;
        drop(lock_file);

        let mut counts = LedgerCounts::default();
        for entry in document.entries.values() {
            match entry.state {
                super::ItemState::InProgress => counts.in_progress += 1,
                super::ItemState::Done => counts.done += 1,
                super::ItemState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
