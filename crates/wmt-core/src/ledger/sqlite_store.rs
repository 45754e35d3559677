//! SQLite ledger backend.
//!
//! One `entries` table keyed by `item_id`. Every mutation runs inside a
//! `BEGIN IMMEDIATE` transaction, so the read-check-write of a claim holds
//! the database write lock for its full duration and concurrent claimers
//! in other processes serialize behind it. A busy timeout makes those
//! claimers block briefly instead of failing with `SQLITE_BUSY`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{ClaimOutcome, ItemState, LedgerCounts, LedgerEntry, LedgerError, LedgerStore, Outcome};
use crate::lease;

const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS entries (
  item_id      TEXT PRIMARY KEY,
  state        TEXT NOT NULL,
  claimed_at   TEXT NOT NULL,
  lease_owner  TEXT NOT NULL,
  completed_at TEXT,
  note         TEXT
)";

/// Raw row before timestamp/state decoding.
struct RawEntry {
    state: String,
    claimed_at: String,
    lease_owner: String,
    completed_at: Option<String>,
    note: Option<String>,
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteLedger {
    /// Opens (creating if needed) the ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] when the database cannot be opened
    /// or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| LedgerError::Storage {
                    path: path.to_path_buf(),
                    detail: format!("failed to create ledger directory: {err}"),
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|err| LedgerError::Storage {
            path: path.to_path_buf(),
            detail: format!("failed to open ledger database: {err}"),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| LedgerError::Storage {
                path: path.to_path_buf(),
                detail: format!("failed to set busy timeout: {err}"),
            })?;
        conn.execute_batch(SCHEMA)
            .map_err(|err| LedgerError::Storage {
                path: path.to_path_buf(),
                detail: format!("failed to initialize ledger schema: {err}"),
            })?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    fn storage_error(&self, detail: String) -> LedgerError {
        LedgerError::Storage {
            path: self.path.clone(),
            detail,
        }
    }

    fn corrupt_error(&self, detail: String) -> LedgerError {
        LedgerError::Corrupt {
            path: self.path.clone(),
            detail,
        }
    }

    fn decode_state(&self, raw: &str) -> Result<ItemState, LedgerError> {
        match raw {
            "in_progress" => Ok(ItemState::InProgress),
            "done" => Ok(ItemState::Done),
            "failed" => Ok(ItemState::Failed),
            other => Err(self.corrupt_error(format!("unknown entry state: {other}"))),
        }
    }

    fn decode_timestamp(&self, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|err| self.corrupt_error(format!("bad timestamp {raw:?}: {err}")))
    }

    fn decode_entry(&self, raw: RawEntry) -> Result<LedgerEntry, LedgerError> {
        Ok(LedgerEntry {
            state: self.decode_state(&raw.state)?,
            claimed_at: self.decode_timestamp(&raw.claimed_at)?,
            lease_owner: raw.lease_owner,
            completed_at: raw
                .completed_at
                .as_deref()
                .map(|value| self.decode_timestamp(value))
                .transpose()?,
            note: raw.note,
        })
    }

    fn select_raw(conn: &Connection, item_id: &str) -> rusqlite::Result<Option<RawEntry>> {
        conn.query_row(
            "SELECT state, claimed_at, lease_owner, completed_at, note
             FROM entries WHERE item_id = ?1",
            params![item_id],
            |row| {
                Ok(RawEntry {
                    state: row.get(0)?,
                    claimed_at: row.get(1)?,
                    lease_owner: row.get(2)?,
                    completed_at: row.get(3)?,
                    note: row.get(4)?,
                })
            },
        )
        .optional()
    }
}

impl LedgerStore for SqliteLedger {
    fn get(&self, item_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = Self::select_raw(&conn, item_id)
            .map_err(|err| self.storage_error(format!("failed to read entry: {err}")))?;
        drop(conn);
        raw.map(|raw| self.decode_entry(raw)).transpose()
    }

    fn try_claim(
        &self,
        item_id: &str,
        owner: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<ClaimOutcome, LedgerError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| self.storage_error(format!("failed to begin claim transaction: {err}")))?;

        let existing = Self::select_raw(&tx, item_id)
            .map_err(|err| self.storage_error(format!("failed to read entry: {err}")))?
            .map(|raw| self.decode_entry(raw))
            .transpose()?;

        let decision = if existing
            .as_ref()
            .is_some_and(|entry| entry.state.is_terminal())
        {
            ClaimOutcome::Exhausted
        } else if lease::is_claimable(existing.as_ref(), now, lease_ttl) {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::AlreadyActive
        };

        if decision == ClaimOutcome::Claimed {
            tx.execute(
                "INSERT INTO entries (item_id, state, claimed_at, lease_owner, completed_at, note)
                 VALUES (?1, 'in_progress', ?2, ?3, NULL, NULL)
                 ON CONFLICT(item_id) DO UPDATE SET
                   state = 'in_progress',
                   claimed_at = excluded.claimed_at,
                   lease_owner = excluded.lease_owner,
                   completed_at = NULL,
                   note = NULL",
                params![item_id, now.to_rfc3339(), owner],
            )
            .map_err(|err| self.storage_error(format!("failed to write claim: {err}")))?;
        }

        tx.commit()
            .map_err(|err| self.storage_error(format!("failed to commit claim: {err}")))?;
        Ok(decision)
    }

    fn finalize(
        &self,
        item_id: &str,
        owner: &str,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| {
                self.storage_error(format!("failed to begin finalize transaction: {err}"))
            })?;

        let updated = tx
            .execute(
                "UPDATE entries
                 SET state = ?1, completed_at = ?2, note = ?3
                 WHERE item_id = ?4 AND state = 'in_progress' AND lease_owner = ?5",
                params![
                    outcome.into_state().as_str(),
                    Utc::now().to_rfc3339(),
                    note,
                    item_id,
                    owner
                ],
            )
            .map_err(|err| self.storage_error(format!("failed to write finalize: {err}")))?;

        tx.commit()
            .map_err(|err| self.storage_error(format!("failed to commit finalize: {err}")))?;
        drop(conn);

        if updated == 0 {
            return Err(LedgerError::NotInProgress {
                item_id: item_id.to_string(),
            });
        }
        Ok(())
    }

    fn counts(&self) -> Result<LedgerCounts, LedgerError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut statement = conn
            .prepare("SELECT state, COUNT(*) FROM entries GROUP BY state")
            .map_err(|err| self.storage_error(format!("failed to prepare counts query: {err}")))?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|err| self.storage_error(format!("failed to query counts: {err}")))?;

        let mut counts = LedgerCounts::default();
        for row in rows {
            let (state, count) =
                row.map_err(|err| self.storage_error(format!("failed to read counts row: {err}")))?;
            #[allow(clippy::cast_sign_loss)]
            let count = count.max(0) as usize;
            match self.decode_state(&state)? {
                ItemState::InProgress => counts.in_progress = count,
                ItemState::Done => counts.done = count,
                ItemState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
