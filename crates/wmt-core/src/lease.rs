//! Lease policy: pure eligibility rules for (re)claiming a ledger entry.
//!
//! Kept free of storage and clock side effects so crash-recovery behavior
//! is testable in isolation. The ledger backends and the selector both
//! consult this one function; they never re-derive expiry themselves.

use chrono::{DateTime, Duration, Utc};

use crate::ledger::{ItemState, LedgerEntry};

/// Whether an item is eligible for claiming at `now`.
///
/// - Absent entry: claimable (never attempted).
/// - `in_progress` with `claimed_at` strictly older than `lease_ttl`:
///   claimable - the previous runner is presumed crashed or hung.
/// - `in_progress` within the TTL: not claimable.
/// - `done` / `failed`: never claimable (processed-once guarantee).
#[must_use]
pub fn is_claimable(
    entry: Option<&LedgerEntry>,
    now: DateTime<Utc>,
    lease_ttl: Duration,
) -> bool {
    match entry {
        None => true,
        Some(entry) => match entry.state {
            ItemState::Done | ItemState::Failed => false,
            ItemState::InProgress => now.signed_duration_since(entry.claimed_at) > lease_ttl,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Outcome;

    fn entry(state: ItemState, claimed_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            state,
            claimed_at,
            lease_owner: "owner-1".to_string(),
            completed_at: None,
            note: None,
        }
    }

    #[test]
    fn absent_is_claimable() {
        assert!(is_claimable(None, Utc::now(), Duration::seconds(3600)));
    }

    #[test]
    fn in_progress_expiry_boundaries() {
        let ttl = Duration::seconds(3600);
        let now = Utc::now();

        let expired = entry(ItemState::InProgress, now - Duration::seconds(3601));
        assert!(is_claimable(Some(&expired), now, ttl));

        let fresh = entry(ItemState::InProgress, now - Duration::seconds(3599));
        assert!(!is_claimable(Some(&fresh), now, ttl));

        // Exactly at the TTL is not yet expired.
        let at_ttl = entry(ItemState::InProgress, now - ttl);
        assert!(!is_claimable(Some(&at_ttl), now, ttl));
    }

    #[test]
    fn terminal_states_are_never_claimable() {
        let ttl = Duration::seconds(0);
        let now = Utc::now();
        let ancient = now - Duration::days(365);

        for outcome in [Outcome::Done, Outcome::Failed] {
            let entry = entry(outcome.into_state(), ancient);
            assert!(!is_claimable(Some(&entry), now, ttl));
        }
    }
}
