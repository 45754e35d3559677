//! Stability tracking for files that other programs rewrite in place.
//!
//! The browser rewrites its bookmarks file whole; processing a half-written
//! file shows up as a parse failure. The tracker reports a file as stable
//! only once its size and mtime have been unchanged for a configured
//! window. Stat access and the clock are injectable so the window logic is
//! testable without sleeping.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Size + mtime snapshot of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatSnapshot {
    /// File size in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u128,
}

type StatProvider = Box<dyn Fn(&Path) -> Option<StatSnapshot> + Send>;
type Clock = Box<dyn Fn() -> Duration + Send>;

fn default_stat_provider(path: &Path) -> Option<StatSnapshot> {
    let metadata = fs::metadata(path).ok()?;
    let mtime_ns = metadata
        .modified()
        .ok()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()?
        .as_nanos();
    Some(StatSnapshot {
        size: metadata.len(),
        mtime_ns,
    })
}

/// Tracks when observed files have gone quiet.
pub struct StableFileTracker {
    stable_window: Duration,
    stat_provider: StatProvider,
    clock: Clock,
    seen: HashMap<PathBuf, (StatSnapshot, Duration)>,
}

impl StableFileTracker {
    /// Tracker with real filesystem stat and a monotonic clock.
    #[must_use]
    pub fn new(stable_window: Duration) -> Self {
        let start = Instant::now();
        Self::with_providers(
            stable_window,
            Box::new(default_stat_provider),
            Box::new(move || start.elapsed()),
        )
    }

    /// Tracker with injected stat and clock, for tests.
    #[must_use]
    pub fn with_providers(
        stable_window: Duration,
        stat_provider: StatProvider,
        clock: Clock,
    ) -> Self {
        Self {
            stable_window,
            stat_provider,
            clock,
            seen: HashMap::new(),
        }
    }

    /// Observes the candidates and returns those that have been unchanged
    /// for at least the stability window.
    ///
    /// A zero window reports files stable on first sight. Files that
    /// vanished are forgotten; a changed file restarts its window.
    pub fn observe(&mut self, candidates: &[PathBuf]) -> Vec<PathBuf> {
        let now = (self.clock)();
        let mut stable = Vec::new();

        self.seen
            .retain(|path, _| candidates.iter().any(|candidate| candidate == path));

        for path in candidates {
            let Some(snapshot) = (self.stat_provider)(path) else {
                continue;
            };

            match self.seen.get(path) {
                None => {
                    self.seen.insert(path.clone(), (snapshot, now));
                    if self.stable_window.is_zero() {
                        stable.push(path.clone());
                    }
                }
                Some((prior_snapshot, last_change)) => {
                    if snapshot != *prior_snapshot {
                        self.seen.insert(path.clone(), (snapshot, now));
                    } else if now.saturating_sub(*last_change) >= self.stable_window {
                        stable.push(path.clone());
                    }
                }
            }
        }

        stable
    }

    /// Forgets a path so its window restarts on next sight.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }
}
