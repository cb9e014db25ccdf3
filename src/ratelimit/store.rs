//! Per-key hit counters.

use dashmap::DashMap;
use tracing::trace;

/// Hit count and window end for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterEntry {
    /// Hits recorded in the current window
    pub hits: u64,
    /// Second at which the current window closes, `0` when unset
    pub window_end: u64,
}

impl CounterEntry {
    /// Whether the window was started and has since closed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.window_end != 0 && self.window_end <= now
    }

    /// Whether the entry holds no hits and no window.
    pub fn is_idle(&self) -> bool {
        self.window_end == 0
    }

    fn reset(&mut self) {
        self.hits = 0;
        self.window_end = 0;
    }
}

/// Result of one sweep over the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries zeroed in place
    pub reset: usize,
    /// Entries removed from the store
    pub evicted: usize,
}

/// Concurrent map from key to [`CounterEntry`].
///
/// Each key is guarded by its shard lock, so updates to one key are
/// serialized while distinct keys proceed in parallel.
#[derive(Debug)]
pub struct CounterStore {
    entries: DashMap<String, CounterEntry>,
    window_seconds: u64,
}

impl CounterStore {
    /// Create an empty store whose windows last `window_seconds`.
    pub fn new(window_seconds: u64) -> Self {
        Self {
            entries: DashMap::new(),
            window_seconds,
        }
    }

    /// Record one hit for `key` at `now`.
    ///
    /// Returns the hit count after the increment and the end of the window the
    /// hit landed in. A window is opened on the first hit after a reset, and a
    /// window observed as already closed is rolled over before counting.
    pub fn record_hit(&self, key: &str, now: u64) -> (u64, u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            return Self::apply_hit(&mut *entry, now, self.window_seconds);
        }

        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| {
            trace!(key = %key, "Creating counter entry");
            CounterEntry::default()
        });
        Self::apply_hit(&mut *entry, now, self.window_seconds)
    }

    fn apply_hit(entry: &mut CounterEntry, now: u64, window_seconds: u64) -> (u64, u64) {
        if entry.is_expired(now) {
            entry.reset();
        }
        entry.hits += 1;
        if entry.window_end == 0 {
            entry.window_end = now.saturating_add(window_seconds);
        }
        (entry.hits, entry.window_end)
    }

    /// Roll every expired window back to zero.
    ///
    /// With `evict` set, expired and idle entries are removed instead, so the
    /// store only holds keys with an open window.
    pub fn sweep(&self, now: u64, evict: bool) -> SweepStats {
        let mut stats = SweepStats::default();

        if evict {
            let before = self.entries.len();
            self.entries
                .retain(|_, entry| !(entry.is_expired(now) || entry.is_idle()));
            stats.evicted = before.saturating_sub(self.entries.len());
        } else {
            for mut entry in self.entries.iter_mut() {
                if entry.is_expired(now) {
                    entry.reset();
                    stats.reset += 1;
                }
            }
        }

        stats
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, key: &str) -> Option<CounterEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
