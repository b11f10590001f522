//! In-memory attempt log backed by [`DashMap`].
//!
//! DashMap shards its keys across independently locked maps. Holding an
//! [`Entry`] keeps the shard's write lock for the whole read-prune-check-append
//! sequence, which is what makes [`MemoryAttemptLog::admit`] atomic per key while
//! calls on keys in other shards proceed in parallel.

use chrono::Duration;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{Admission, AttemptLogRepository};

/// Timestamps recorded for one key.
#[derive(Debug, Clone, Default)]
struct AttemptLog {
    timestamps: Vec<i64>,
    /// Largest window (ms) this log has been evaluated against.
    horizon_ms: i64,
}

impl AttemptLog {
    fn widen(&mut self, window_ms: i64) {
        self.horizon_ms = self.horizon_ms.max(window_ms);
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.horizon_ms);
        self.timestamps.retain(|&t| t >= cutoff);
    }

    fn count_within(&self, now_ms: i64, window_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(window_ms);
        self.timestamps.iter().filter(|&&t| t >= cutoff).count()
    }

    fn truncate_front(&mut self, max_entries: usize) {
        let excess = self.timestamps.len().saturating_sub(max_entries);
        if excess > 0 {
            self.timestamps.drain(..excess);
        }
    }

    fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Process-local [`AttemptLogRepository`].
#[derive(Debug, Default)]
pub struct MemoryAttemptLog {
    entries: DashMap<String, AttemptLog>,
}

impl MemoryAttemptLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl AttemptLogRepository for MemoryAttemptLog {
    fn admit(&self, key: &str, now_ms: i64, window: Duration, limit: u32) -> Admission {
        let window_ms = window.num_milliseconds();
        let limit = limit as usize;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let log = occupied.get_mut();
                log.widen(window_ms);
                log.prune(now_ms);

                let count = log.count_within(now_ms, window_ms);
                if count >= limit {
                    if log.is_empty() {
                        occupied.remove();
                    }
                    return Admission::Rejected { count };
                }

                log.timestamps.push(now_ms);
                Admission::Admitted { count: count + 1 }
            }
            Entry::Vacant(vacant) => {
                if limit == 0 {
                    return Admission::Rejected { count: 0 };
                }

                vacant.insert(AttemptLog {
                    timestamps: vec![now_ms],
                    horizon_ms: window_ms,
                });
                Admission::Admitted { count: 1 }
            }
        }
    }

    fn record(
        &self,
        key: &str,
        now_ms: i64,
        retention: Duration,
        window: Duration,
        max_entries: usize,
    ) -> usize {
        let mut log = self.entries.entry(key.to_string()).or_default();
        log.widen(retention.num_milliseconds());
        log.prune(now_ms);
        log.timestamps.push(now_ms);
        log.truncate_front(max_entries.max(1));
        log.count_within(now_ms, window.num_milliseconds())
    }

    fn count_within(&self, key: &str, now_ms: i64, window: Duration) -> usize {
        let Some(mut log) = self.entries.get_mut(key) else {
            return 0;
        };

        log.prune(now_ms);
        let count = log.count_within(now_ms, window.num_milliseconds());
        let empty = log.is_empty();
        drop(log);

        if empty {
            // Re-checked under the lock: a concurrent writer may have appended.
            self.entries.remove_if(key, |_, log| log.is_empty());
        }

        count
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn take(&self, key: &str, now_ms: i64, window: Duration) -> Option<usize> {
        self.entries
            .remove(key)
            .map(|(_, log)| log.count_within(now_ms, window.num_milliseconds()))
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sweep(&self, now_ms: i64) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, log| {
            log.prune(now_ms);
            let keep = !log.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
