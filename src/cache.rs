//! Process-lifetime cache: TTL-keyed entries and the visited-domain set.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How often the background pass evicts expired entries.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fallback TTL when the caller does not specify one.
const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Thread-safe cache shared across jobs.
///
/// Holds two concerns: an arbitrary TTL map (search results, per-domain
/// email lookups) with lazy expiry on read, and the set of domains the
/// fetcher has already visited. The visited set is cleared by the caller
/// at the start of a run; per-job dedup lives in the engine, not here.
pub(crate) struct ScraperCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    visited: Mutex<HashSet<String>>,
}

impl ScraperCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Stores `value` under `key` with the given TTL (default 1 h).
    pub(crate) fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl.unwrap_or(DEFAULT_TTL),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), entry);
    }

    /// Returns the value for `key` if present and not expired. Expired
    /// entries are removed on read.
    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Marks `domain` as visited. Returns true when the domain was new.
    pub(crate) fn mark_visited(&self, domain: &str) -> bool {
        self.visited
            .lock()
            .expect("cache lock poisoned")
            .insert(domain.to_string())
    }

    pub(crate) fn visited_count(&self) -> usize {
        self.visited.lock().expect("cache lock poisoned").len()
    }

    /// Drops all entries and the visited set.
    pub(crate) fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
        self.visited.lock().expect("cache lock poisoned").clear();
    }

    /// Removes all expired TTL entries. Returns the number evicted.
    pub(crate) fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Spawns the periodic cleanup pass. The task runs for the process
    /// lifetime; the handle is returned for tests.
    pub(crate) fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.purge_expired();
                if evicted > 0 {
                    tracing::debug!("Cache cleanup evicted {} expired entries", evicted);
                }
            }
        })
    }
}

impl Default for ScraperCache {
    fn default() -> Self {
        Self::new()
    }
}
