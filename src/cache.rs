//! Durable reputation cache and last-scan snapshot.
//!
//! The cache file is a JSON object keyed by IP; the snapshot file is a JSON
//! array holding the most recent scan's results so a caller can redisplay
//! them without rescanning. This module is the sole owner of both files.
//! Reads degrade to empty on missing or corrupt files (logged, never fatal);
//! writes are atomic whole-file replacements and report failure as a boolean.
//! The mapping is insertion-ordered end to end: load and save keep the file's
//! key order, which eviction relies on to break date ties.

use std::path::PathBuf;

use indexmap::IndexMap;
use log::{error, warn};
use serde_json::Value;

use crate::config::Config;
use crate::models::ScanResult;
use crate::util::write_atomic;

/// Sort key for entries without a last-analysis date; lexically before any
/// real `DD/MM/YYYY` value so they are evicted first.
const UNDATED_SORT_KEY: &str = "0000/00/00";

/// Counts reported by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in the durable cache.
    pub cached_ips: usize,
    /// Entries in the last-scan snapshot.
    pub snapshot_results: usize,
    /// Unique IPs across both files.
    pub total_unique_ips: usize,
}

/// File-backed store of previously computed scan results.
pub struct ResultCache {
    cache_file: PathBuf,
    snapshot_file: PathBuf,
}

impl ResultCache {
    /// Creates a cache rooted at the configured data directory.
    pub fn new(config: &Config) -> Self {
        Self {
            cache_file: config.cache_file(),
            snapshot_file: config.snapshot_file(),
        }
    }

    /// Creates a cache over explicit file paths (used by tests).
    pub fn at(cache_file: PathBuf, snapshot_file: PathBuf) -> Self {
        Self {
            cache_file,
            snapshot_file,
        }
    }

    /// Loads the durable cache in file order. Missing or unparsable files
    /// yield an empty map; corruption is logged, not raised.
    pub fn load(&self) -> IndexMap<String, ScanResult> {
        match std::fs::read_to_string(&self.cache_file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "Cache file {} is unreadable, starting empty: {e}",
                        self.cache_file.display()
                    );
                    IndexMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => {
                warn!("Failed to read {}: {e}", self.cache_file.display());
                IndexMap::new()
            }
        }
    }

    /// Persists the durable cache, keeping the map's insertion order in the
    /// file. Returns `false` (and logs) on failure.
    pub fn save(&self, cache: &IndexMap<String, ScanResult>) -> bool {
        let json = match serde_json::to_string_pretty(cache) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize cache: {e}");
                return false;
            }
        };
        match write_atomic(&self.cache_file, &json) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save cache {}: {e:#}", self.cache_file.display());
                false
            }
        }
    }

    /// Returns the cached entry for `ip`, if any.
    pub fn get(&self, ip: &str) -> Option<ScanResult> {
        self.load().get(ip).cloned()
    }

    /// Whether `ip` has a cached entry.
    pub fn contains(&self, ip: &str) -> bool {
        self.load().contains_key(ip)
    }

    /// Persists the last-scan snapshot. Returns `false` on failure.
    pub fn save_snapshot(&self, results: &[ScanResult]) -> bool {
        let json = match serde_json::to_string_pretty(results) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize snapshot: {e}");
                return false;
            }
        };
        match write_atomic(&self.snapshot_file, &json) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to save snapshot {}: {e:#}",
                    self.snapshot_file.display()
                );
                false
            }
        }
    }

    /// Loads the last-scan snapshot; absent or corrupt means empty.
    pub fn load_snapshot(&self) -> Vec<ScanResult> {
        match std::fs::read_to_string(&self.snapshot_file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(results) => results,
                Err(e) => {
                    warn!(
                        "Snapshot file {} is unreadable, treating as empty: {e}",
                        self.snapshot_file.display()
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Removes the snapshot file. Returns `false` only on a real I/O error;
    /// an absent file counts as cleared.
    pub fn clear_snapshot(&self) -> bool {
        match std::fs::remove_file(&self.snapshot_file) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(
                    "Failed to remove snapshot {}: {e}",
                    self.snapshot_file.display()
                );
                false
            }
        }
    }

    /// Evicts the oldest entries until at most `max_entries` remain,
    /// returning the number removed.
    ///
    /// "Oldest" means lexically smallest `"Last Analysis Date"`; entries
    /// lacking the field sort first, and ties keep their file (insertion)
    /// order thanks to the stable sort.
    pub fn evict(&self, max_entries: usize) -> usize {
        let raw = match std::fs::read_to_string(&self.cache_file) {
            Ok(raw) => raw,
            Err(_) => return 0,
        };
        let map = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => return 0,
        };
        if map.len() <= max_entries {
            return 0;
        }

        let mut entries: Vec<(String, Value)> = map.into_iter().collect();
        entries.sort_by_key(|(_, entry)| date_sort_key(entry));

        let removed = entries.len() - max_entries;
        let kept: serde_json::Map<String, Value> = entries.into_iter().skip(removed).collect();

        let json = match serde_json::to_string_pretty(&Value::Object(kept)) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize evicted cache: {e}");
                return 0;
            }
        };
        if let Err(e) = write_atomic(&self.cache_file, &json) {
            error!("Failed to save evicted cache: {e:#}");
            return 0;
        }
        removed
    }

    /// Reports entry counts across the cache and snapshot files.
    pub fn stats(&self) -> CacheStats {
        let cache = self.load();
        let snapshot = self.load_snapshot();
        let mut unique: std::collections::HashSet<&str> =
            cache.keys().map(String::as_str).collect();
        unique.extend(snapshot.iter().map(|r| r.ip.as_str()));
        CacheStats {
            cached_ips: cache.len(),
            snapshot_results: snapshot.len(),
            total_unique_ips: unique.len(),
        }
    }
}

fn date_sort_key(entry: &Value) -> String {
    entry
        .get("Last Analysis Date")
        .and_then(Value::as_str)
        .unwrap_or(UNDATED_SORT_KEY)
        .to_string()
}
