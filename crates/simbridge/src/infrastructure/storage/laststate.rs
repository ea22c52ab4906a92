//! Persisted last-known control state.
//!
//! Panels with physical positions (trim wheels, selectors) report values
//! the simulator should be restored to after a restart.  The cache keeps
//! the most recent numeric report per flagged identifier and flushes the
//! whole map to disk, throttled to a minimum interval so a spinning
//! encoder cannot saturate the disk.  Flushes write a temp file and rename
//! it into place so a crash mid-write never truncates the previous state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Error type for state-file flushes.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error writing state to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Dirty-tracked identifier → value map with throttled atomic flushes.
pub struct LastStateCache {
    path: PathBuf,
    entries: HashMap<String, String>,
    dirty: bool,
    last_flush: Instant,
    min_interval: Duration,
}

impl LastStateCache {
    /// Loads the cache from `path`.
    ///
    /// A missing or unreadable file is not fatal: restoration is best
    /// effort and the bridge must come up regardless, so failures degrade
    /// to an empty cache with a warning.
    pub fn load(path: &Path, min_interval: Duration) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), "ignoring malformed state file: {e}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "failed to read state file: {e}");
                HashMap::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
            // Start the throttle window open so the first change after
            // startup is flushed promptly.
            last_flush: Instant::now()
                .checked_sub(min_interval)
                .unwrap_or_else(Instant::now),
            min_interval,
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(String::as_str)
    }

    pub fn entries(&self) -> &HashMap<String, String> {
        &self.entries
    }

    /// Records one observation; an unchanged value does not dirty the cache.
    pub fn update(&mut self, identifier: &str, value: &str) {
        if self.entries.get(identifier).is_some_and(|v| v == value) {
            return;
        }
        self.entries.insert(identifier.to_string(), value.to_string());
        self.dirty = true;
    }

    /// Flushes to disk when dirty and the throttle window has passed.
    ///
    /// `force` bypasses the throttle (used at shutdown).  A failed flush
    /// keeps the cache dirty so the next call retries.
    pub fn maybe_flush(&mut self, force: bool) {
        if !self.dirty {
            return;
        }
        if !force && self.last_flush.elapsed() < self.min_interval {
            return;
        }
        match self.write_atomically() {
            Ok(()) => {
                self.dirty = false;
                self.last_flush = Instant::now();
                debug!(path = %self.path.display(), entries = self.entries.len(), "state flushed");
            }
            Err(e) => {
                warn!(path = %self.path.display(), "state flush failed: {e}");
            }
        }
    }

    fn write_atomically(&self) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("simbridge_state_{tag}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("state.json")
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let cache = LastStateCache::load(
            Path::new("/nonexistent/state.json"),
            Duration::from_secs(10),
        );
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let path = temp_state_path("malformed");
        std::fs::write(&path, "not json at all").unwrap();
        let cache = LastStateCache::load(&path, Duration::from_secs(10));
        assert!(cache.entries().is_empty());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_update_and_flush_round_trip() {
        let path = temp_state_path("roundtrip");
        let mut cache = LastStateCache::load(&path, Duration::from_secs(0));
        cache.update("TRIM_WHEEL", "512");
        cache.update("FLAPS_LEVER", "2");
        cache.maybe_flush(false);

        let restored = LastStateCache::load(&path, Duration::from_secs(10));
        assert_eq!(restored.get("TRIM_WHEEL"), Some("512"));
        assert_eq!(restored.get("FLAPS_LEVER"), Some("2"));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_unchanged_value_does_not_dirty() {
        let path = temp_state_path("clean");
        let mut cache = LastStateCache::load(&path, Duration::from_secs(0));
        cache.update("TRIM_WHEEL", "512");
        cache.maybe_flush(true);
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();

        // Same value again: not dirty, so no file is recreated.
        cache.update("TRIM_WHEEL", "512");
        cache.maybe_flush(true);
        assert!(!path.exists());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_throttle_defers_flush_until_forced() {
        let path = temp_state_path("throttle");
        let mut cache = LastStateCache::load(&path, Duration::from_secs(3600));
        cache.update("TRIM_WHEEL", "1");
        cache.maybe_flush(true); // opens the throttle window
        cache.update("TRIM_WHEEL", "2");
        cache.maybe_flush(false); // inside the window: deferred
        let on_disk = LastStateCache::load(&path, Duration::from_secs(10));
        assert_eq!(on_disk.get("TRIM_WHEEL"), Some("1"));

        cache.maybe_flush(true); // forced: flushes the pending value
        let on_disk = LastStateCache::load(&path, Duration::from_secs(10));
        assert_eq!(on_disk.get("TRIM_WHEEL"), Some("2"));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_no_leftover_temp_file_after_flush() {
        let path = temp_state_path("tmpfile");
        let mut cache = LastStateCache::load(&path, Duration::from_secs(0));
        cache.update("TRIM_WHEEL", "7");
        cache.maybe_flush(true);
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
