//! Persisted build cache: module identifier -> last-built fingerprint.
//!
//! The cache file is a flat JSON object, human-inspectable, with no expiry
//! or versioning. Entries for modules not touched by the current run are
//! preserved verbatim. Loading never fails: an absent or unparsable file
//! yields an empty cache. The orchestrator persists the cache after every
//! module so a kill mid-run loses at most the in-flight module's result.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::fingerprint::Fingerprint;

/// Default cache file name in the working root.
pub const CACHE_FILE: &str = "make.cache";

#[derive(Debug, Clone, Default)]
pub struct BuildCache {
    entries: BTreeMap<String, Fingerprint>,
}

impl BuildCache {
    /// Load the cache from `path`, falling back to empty on any problem.
    pub fn load(path: &Path) -> Self {
        let entries = fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self { entries }
    }

    pub fn get(&self, module_id: &str) -> Option<&str> {
        self.entries.get(module_id).map(String::as_str)
    }

    pub fn put(&mut self, module_id: String, fingerprint: Fingerprint) {
        self.entries.insert(module_id, fingerprint);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache to `path` via a temp file and atomic rename.
    ///
    /// Callers treat a failure here as non-fatal: the run continues with the
    /// in-memory cache and retries on the next module's commit.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = path.with_extension("cache.tmp");
        fs::write(&tmp, bytes)
            .with_context(|| format!("writing cache temp file '{}'", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("moving cache into place at '{}'", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = BuildCache::load(&tmp.path().join(CACHE_FILE));
        assert!(cache.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_FILE);
        fs::write(&path, "{not json").unwrap();
        let cache = BuildCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_FILE);

        let mut cache = BuildCache::default();
        cache.put("addons/alpha".to_string(), "abc123".to_string());
        cache.put("addons/beta".to_string(), "def456".to_string());
        cache.persist(&path).unwrap();

        let reloaded = BuildCache::load(&path);
        assert_eq!(reloaded.get("addons/alpha"), Some("abc123"));
        assert_eq!(reloaded.get("addons/beta"), Some("def456"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn stale_keys_survive_updates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_FILE);

        let mut cache = BuildCache::default();
        cache.put("removed/module".to_string(), "old".to_string());
        cache.persist(&path).unwrap();

        let mut cache = BuildCache::load(&path);
        cache.put("addons/alpha".to_string(), "new".to_string());
        cache.persist(&path).unwrap();

        let reloaded = BuildCache::load(&path);
        assert_eq!(reloaded.get("removed/module"), Some("old"));
        assert_eq!(reloaded.get("addons/alpha"), Some("new"));
    }
}
