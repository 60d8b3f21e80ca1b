//! Content-addressed cache of analysis results.
//!
//! Entries are keyed by plugin id, a hash of the file path and a hash of
//! the file content, so an edited file misses automatically. An LRU memory
//! tier sits in front of an optional disk tier holding one JSON file per
//! key.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use warden_types::AnalysisResult;

use crate::config::CacheConfig;
use crate::lock;

/// SHA-256 of `bytes`, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn cache_key(plugin_id: &str, file_path: &Path, content_hash: &str) -> String {
    let path_hash = content_hash_of_path(file_path);
    format!("{plugin_id}:{path_hash}:{content_hash}")
}

fn content_hash_of_path(path: &Path) -> String {
    content_hash(path.to_string_lossy().as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    plugin_id: String,
    file_path: PathBuf,
    content_hash: String,
    result: AnalysisResult,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
}

struct MemoryTier {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

pub struct ResultCache {
    enabled: bool,
    ttl: chrono::Duration,
    memory: Mutex<MemoryTier>,
    directory: Option<PathBuf>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let directory = config.directory.as_ref().and_then(|dir| {
            match std::fs::create_dir_all(dir) {
                Ok(()) => Some(dir.clone()),
                Err(e) => {
                    warn!("Cache directory {:?} unavailable, using memory only: {}", dir, e);
                    None
                }
            }
        });
        let capacity = NonZeroUsize::new(config.memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            enabled: config.enabled,
            ttl: to_chrono(config.ttl()),
            memory: Mutex::new(MemoryTier {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            directory,
        }
    }

    /// Memory-only cache with the given capacity and TTL.
    pub fn in_memory(capacity: usize, ttl: Duration) -> Self {
        Self::new(&CacheConfig {
            enabled: true,
            memory_capacity: capacity,
            ttl_secs: 0,
            directory: None,
        })
        .with_ttl(ttl)
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = to_chrono(ttl);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, plugin_id: &str, file_path: &Path, content_hash: &str) -> Option<AnalysisResult> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(plugin_id, file_path, content_hash);
        let now = Utc::now();

        {
            let mut memory = lock(&self.memory);
            match memory.entries.get(&key).map(|e| e.is_live(now)) {
                Some(true) => {
                    memory.hits += 1;
                    return memory.entries.get(&key).map(|e| hit(&e.result));
                }
                Some(false) => {
                    memory.entries.pop(&key);
                    memory.misses += 1;
                    return None;
                }
                None => {}
            }
        }

        let from_disk = self.read_disk(&key).filter(|e| e.is_live(now));
        let mut memory = lock(&self.memory);
        match from_disk {
            Some(entry) => {
                memory.hits += 1;
                let result = hit(&entry.result);
                memory.entries.put(key, entry);
                Some(result)
            }
            None => {
                memory.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, plugin_id: &str, file_path: &Path, content_hash: &str, result: &AnalysisResult) {
        if !self.enabled {
            return;
        }
        let key = cache_key(plugin_id, file_path, content_hash);
        let created_at = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            plugin_id: plugin_id.to_string(),
            file_path: file_path.to_path_buf(),
            content_hash: content_hash.to_string(),
            result: result.clone(),
            created_at,
            expires_at: created_at + self.ttl,
        };
        self.write_disk(&entry);
        lock(&self.memory).entries.put(key, entry);
    }

    /// Drops every entry for `file_path`, across plugins.
    pub fn invalidate_file(&self, file_path: &Path) -> usize {
        self.invalidate(|e| e.file_path == file_path)
    }

    pub fn invalidate_plugin(&self, plugin_id: &str) -> usize {
        self.invalidate(|e| e.plugin_id == plugin_id)
    }

    /// Removes all entries and resets the counters.
    pub fn clear(&self) {
        {
            let mut memory = lock(&self.memory);
            memory.entries.clear();
            memory.hits = 0;
            memory.misses = 0;
        }
        for path in self.disk_files() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove cache file {:?}: {}", path, e);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses, memory_entries) = {
            let memory = lock(&self.memory);
            (memory.hits, memory.misses, memory.entries.len())
        };
        let files = self.disk_files();
        let disk_bytes = files
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            memory_entries,
            disk_entries: files.len(),
            disk_bytes,
        }
    }

    fn invalidate(&self, matches: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut removed = {
            let mut memory = lock(&self.memory);
            let keys: Vec<String> = memory
                .entries
                .iter()
                .filter(|(_, e)| matches(e))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                memory.entries.pop(key);
            }
            keys.len()
        };

        for path in self.disk_files() {
            let Some(entry) = read_entry(&path) else {
                continue;
            };
            if matches(&entry) {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove cache file {:?}: {}", path, e),
                }
            }
        }
        debug!(removed, "Cache entries invalidated");
        removed
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", content_hash(key.as_bytes()))))
    }

    fn read_disk(&self, key: &str) -> Option<CacheEntry> {
        let path = self.disk_path(key)?;
        if !path.exists() {
            return None;
        }
        read_entry(&path).filter(|e| e.key == key)
    }

    fn write_disk(&self, entry: &CacheEntry) {
        let Some(path) = self.disk_path(&entry.key) else {
            return;
        };
        let written = serde_json::to_vec(entry)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&path, bytes));
        if let Err(e) = written {
            warn!("Failed to write cache file {:?}: {}", path, e);
        }
    }

    fn disk_files(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.directory else {
            return Vec::new();
        };
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(e) => {
                warn!("Failed to list cache directory {:?}: {}", dir, e);
                Vec::new()
            }
        }
    }

    #[cfg(test)]
    fn disk_file_for(&self, plugin_id: &str, file_path: &Path, content_hash: &str) -> Option<PathBuf> {
        self.disk_path(&cache_key(plugin_id, file_path, content_hash))
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read cache file {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Ignoring corrupt cache file {:?}: {}", path, e);
            None
        }
    }
}

fn hit(result: &AnalysisResult) -> AnalysisResult {
    AnalysisResult {
        from_cache: true,
        ..result.clone()
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{Issue, Rule};

    fn result(path: &str) -> AnalysisResult {
        let issue = Issue::new("p", &Rule::new("R1", "t"), path, "m");
        AnalysisResult::succeeded(path, vec![issue], 3)
    }

    fn disk_cache(dir: &Path, ttl: Duration) -> ResultCache {
        ResultCache::new(&CacheConfig {
            enabled: true,
            memory_capacity: 10,
            ttl_secs: 0,
            directory: Some(dir.to_path_buf()),
        })
        .with_ttl(ttl)
    }

    #[test]
    fn round_trip_and_content_miss() {
        let cache = ResultCache::in_memory(10, Duration::from_secs(60));
        let path = Path::new("/ws/a.txt");
        let h1 = content_hash(b"one");
        let h2 = content_hash(b"two");

        assert!(cache.get("p", path, &h1).is_none());
        cache.put("p", path, &h1, &result("/ws/a.txt"));

        let cached = cache.get("p", path, &h1).unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.issues.len(), 1);
        assert!(cache.get("p", path, &h2).is_none());
        assert!(cache.get("other", path, &h1).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hit_rate, 0.25);
        assert_eq!(stats.memory_entries, 1);
    }

    #[test]
    fn lru_evicts_least_recent() {
        let cache = ResultCache::in_memory(2, Duration::from_secs(60));
        let h = content_hash(b"x");
        cache.put("p", Path::new("a"), &h, &result("a"));
        cache.put("p", Path::new("b"), &h, &result("b"));
        assert!(cache.get("p", Path::new("a"), &h).is_some());
        cache.put("p", Path::new("c"), &h, &result("c"));
        assert!(cache.get("p", Path::new("b"), &h).is_none());
        assert!(cache.get("p", Path::new("a"), &h).is_some());
        assert!(cache.get("p", Path::new("c"), &h).is_some());
    }

    #[test]
    fn disk_tier_survives_a_new_cache_instance() {
        let dir = tempfile::tempdir().unwrap();
        let h = content_hash(b"data");
        disk_cache(dir.path(), Duration::from_secs(60)).put("p", Path::new("/ws/a"), &h, &result("/ws/a"));

        let fresh = disk_cache(dir.path(), Duration::from_secs(60));
        assert_eq!(fresh.stats().memory_entries, 0);
        assert!(fresh.get("p", Path::new("/ws/a"), &h).is_some());
        assert_eq!(fresh.stats().memory_entries, 1);
        assert_eq!(fresh.stats().disk_entries, 1);
        assert!(fresh.stats().disk_bytes > 0);
    }

    #[test]
    fn expired_entries_miss_but_disk_file_remains_until_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(dir.path(), Duration::from_millis(50));
        let path = Path::new("/ws/a");
        let h = content_hash(b"data");
        cache.put("p", path, &h, &result("/ws/a"));
        let file = cache.disk_file_for("p", path, &h).unwrap();
        let first = std::fs::read(&file).unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(cache.get("p", path, &h).is_none());
        assert!(file.exists());
        assert_eq!(cache.stats().memory_entries, 0);

        cache.put("p", path, &h, &result("/ws/a"));
        assert!(file.exists());
        assert_ne!(std::fs::read(&file).unwrap(), first);
        assert!(cache.get("p", path, &h).is_some());
    }

    #[test]
    fn invalidation_by_file_and_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(dir.path(), Duration::from_secs(60));
        let h = content_hash(b"x");
        cache.put("p1", Path::new("a"), &h, &result("a"));
        cache.put("p2", Path::new("a"), &h, &result("a"));
        cache.put("p1", Path::new("b"), &h, &result("b"));

        cache.invalidate_file(Path::new("a"));
        assert!(cache.get("p1", Path::new("a"), &h).is_none());
        assert!(cache.get("p2", Path::new("a"), &h).is_none());
        assert!(cache.get("p1", Path::new("b"), &h).is_some());

        cache.invalidate_plugin("p1");
        assert!(cache.get("p1", Path::new("b"), &h).is_none());
        assert_eq!(cache.stats().disk_entries, 0);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(dir.path(), Duration::from_secs(60));
        let h = content_hash(b"x");
        cache.put("p", Path::new("a"), &h, &result("a"));
        cache.get("p", Path::new("a"), &h);
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ResultCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let h = content_hash(b"x");
        cache.put("p", Path::new("a"), &h, &result("a"));
        assert!(cache.get("p", Path::new("a"), &h).is_none());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn unusable_directory_degrades_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let cache = disk_cache(&blocker.join("cache"), Duration::from_secs(60));
        let h = content_hash(b"x");
        cache.put("p", Path::new("a"), &h, &result("a"));
        assert!(cache.get("p", Path::new("a"), &h).is_some());
        assert_eq!(cache.stats().disk_entries, 0);
    }
}
