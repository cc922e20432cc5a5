use std::time::Duration;

use bytes::Bytes;
use cloudraid_common::MIB;
use tracing::debug;

use crate::cache::{CacheStats, HeatCache};

#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    pub max_bytes: usize,
    /// Files larger than this are never cached whole.
    pub max_file_size: usize,
    pub ttl: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: (256 * MIB) as usize,
            max_file_size: (32 * MIB) as usize,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Whole-file cache in front of the stripe path, keyed by path. Shares the
/// TTL + heat eviction policy of [crate::ChunkCache] and additionally gates
/// admission on file size.
pub struct FileCache {
    max_file_size: usize,
    inner: HeatCache<String>,
}

impl FileCache {
    pub fn new(config: FileCacheConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            inner: HeatCache::new(config.max_bytes, config.ttl),
        }
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.inner.get(&path.to_string())
    }

    pub fn put(&self, path: &str, data: Bytes) {
        if data.len() > self.max_file_size {
            debug!(path, len = data.len(), "file too large to cache");
            return;
        }
        self.inner.put(path.to_string(), data)
    }

    pub fn invalidate(&self, path: &str) {
        self.inner.invalidate(&path.to_string())
    }

    /// Drop every cached file under `prefix` (used when a directory is
    /// renamed or removed).
    pub fn invalidate_prefix(&self, prefix: &str) {
        let dir_prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.inner
            .invalidate_if(|path| path == prefix || path.starts_with(&dir_prefix));
    }

    pub fn cleanup_expired(&self) {
        self.inner.cleanup_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache() -> FileCache {
        FileCache::new(FileCacheConfig {
            max_bytes: 1 << 20,
            max_file_size: 64 << 10,
            ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn size_gate() {
        let cache = small_cache();
        cache.put("/big", Bytes::from(vec![0u8; 128 << 10]));
        assert!(cache.get("/big").is_none());
        cache.put("/small", Bytes::from(vec![0u8; 16 << 10]));
        assert!(cache.get("/small").is_some());
    }

    #[test]
    fn prefix_invalidation() {
        let cache = small_cache();
        cache.put("/a/x", Bytes::from_static(b"1"));
        cache.put("/a/y/z", Bytes::from_static(b"2"));
        cache.put("/ab", Bytes::from_static(b"3"));
        cache.invalidate_prefix("/a");
        assert!(cache.get("/a/x").is_none());
        assert!(cache.get("/a/y/z").is_none());
        assert!(cache.get("/ab").is_some(), "sibling with shared name prefix stays");
    }
}
