//! In-process LRU cache with a per-entry time to live.

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quick_cache::unsync;

use super::{Cache, SavedBinary};
use crate::Result;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 1024;
/// Default time to live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const SHARDS: usize = 16;

type Shard = unsync::Cache<String, (SavedBinary, Instant)>;

/// Sharded in-memory cache.
///
/// Entries expire passively: an entry older than the TTL is dropped by the
/// next `load` that sees it.
pub struct MemoryCache {
    shards: Vec<Mutex<Shard>>,
    per_shard: usize,
    ttl: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl MemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let per_shard = (capacity / SHARDS).max(1);
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(Shard::new(per_shard)))
            .collect();
        Self {
            shards,
            per_shard,
            ttl,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<Shard> {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }
}

impl Cache for MemoryCache {
    fn load(&self, key: &str) -> Result<Option<SavedBinary>> {
        let mut shard = self.shard(key).lock();
        let fresh = shard
            .get(key)
            .map(|(binary, saved_at)| (saved_at.elapsed() < self.ttl).then(|| binary.clone()));
        match fresh {
            None => Ok(None),
            Some(Some(binary)) => Ok(Some(binary)),
            Some(None) => {
                shard.remove(key);
                log::debug!("cache entry {} expired", key);
                Ok(None)
            }
        }
    }

    fn save(&self, key: &str, binary: &SavedBinary) -> Result<()> {
        self.shard(key)
            .lock()
            .insert(key.to_string(), (binary.clone(), Instant::now()));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        for shard in &self.shards {
            *shard.lock() = Shard::new(self.per_shard);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(content: &str) -> SavedBinary {
        SavedBinary {
            content: content.as_bytes().to_vec(),
            last_updated: 1,
            last_etag: String::new(),
        }
    }

    #[test]
    fn test_save_load() {
        let cache = MemoryCache::default();
        assert_eq!(cache.load("a").unwrap(), None);
        cache.save("a", &binary("one")).unwrap();
        cache.save("a", &binary("two")).unwrap();
        assert_eq!(cache.load("a").unwrap(), Some(binary("two")));
        assert_eq!(cache.load("b").unwrap(), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MemoryCache::new(16, Duration::from_millis(20));
        cache.save("a", &binary("one")).unwrap();
        assert!(cache.load("a").unwrap().is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.load("a").unwrap(), None);
    }

    #[test]
    fn test_close_clears() {
        let cache = MemoryCache::default();
        cache.save("a", &binary("one")).unwrap();
        cache.close().unwrap();
        assert_eq!(cache.load("a").unwrap(), None);
    }
}
