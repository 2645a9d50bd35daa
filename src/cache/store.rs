//! Distributed cache seam.
//!
//! The production key-value store is an external capability; the pipeline
//! only depends on the `DistributedCache` trait. `InMemoryCache` is the
//! in-process implementation used by default and in tests: sharded maps
//! with per-entry expiry and best-effort glob invalidation.
//!
//! Failure semantics: callers treat every error as a miss. Nothing in the
//! prediction path may fail because the cache is down.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Best-effort deletion of every key matching a glob pattern
    /// (`family:*`, `family:*:version`). Returns the number removed.
    /// Not atomic across keys; concurrent readers may still observe
    /// entries mid-invalidation.
    async fn invalidate_pattern(&self, pattern: &str) -> anyhow::Result<u64>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

const SHARD_COUNT: usize = 16;

/// Sharded in-process cache with lazy expiry.
pub struct InMemoryCache {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Drop expired entries across all shards. Called opportunistically by
    /// the maintenance loop; correctness does not depend on it because
    /// reads check expiry themselves.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, e| e.expires_at > now);
            removed += before - map.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DistributedCache for InMemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let shard = self.shard_for(key);
        {
            let map = shard.read();
            match map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    metrics::counter!("cache_get_hit", 1);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    metrics::counter!("cache_get_miss", 1);
                    return Ok(None);
                }
            }
        }
        // Expired: take the write lock and evict lazily.
        shard.write().remove(key);
        metrics::counter!("cache_get_miss", 1);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.shard_for(key).write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.shard_for(key).write().remove(key);
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> anyhow::Result<u64> {
        let mut removed = 0u64;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|k, _| !glob_match(pattern, k));
            removed += (before - map.len()) as u64;
        }
        metrics::counter!("cache_invalidated_keys", removed);
        Ok(removed)
    }
}

/// Minimal glob: `*` matches any run of characters, everything else is
/// literal. Sufficient for the two invalidation shapes the pipeline uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(seg) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(seg);
        } else {
            match rest.find(seg) {
                Some(pos) => rest = &rest[pos + seg.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = InMemoryCache::new();
        cache
            .set("print_time:abc:1.0.0", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let got = cache.get("print_time:abc:1.0.0").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"payload"[..]));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_single_key() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("a", b"1".to_vec(), ttl).await.unwrap();
        cache.set("b", b"2".to_vec(), ttl).await.unwrap();

        cache.delete("a").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pattern_invalidation_scopes_to_family() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("print_time:aaa:1.0.0", b"1".to_vec(), ttl).await.unwrap();
        cache.set("print_time:bbb:1.0.0", b"2".to_vec(), ttl).await.unwrap();
        cache.set("demand_forecast:ccc:1.0.0", b"3".to_vec(), ttl).await.unwrap();

        let removed = cache.invalidate_pattern("print_time:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("print_time:aaa:1.0.0").await.unwrap().is_none());
        assert!(cache.get("demand_forecast:ccc:1.0.0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_version_scoped_pattern() {
        let cache = InMemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("print_time:aaa:1.0.0", b"1".to_vec(), ttl).await.unwrap();
        cache.set("print_time:aaa:1.1.0", b"2".to_vec(), ttl).await.unwrap();

        cache.invalidate_pattern("print_time:*:1.0.0").await.unwrap();
        assert!(cache.get("print_time:aaa:1.0.0").await.unwrap().is_none());
        assert!(cache.get("print_time:aaa:1.1.0").await.unwrap().is_some());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("print_time:*", "print_time:abc:1.0.0"));
        assert!(glob_match("print_time:*:1.0.0", "print_time:abc:1.0.0"));
        assert!(!glob_match("print_time:*:1.0.0", "print_time:abc:1.1.0"));
        assert!(!glob_match("demand_forecast:*", "print_time:abc:1.0.0"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
    }

    #[test]
    fn test_purge_expired() {
        let cache = InMemoryCache::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            cache.set("a", b"1".to_vec(), Duration::from_millis(1)).await.unwrap();
            cache.set("b", b"2".to_vec(), Duration::from_secs(60)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
