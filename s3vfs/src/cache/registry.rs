//! 进程级 BlockCache 注册表：按路径索引，容量以 block 计，脏条目不被淘汰。

use crate::cache::block::BlockCache;
use crate::cache::layout::BlockLayout;
use crate::cadapter::client::ObjectBackend;
use crate::vfs::error::Result;
use crate::vfs::path::S3Path;
use crate::vfs::status::SharedObjectState;
use moka::future::Cache;
use moka::notification::RemovalCause;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Pinned = Arc<Mutex<HashMap<String, Arc<BlockCache>>>>;

pub struct CacheRegistry {
    backend: Arc<dyn ObjectBackend>,
    layout: BlockLayout,
    entries: Cache<String, Arc<BlockCache>>,
    /// Dirty caches pushed out by the capacity bound; kept until they are clean.
    pinned: Pinned,
}

impl CacheRegistry {
    pub fn new(backend: Arc<dyn ObjectBackend>, layout: BlockLayout, capacity_blocks: u64) -> Self {
        let pinned: Pinned = Arc::new(Mutex::new(HashMap::new()));
        let pinned_evict = pinned.clone();
        let entries = Cache::builder()
            .weigher(|_: &String, v: &Arc<BlockCache>| v.weight())
            .max_capacity(capacity_blocks.max(1))
            .eviction_listener(move |key: Arc<String>, value: Arc<BlockCache>, cause| {
                if cause == RemovalCause::Size && value.is_dirty() {
                    debug!(path = %key, "pinning dirty cache entry");
                    pinned_evict
                        .lock()
                        .insert(key.as_ref().clone(), value);
                }
            })
            .build();
        info!(capacity_blocks, block_size = layout.block_size, "cache registry created");
        Self {
            backend,
            layout,
            entries,
            pinned,
        }
    }

    fn key_of(path: &S3Path) -> String {
        path.to_string()
    }

    /// Returns the cache for `path`, building it at most once under concurrent first access.
    pub async fn get_or_create(&self, path: &S3Path, state: SharedObjectState) -> Arc<BlockCache> {
        let key = Self::key_of(path);
        if let Some(cache) = self.take_pinned(&key).await {
            return cache;
        }
        let backend = self.backend.clone();
        let layout = self.layout;
        let path = path.clone();
        self.entries
            .get_with(key, async move {
                debug!(path = %path, "creating block cache");
                Arc::new(BlockCache::new(path, backend, layout, state))
            })
            .await
    }

    /// Looks in the pinned set; a clean pinned entry goes back under the capacity bound.
    async fn take_pinned(&self, key: &str) -> Option<Arc<BlockCache>> {
        let cache = {
            let mut pinned = self.pinned.lock();
            let cache = pinned.get(key)?.clone();
            if cache.is_dirty() {
                return Some(cache);
            }
            pinned.remove(key);
            cache
        };
        self.entries.insert(key.to_string(), cache.clone()).await;
        Some(cache)
    }

    pub async fn get(&self, path: &S3Path) -> Option<Arc<BlockCache>> {
        let key = Self::key_of(path);
        if let Some(cache) = self.pinned.lock().get(&key) {
            return Some(cache.clone());
        }
        self.entries.get(&key).await
    }

    /// Re-charges `cache` against the capacity bound after its resident size changed.
    pub async fn touch(&self, cache: &Arc<BlockCache>) {
        if !cache.take_weight_change() {
            return;
        }
        let key = Self::key_of(&cache.path());
        if self.pinned.lock().contains_key(&key) {
            return;
        }
        // moka weighs on insert; replacing the value re-evaluates the weigher
        self.entries.insert(key, cache.clone()).await;
    }

    /// Drops the entry for `path`, dirty or not.
    pub async fn invalidate(&self, path: &S3Path) {
        let key = Self::key_of(path);
        self.pinned.lock().remove(&key);
        self.entries.invalidate(&key).await;
    }

    /// Moves the entry for `old` to `new`, keeping resident blocks.
    pub async fn rehome(&self, old: &S3Path, new: &S3Path) {
        let old_key = Self::key_of(old);
        let pinned = self.pinned.lock().remove(&old_key);
        let cache = match pinned {
            Some(c) => Some(c),
            None => self.entries.remove(&old_key).await,
        };
        let new_key = Self::key_of(new);
        self.pinned.lock().remove(&new_key);
        match cache {
            Some(cache) => {
                cache.set_path(new.clone());
                debug!(from = %old, to = %new, "rehomed block cache");
                self.entries.insert(new_key, cache).await;
            }
            None => self.entries.invalidate(&new_key).await,
        }
    }

    /// Persists every dirty entry and returns how many were uploaded.
    pub async fn flush(&self) -> Result<usize> {
        let mut dirty: Vec<Arc<BlockCache>> = self
            .entries
            .iter()
            .filter(|(_, v)| v.is_dirty())
            .map(|(_, v)| v)
            .collect();
        dirty.extend(self.pinned.lock().values().cloned());

        let mut uploaded = 0;
        for cache in dirty {
            match cache.persist().await {
                Ok(true) => {
                    uploaded += 1;
                    self.touch(&cache).await;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(path = %cache.path(), error = %e, "flush failed");
                    return Err(e);
                }
            }
        }
        let clean: Vec<String> = self
            .pinned
            .lock()
            .iter()
            .filter(|(_, v)| !v.is_dirty())
            .map(|(k, _)| k.clone())
            .collect();
        for key in clean {
            self.take_pinned(&key).await;
        }
        info!(uploaded, "cache registry flushed");
        Ok(uploaded)
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.lock().len()
    }

    /// Resident weight of the bounded part, in block units.
    pub fn weighted_size(&self) -> u64 {
        self.entries.weighted_size()
    }

    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::InMemoryBackend;
    use crate::vfs::status::{NodeStatus, ObjectState};
    use std::time::SystemTime;

    fn registry(capacity: u64) -> (CacheRegistry, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_bucket("bk");
        let reg = CacheRegistry::new(backend.clone(), BlockLayout::new(16, 4), capacity);
        (reg, backend)
    }

    fn state(status: NodeStatus, size: u64) -> SharedObjectState {
        ObjectState::shared(status, size, size, SystemTime::now())
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (reg, _) = registry(16);
        let path = S3Path::new("bk", "a");
        let st = state(NodeStatus::New, 0);
        let a = reg.get_or_create(&path, st.clone()).await;
        let b = reg.get_or_create(&path, st).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_dirty_entries_survive_capacity_eviction() {
        let (reg, _) = registry(2);
        let mut caches = Vec::new();
        for i in 0..6 {
            let path = S3Path::new("bk", format!("f{i}"));
            let cache = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
            cache.write(0, b"dirty").await.unwrap();
            caches.push((path, cache));
        }
        reg.run_pending_tasks().await;
        assert!(reg.weighted_size() <= 2);
        for (path, cache) in &caches {
            let again = reg.get_or_create(path, state(NodeStatus::New, 0)).await;
            assert!(Arc::ptr_eq(cache, &again), "{path}");
        }
    }

    #[tokio::test]
    async fn test_clean_entries_are_evicted_not_pinned() {
        let (reg, _) = registry(2);
        for i in 0..6 {
            let path = S3Path::new("bk", format!("f{i}"));
            reg.get_or_create(&path, state(NodeStatus::Active, 10)).await;
        }
        reg.run_pending_tasks().await;
        assert_eq!(reg.pinned_count(), 0);
        assert!(reg.weighted_size() <= 2);
    }

    #[tokio::test]
    async fn test_rehome_keeps_cached_bytes() {
        let (reg, backend) = registry(16);
        let old = S3Path::new("bk", "old");
        let new = S3Path::new("bk", "new");
        let cache = reg.get_or_create(&old, state(NodeStatus::New, 0)).await;
        cache.write(0, b"payload").await.unwrap();

        reg.rehome(&old, &new).await;
        assert!(reg.get(&old).await.is_none());
        let moved = reg.get(&new).await.unwrap();
        assert!(Arc::ptr_eq(&cache, &moved));
        assert_eq!(moved.path(), new);

        assert_eq!(reg.flush().await.unwrap(), 1);
        assert_eq!(backend.object("bk", "new").unwrap(), b"payload");
        assert!(backend.object("bk", "old").is_none());
    }

    #[tokio::test]
    async fn test_weighted_size_follows_growth() {
        let (reg, _) = registry(1000);
        let path = S3Path::new("bk", "big");
        let cache = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
        cache.write(0, &vec![7u8; 64 * 100]).await.unwrap();
        reg.touch(&cache).await;
        reg.run_pending_tasks().await;
        assert_eq!(reg.weighted_size(), 100);

        cache.set_file_size(64 * 10, false).await.unwrap();
        reg.touch(&cache).await;
        reg.run_pending_tasks().await;
        assert_eq!(reg.weighted_size(), 10);
    }

    #[tokio::test]
    async fn test_grown_entry_is_bounded_by_capacity() {
        let (reg, backend) = registry(10);
        let path = S3Path::new("bk", "big");
        let cache = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
        cache.write(0, &vec![7u8; 64 * 100]).await.unwrap();
        reg.touch(&cache).await;
        reg.run_pending_tasks().await;
        // too heavy to stay resident, but dirty, so it is pinned
        assert!(reg.weighted_size() <= 10);
        assert_eq!(reg.pinned_count(), 1);

        assert_eq!(reg.flush().await.unwrap(), 1);
        reg.run_pending_tasks().await;
        assert_eq!(backend.object("bk", "big").unwrap().len(), 64 * 100);
        assert_eq!(reg.pinned_count(), 0);
        assert!(reg.weighted_size() <= 10);
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let (reg, _) = registry(16);
        let path = S3Path::new("bk", "x");
        let first = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
        reg.invalidate(&path).await;
        let second = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_flush_unpins_persisted_entries() {
        let (reg, backend) = registry(1);
        for i in 0..4 {
            let path = S3Path::new("bk", format!("f{i}"));
            let cache = reg.get_or_create(&path, state(NodeStatus::New, 0)).await;
            cache.write(0, &[i as u8; 4]).await.unwrap();
        }
        reg.run_pending_tasks().await;
        assert_eq!(reg.flush().await.unwrap(), 4);
        assert_eq!(backend.object_count("bk"), 4);
        assert_eq!(reg.pinned_count(), 0);
    }
}
