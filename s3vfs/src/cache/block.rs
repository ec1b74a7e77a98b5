//! BlockCache：单个对象的块级读写缓存，按需下载缺失块，合并部分块写入，整体回写。

use crate::cache::layout::{BlockLayout, split_range_into_blocks};
use crate::cadapter::client::ObjectBackend;
use crate::vfs::error::{Result, VfsError};
use crate::vfs::path::S3Path;
use crate::vfs::status::{NodeStatus, SharedObjectState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One cached block. `None` data means not fetched / not allocated.
struct Block {
    data: Option<Box<[u8]>>,
}

struct CacheInner {
    blocks: BTreeMap<u64, Block>,
    /// Remote size at open time; bytes at or past it are never fetched.
    original_size: u64,
    /// Bumped on every local mutation so a persist can detect writes it did not upload.
    generation: u64,
}

pub struct BlockCache {
    path: RwLock<S3Path>,
    backend: Arc<dyn ObjectBackend>,
    layout: BlockLayout,
    state: SharedObjectState,
    inner: Mutex<CacheInner>,
    persist_gate: Mutex<()>,
    /// Resident blocks, kept current under `inner`.
    weight: AtomicU32,
    /// Weight the registry last charged for this cache.
    charged: AtomicU32,
}

impl BlockCache {
    pub fn new(
        path: S3Path,
        backend: Arc<dyn ObjectBackend>,
        layout: BlockLayout,
        state: SharedObjectState,
    ) -> Self {
        let original_size = {
            let st = state.lock();
            if st.status == NodeStatus::New {
                0
            } else {
                st.file_size
            }
        };
        Self {
            path: RwLock::new(path),
            backend,
            layout,
            state,
            inner: Mutex::new(CacheInner {
                blocks: BTreeMap::new(),
                original_size,
                generation: 0,
            }),
            persist_gate: Mutex::new(()),
            weight: AtomicU32::new(1),
            charged: AtomicU32::new(1),
        }
    }

    pub fn path(&self) -> S3Path {
        self.path.read().clone()
    }

    /// Re-associates cached data with a moved object.
    pub(crate) fn set_path(&self, path: S3Path) {
        *self.path.write() = path;
    }

    pub fn file_size(&self) -> u64 {
        self.state.lock().file_size
    }

    pub fn allocation_size(&self) -> u64 {
        self.state.lock().allocation_size
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().status.is_dirty()
    }

    /// Capacity cost in block units: the resident block count, at least 1.
    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Acquire)
    }

    fn reweigh(&self, inner: &CacheInner) {
        let resident = inner.blocks.values().filter(|b| b.data.is_some()).count();
        let weight = u32::try_from(resident).unwrap_or(u32::MAX).max(1);
        self.weight.store(weight, Ordering::Release);
    }

    /// Records the current weight as charged; `true` when it differs from the last charge.
    pub(crate) fn take_weight_change(&self) -> bool {
        let weight = self.weight();
        self.charged.swap(weight, Ordering::AcqRel) != weight
    }

    pub async fn original_size(&self) -> u64 {
        self.inner.lock().await.original_size
    }

    pub async fn resident_blocks(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.blocks.values().filter(|b| b.data.is_some()).count()
    }

    /// Downloads block `index` if it is absent and overlaps the remote object.
    async fn ensure_resident(&self, inner: &mut CacheInner, index: u64) -> Result<()> {
        if inner.blocks.get(&index).is_some_and(|b| b.data.is_some()) {
            return Ok(());
        }
        let start = self.layout.block_start(index);
        if start >= inner.original_size {
            return Ok(());
        }
        let end = (start + self.layout.block_size as u64).min(inner.original_size);
        let path = self.path();
        debug!(path = %path, index, start, end, "downloading block");
        let bytes = self
            .backend
            .get_object_range(path.bucket(), path.key(), start, end)
            .await
            .map_err(VfsError::backend("get_object"))?;
        let mut buf = vec![0u8; self.layout.block_size as usize];
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        inner.blocks.insert(
            index,
            Block {
                data: Some(buf.into_boxed_slice()),
            },
        );
        self.reweigh(inner);
        Ok(())
    }

    async fn read_locked(&self, inner: &mut CacheInner, offset: u64, len: usize) -> Result<Vec<u8>> {
        let spans = split_range_into_blocks(self.layout, offset, len);
        for sp in &spans {
            self.ensure_resident(inner, sp.block_index).await?;
        }
        let mut out = Vec::with_capacity(len);
        for sp in spans {
            let start = sp.offset_in_block as usize;
            let end = start + sp.len_in_block as usize;
            match inner.blocks.get(&sp.block_index).and_then(|b| b.data.as_deref()) {
                Some(data) => out.extend_from_slice(&data[start..end]),
                // 未写入的洞返回 0
                None => out.resize(out.len() + sp.len_in_block as usize, 0),
            }
        }
        Ok(out)
    }

    /// Returns exactly `len` bytes starting at `offset`; holes read as zero.
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().await;
        self.read_locked(&mut inner, offset, len).await
    }

    /// Merges `data` into the cached blocks and extends the logical size if needed.
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        let bs = self.layout.block_size as usize;
        let mut cursor = 0usize;
        for sp in split_range_into_blocks(self.layout, offset, data.len()) {
            let absent = !inner
                .blocks
                .get(&sp.block_index)
                .is_some_and(|b| b.data.is_some());
            if absent && !sp.is_full(self.layout) {
                // read-modify-write: keep previously persisted bytes around the write
                self.ensure_resident(&mut inner, sp.block_index).await?;
            }
            let block = inner.blocks.entry(sp.block_index).or_insert(Block { data: None });
            let buf = block
                .data
                .get_or_insert_with(|| vec![0u8; bs].into_boxed_slice());
            let start = sp.offset_in_block as usize;
            let take = sp.len_in_block as usize;
            buf[start..start + take].copy_from_slice(&data[cursor..cursor + take]);
            cursor += take;
        }
        inner.generation += 1;
        self.reweigh(&inner);

        let end = offset + data.len() as u64;
        let mut st = self.state.lock();
        if end > st.file_size {
            st.file_size = end;
            st.allocation_size = st.allocation_size.max(self.layout.allocation_size(end));
        }
        st.status = st.status.modified();
        st.last_modified = SystemTime::now();
        Ok(())
    }

    /// Sets the logical size (`set_allocated == false`, allocation follows) or the
    /// allocated size (`set_allocated == true`, logical size is clamped to it).
    pub async fn set_file_size(&self, size: u64, set_allocated: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let (old_size, new_size, bound) = {
            let mut st = self.state.lock();
            let old_size = st.file_size;
            if set_allocated {
                st.allocation_size = size;
                st.file_size = st.file_size.min(size);
            } else {
                st.file_size = size;
                st.allocation_size = self.layout.allocation_size(size);
            }
            let new_size = st.file_size;
            if new_size != old_size {
                st.status = st.status.modified();
                st.last_modified = SystemTime::now();
            }
            (old_size, new_size, st.allocation_size)
        };

        if new_size < old_size || bound < new_size.max(old_size) {
            self.truncate_locked(&mut inner, new_size.min(bound));
        }
        if new_size != old_size {
            inner.generation += 1;
        }
        Ok(())
    }

    /// Drops blocks at or past `size` and zeroes the tail of the boundary block.
    fn truncate_locked(&self, inner: &mut CacheInner, size: u64) {
        if size == 0 {
            inner.blocks.clear();
        } else {
            let keep = self.layout.blocks_for(size);
            inner.blocks.retain(|&idx, _| idx < keep);
            let tail = self.layout.within_block_offset(size) as usize;
            if tail != 0 {
                let idx = self.layout.block_index_of(size);
                if let Some(data) = inner.blocks.get_mut(&idx).and_then(|b| b.data.as_mut()) {
                    data[tail..].fill(0);
                }
            }
        }
        inner.original_size = inner.original_size.min(size);
        self.reweigh(inner);
    }

    /// Uploads the whole logical content when the object is `New` or `Modified`.
    ///
    /// Returns whether an upload happened. Concurrent callers wait for the
    /// in-flight upload and then observe a clean status.
    pub async fn persist(&self) -> Result<bool> {
        let _gate = self.persist_gate.lock().await;
        if !self.is_dirty() {
            return Ok(false);
        }

        let (bytes, generation) = {
            let mut inner = self.inner.lock().await;
            let size = self.file_size();
            let bytes = self.read_locked(&mut inner, 0, size as usize).await?;
            (bytes, inner.generation)
        };

        let path = self.path();
        self.backend
            .put_object(path.bucket(), path.key(), &bytes)
            .await
            .map_err(VfsError::backend("put_object"))?;
        info!(path = %path, size = bytes.len(), "persisted object");

        let mut inner = self.inner.lock().await;
        inner.original_size = bytes.len() as u64;
        let mut st = self.state.lock();
        st.remote = true;
        if st.status.is_dirty() {
            st.status = if inner.generation == generation {
                NodeStatus::Active
            } else {
                NodeStatus::Modified
            };
        }
        Ok(true)
    }

    /// Drops all resident blocks. Refused while unpersisted data is held.
    pub async fn clear_cache(&self) -> bool {
        if self.is_dirty() {
            return false;
        }
        let mut inner = self.inner.lock().await;
        inner.blocks.clear();
        self.reweigh(&inner);
        true
    }
}
