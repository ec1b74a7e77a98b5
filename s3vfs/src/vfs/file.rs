//! 对象文件节点：元数据、经注册表获取 BlockCache、移动与删除。

use crate::cache::block::BlockCache;
use crate::vfs::directory::DirectoryNode;
use crate::vfs::error::{Result, VfsError};
use crate::vfs::node::{FILE_ATTRIBUTE_NORMAL, FileInfo, Node, TreeContext};
use crate::vfs::path::S3Path;
use crate::vfs::status::{NodeStatus, SharedObjectState};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub struct FileNode {
    ctx: Arc<TreeContext>,
    path: RwLock<S3Path>,
    state: SharedObjectState,
    parent: RwLock<Weak<DirectoryNode>>,
}

impl FileNode {
    pub(crate) fn new(
        ctx: Arc<TreeContext>,
        path: S3Path,
        parent: &Arc<DirectoryNode>,
        state: SharedObjectState,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            path: RwLock::new(path),
            state,
            parent: RwLock::new(Arc::downgrade(parent)),
        })
    }

    pub fn name(&self) -> String {
        self.path.read().name().to_string()
    }

    pub fn path(&self) -> S3Path {
        self.path.read().clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.state.lock().status
    }

    pub fn file_size(&self) -> u64 {
        self.state.lock().file_size
    }

    pub fn allocation_size(&self) -> u64 {
        self.state.lock().allocation_size
    }

    /// Whether an object exists remotely under the current path.
    pub fn has_remote(&self) -> bool {
        self.state.lock().remote
    }

    pub fn parent(&self) -> Option<Arc<DirectoryNode>> {
        self.parent.read().upgrade()
    }

    pub fn file_info(&self) -> FileInfo {
        let st = self.state.lock();
        FileInfo {
            creation_time: st.last_modified,
            last_access_time: st.last_modified,
            last_write_time: st.last_modified,
            change_time: st.last_modified,
            file_size: st.file_size,
            allocation_size: st.allocation_size,
            file_attributes: FILE_ATTRIBUTE_NORMAL,
        }
    }

    /// Block cache of this object, resolved through the registry on every call.
    pub async fn object_data(&self) -> Result<Arc<BlockCache>> {
        let path = self.path();
        if self.status() == NodeStatus::Deleted {
            return Err(VfsError::not_found(path.to_fs_path()));
        }
        Ok(self.ctx.registry.get_or_create(&path, self.state.clone()).await)
    }

    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let cache = self.object_data().await?;
        let out = cache.read(offset, len).await?;
        self.ctx.registry.touch(&cache).await;
        Ok(out)
    }

    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let cache = self.object_data().await?;
        cache.write(offset, data).await?;
        self.ctx.registry.touch(&cache).await;
        Ok(())
    }

    pub async fn set_file_size(&self, size: u64, set_allocated: bool) -> Result<()> {
        let cache = self.object_data().await?;
        cache.set_file_size(size, set_allocated).await?;
        self.ctx.registry.touch(&cache).await;
        Ok(())
    }

    /// Renames by server-side copy and delete, then re-parents the node.
    pub async fn move_to(self: &Arc<Self>, new_path: &S3Path, replace_if_exists: bool) -> Result<()> {
        let old_path = self.path();
        if self.status() == NodeStatus::Deleted {
            return Err(VfsError::not_found(old_path.to_fs_path()));
        }
        if *new_path == old_path {
            return Ok(());
        }
        if old_path.starts_with(new_path) {
            return Err(VfsError::invalid(
                "destination is an ancestor of the source",
                new_path.to_fs_path(),
            ));
        }
        let parent_path = new_path.parent().ok_or_else(|| {
            VfsError::invalid("destination is not an object path", new_path.to_fs_path())
        })?;
        let old_parent = self
            .parent()
            .ok_or_else(|| VfsError::invalid("node is detached", old_path.to_fs_path()))?;
        let root = old_parent.root();
        let new_parent = match root.lookup_node(&parent_path).await? {
            Some(Node::Directory(d)) => d,
            _ => return Err(VfsError::not_found(parent_path.to_fs_path())),
        };
        // merge the remote listing before the copy shows up in it
        new_parent.ensure_fetched().await?;
        if let Some(existing) = new_parent.child(new_path.name()) {
            if !replace_if_exists {
                return Err(VfsError::invalid("destination exists", new_path.to_fs_path()));
            }
            existing.delete_recursive().await?;
        }

        if self.has_remote() {
            self.ctx
                .backend
                .copy_object(old_path.bucket(), old_path.key(), new_path.bucket(), new_path.key())
                .await
                .map_err(VfsError::backend("copy_object"))?;
            self.ctx
                .backend
                .delete_object(old_path.bucket(), old_path.key())
                .await
                .map_err(VfsError::backend("delete_object"))?;
        }
        self.ctx.registry.rehome(&old_path, new_path).await;
        *self.path.write() = new_path.clone();

        old_parent.cache_remove(old_path.name())?;
        new_parent.cache_add(Node::File(self.clone()))?;
        *self.parent.write() = Arc::downgrade(&new_parent);
        info!(from = %old_path, to = %new_path, "moved object");
        Ok(())
    }

    /// Removes the remote object if one exists and detaches the node from its parent.
    pub async fn delete(&self) -> Result<()> {
        if self.status() == NodeStatus::Deleted {
            return Ok(());
        }
        let path = self.path();
        if self.has_remote() {
            self.ctx
                .backend
                .delete_object(path.bucket(), path.key())
                .await
                .map_err(VfsError::backend("delete_object"))?;
        }
        self.mark_deleted().await;
        if let Some(parent) = self.parent() {
            parent.cache_remove(path.name())?;
        }
        debug!(path = %path, "deleted object");
        Ok(())
    }

    /// Local bookkeeping once the remote object is gone.
    pub(crate) async fn mark_deleted(&self) {
        self.ctx.registry.invalidate(&self.path()).await;
        let mut st = self.state.lock();
        st.status = NodeStatus::Deleted;
        st.remote = false;
    }

    pub fn mark_for_deletion(&self) {
        let mut st = self.state.lock();
        if st.status != NodeStatus::Deleted {
            st.status = NodeStatus::MarkedForDeletion;
        }
    }

    /// Uploads the object when it is `New` or `Modified`.
    pub async fn persist_changes(&self) -> Result<()> {
        if !self.status().is_dirty() {
            return Ok(());
        }
        let cache = self.object_data().await?;
        cache.persist().await?;
        self.ctx.registry.touch(&cache).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{CallCounters, InMemoryBackend};
    use crate::vfs::config::VfsConfig;
    use crate::vfs::fs::S3Vfs;

    async fn file(vfs: &S3Vfs, fs_path: &str) -> Arc<FileNode> {
        vfs.lookup(fs_path).await.unwrap().as_file().unwrap().clone()
    }

    #[tokio::test]
    async fn test_listed_object_metadata() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("bk", "f.bin", &[1u8; 5000]);
        let vfs = S3Vfs::new(backend, VfsConfig::default());
        let f = file(&vfs, "/bk/f.bin").await;
        let info = f.file_info();
        assert_eq!(info.file_size, 5000);
        assert_eq!(info.allocation_size, 8192);
        assert!(!info.is_directory());
        assert_eq!(f.status(), NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_move_copies_then_deletes_and_reparents() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("a", "foo.txt", b"hello");
        backend.insert("b", "bar/keep", b"k");
        let vfs = S3Vfs::new(backend.clone(), VfsConfig::default());
        let f = file(&vfs, "/a/foo.txt").await;
        f.move_to(&S3Path::new("b", "bar/foo.txt"), false).await.unwrap();

        assert_eq!(CallCounters::get(&backend.calls.copy_object), 1);
        assert!(backend.object("a", "foo.txt").is_none());
        assert_eq!(backend.object("b", "bar/foo.txt").unwrap(), b"hello");
        assert_eq!(f.path(), S3Path::new("b", "bar/foo.txt"));
        assert_eq!(f.parent().unwrap().path(), S3Path::new("b", "bar"));
        assert!(vfs.lookup("/a/foo.txt").await.is_err());
        let moved = file(&vfs, "/b/bar/foo.txt").await;
        assert!(Arc::ptr_eq(&f, &moved));
        assert_eq!(moved.read(0, 5).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_move_of_unpersisted_file_stays_local() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_bucket("bk");
        let vfs = S3Vfs::new(backend.clone(), VfsConfig::default());
        let f = vfs.create_file("/bk/draft").await.unwrap();
        f.write(0, b"draft bytes").await.unwrap();
        f.move_to(&S3Path::new("bk", "final"), false).await.unwrap();
        assert_eq!(CallCounters::get(&backend.calls.copy_object), 0);
        assert_eq!(backend.object_count("bk"), 0);

        f.persist_changes().await.unwrap();
        assert_eq!(backend.object("bk", "final").unwrap(), b"draft bytes");
    }

    #[tokio::test]
    async fn test_move_with_replace_overwrites_destination() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("bk", "src", b"new");
        backend.insert("bk", "dst", b"old");
        let vfs = S3Vfs::new(backend.clone(), VfsConfig::default());
        let src = file(&vfs, "/bk/src").await;
        let dst = file(&vfs, "/bk/dst").await;
        src.move_to(&S3Path::new("bk", "dst"), true).await.unwrap();
        assert_eq!(dst.status(), NodeStatus::Deleted);
        assert_eq!(backend.object("bk", "dst").unwrap(), b"new");
        assert_eq!(backend.object_count("bk"), 1);
    }

    #[tokio::test]
    async fn test_delete_skips_remote_for_new_file() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.create_bucket("bk");
        let vfs = S3Vfs::new(backend.clone(), VfsConfig::default());
        let f = vfs.create_file("/bk/tmp").await.unwrap();
        f.delete().await.unwrap();
        assert_eq!(f.status(), NodeStatus::Deleted);
        assert_eq!(CallCounters::get(&backend.calls.delete_object), 0);
        assert!(matches!(f.read(0, 1).await, Err(VfsError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_marked_file_still_deletes_remote() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("bk", "f", b"x");
        let vfs = S3Vfs::new(backend.clone(), VfsConfig::default());
        let f = file(&vfs, "/bk/f").await;
        f.mark_for_deletion();
        assert_eq!(f.status(), NodeStatus::MarkedForDeletion);
        f.delete().await.unwrap();
        assert!(backend.object("bk", "f").is_none());
    }
}
