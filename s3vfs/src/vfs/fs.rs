//! 面向 OS 适配层的入口：持有注册表与卷根，按文件系统路径解析节点。

use crate::cache::registry::CacheRegistry;
use crate::cadapter::client::{ObjectBackend, ObjectClient};
use crate::vfs::config::VfsConfig;
use crate::vfs::directory::DirectoryNode;
use crate::vfs::error::{Result, VfsError};
use crate::vfs::file::FileNode;
use crate::vfs::node::{Node, TreeContext, VolumeInfo};
use crate::vfs::path::S3Path;
use std::sync::Arc;
use tracing::info;

pub struct S3Vfs {
    ctx: Arc<TreeContext>,
    root: Arc<DirectoryNode>,
}

impl S3Vfs {
    pub fn new(backend: Arc<dyn ObjectBackend>, config: VfsConfig) -> Self {
        let registry = Arc::new(CacheRegistry::new(
            backend.clone(),
            config.layout,
            config.cache_capacity_blocks,
        ));
        let ctx = Arc::new(TreeContext {
            backend,
            registry,
            config,
        });
        let root = DirectoryNode::new_root(ctx.clone());
        info!(volume = %ctx.config.volume_name, "volume created");
        Self { ctx, root }
    }

    pub fn with_client<B: ObjectBackend + 'static>(client: ObjectClient<B>, config: VfsConfig) -> Self {
        Self::new(client.into_dyn(), config)
    }

    pub fn root(&self) -> &Arc<DirectoryNode> {
        &self.root
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.ctx.registry
    }

    pub fn config(&self) -> &VfsConfig {
        &self.ctx.config
    }

    fn parse(fs_path: &str) -> Result<S3Path> {
        S3Path::from_fs_path(fs_path).ok_or_else(|| VfsError::InvalidPath(fs_path.to_string()))
    }

    pub async fn lookup_path(&self, path: &S3Path) -> Result<Option<Node>> {
        self.root.lookup_node(path).await
    }

    /// Resolves a file-system path; the empty path and `/` name the volume root.
    pub async fn lookup(&self, fs_path: &str) -> Result<Node> {
        match S3Path::from_fs_path(fs_path) {
            None => Ok(Node::Directory(self.root.clone())),
            Some(path) => self
                .root
                .lookup_node(&path)
                .await?
                .ok_or_else(|| VfsError::not_found(path.to_fs_path())),
        }
    }

    pub async fn list(&self, fs_path: &str, after_marker: Option<&str>) -> Result<Vec<Node>> {
        let node = self.lookup(fs_path).await?;
        node.as_directory()?.get_children(after_marker).await
    }

    async fn parent_dir(&self, path: &S3Path) -> Result<Arc<DirectoryNode>> {
        let Some(parent) = path.parent() else {
            return Ok(self.root.clone());
        };
        match self.root.lookup_node(&parent).await? {
            Some(node) => Ok(node.as_directory()?.clone()),
            None => Err(VfsError::not_found(parent.to_fs_path())),
        }
    }

    pub async fn create_file(&self, fs_path: &str) -> Result<Arc<FileNode>> {
        let path = Self::parse(fs_path)?;
        self.parent_dir(&path).await?.create_file(&path).await
    }

    pub async fn create_directory(&self, fs_path: &str) -> Result<Arc<DirectoryNode>> {
        let path = Self::parse(fs_path)?;
        self.parent_dir(&path).await?.create_directory(&path).await
    }

    /// Reads at most `len` bytes; reads at or past end of file return nothing.
    pub async fn read_file(&self, file: &FileNode, offset: u64, len: usize) -> Result<Vec<u8>> {
        let size = file.file_size();
        if offset >= size {
            return Ok(Vec::new());
        }
        let len = len.min((size - offset) as usize);
        file.read(offset, len).await
    }

    pub async fn write_file(&self, file: &FileNode, offset: u64, data: &[u8]) -> Result<()> {
        file.write(offset, data).await
    }

    pub async fn rename(&self, from: &str, to: &str, replace_if_exists: bool) -> Result<Node> {
        let node = self.lookup(from).await?;
        let target = Self::parse(to)?;
        node.move_to(&target, replace_if_exists).await
    }

    pub async fn remove(&self, fs_path: &str, recursive: bool) -> Result<()> {
        let node = self.lookup(fs_path).await?;
        if recursive {
            node.delete_recursive().await
        } else {
            node.delete().await
        }
    }

    pub fn volume_info(&self) -> VolumeInfo {
        VolumeInfo {
            total_size: self.ctx.config.volume_size,
            free_size: self.ctx.config.volume_size,
            volume_label: self.ctx.config.volume_name.clone(),
        }
    }

    /// Persists every pending change: local-only files first, then whatever
    /// the registry still holds dirty.
    pub async fn flush(&self) -> Result<()> {
        self.root.persist_changes_recursive().await?;
        let uploaded = self.ctx.registry.flush().await?;
        info!(uploaded, "volume flushed");
        Ok(())
    }
}
