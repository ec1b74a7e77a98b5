//! 节点类型：目录（卷根、bucket、前缀目录）与对象文件。

use crate::cache::registry::CacheRegistry;
use crate::cadapter::client::ObjectBackend;
use crate::vfs::config::VfsConfig;
use crate::vfs::directory::DirectoryNode;
use crate::vfs::error::{Result, VfsError};
use crate::vfs::file::FileNode;
use crate::vfs::path::S3Path;
use crate::vfs::status::NodeStatus;
use std::sync::Arc;
use std::time::SystemTime;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0;

/// State shared by every node of one tree.
pub(crate) struct TreeContext {
    pub backend: Arc<dyn ObjectBackend>,
    pub registry: Arc<CacheRegistry>,
    pub config: VfsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub last_write_time: SystemTime,
    pub change_time: SystemTime,
    pub file_size: u64,
    pub allocation_size: u64,
    pub file_attributes: u32,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: String,
}

#[derive(Clone)]
pub enum Node {
    Directory(Arc<DirectoryNode>),
    File(Arc<FileNode>),
}

impl Node {
    pub fn name(&self) -> String {
        match self {
            Node::Directory(d) => d.name(),
            Node::File(f) => f.name(),
        }
    }

    pub fn path(&self) -> S3Path {
        match self {
            Node::Directory(d) => d.path(),
            Node::File(f) => f.path(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        match self {
            Node::Directory(d) => d.status(),
            Node::File(f) => f.status(),
        }
    }

    pub fn file_info(&self) -> FileInfo {
        match self {
            Node::Directory(d) => d.file_info(),
            Node::File(f) => f.file_info(),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    /// Tree operations are only defined on directories.
    pub fn as_directory(&self) -> Result<&Arc<DirectoryNode>> {
        match self {
            Node::Directory(d) => Ok(d),
            Node::File(f) => Err(VfsError::invalid("not a directory", f.path().to_fs_path())),
        }
    }

    /// Byte I/O is only defined on objects.
    pub fn as_file(&self) -> Result<&Arc<FileNode>> {
        match self {
            Node::File(f) => Ok(f),
            Node::Directory(d) => Err(VfsError::unsupported("byte I/O", d.path().to_fs_path())),
        }
    }

    pub async fn move_to(&self, new_path: &S3Path, replace_if_exists: bool) -> Result<Node> {
        match self {
            Node::Directory(d) => d.move_to(new_path, replace_if_exists).await.map(Node::Directory),
            Node::File(f) => f.move_to(new_path, replace_if_exists).await.map(|_| self.clone()),
        }
    }

    pub async fn delete(&self) -> Result<()> {
        match self {
            Node::Directory(d) => d.delete().await,
            Node::File(f) => f.delete().await,
        }
    }

    pub async fn delete_recursive(&self) -> Result<()> {
        match self {
            Node::Directory(d) => d.delete_recursive().await,
            Node::File(f) => f.delete().await,
        }
    }

    pub fn mark_for_deletion(&self) {
        match self {
            Node::Directory(d) => d.mark_for_deletion(),
            Node::File(f) => f.mark_for_deletion(),
        }
    }

    pub async fn persist_changes(&self) -> Result<()> {
        match self {
            Node::Directory(_) => Ok(()),
            Node::File(f) => f.persist_changes().await,
        }
    }

    pub async fn persist_changes_recursive(&self) -> Result<()> {
        match self {
            Node::Directory(d) => d.persist_changes_recursive().await,
            Node::File(f) => f.persist_changes().await,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Directory(d) => write!(f, "Directory({})", d.path()),
            Node::File(file) => write!(f, "File({})", file.path()),
        }
    }
}
