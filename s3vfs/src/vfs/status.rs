//! Node lifecycle state and the per-object metadata shared with the block cache.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// In sync with the remote store.
    Active,
    /// Local content differs from the remote object.
    Modified,
    /// Created locally, never uploaded.
    New,
    /// Delete on final close; no remote effect by itself.
    MarkedForDeletion,
    /// Terminal.
    Deleted,
}

impl NodeStatus {
    /// Whether a remote counterpart exists that must be removed on delete.
    pub fn is_persisted(self) -> bool {
        matches!(self, NodeStatus::Active | NodeStatus::Modified)
    }

    /// Whether local state still needs an upload.
    pub fn is_dirty(self) -> bool {
        matches!(self, NodeStatus::New | NodeStatus::Modified)
    }

    /// `Active` becomes `Modified`; other states are kept.
    pub fn modified(self) -> NodeStatus {
        match self {
            NodeStatus::Active => NodeStatus::Modified,
            other => other,
        }
    }
}

/// Status and sizes of one object, mirrored between the file node and its block cache.
#[derive(Debug, Clone)]
pub struct ObjectState {
    pub status: NodeStatus,
    pub file_size: u64,
    pub allocation_size: u64,
    pub last_modified: SystemTime,
    /// A remote object exists under the current path.
    pub remote: bool,
}

pub type SharedObjectState = Arc<Mutex<ObjectState>>;

impl ObjectState {
    pub fn shared(status: NodeStatus, file_size: u64, allocation_size: u64, last_modified: SystemTime) -> SharedObjectState {
        Arc::new(Mutex::new(Self {
            status,
            file_size,
            allocation_size,
            last_modified,
            remote: status.is_persisted(),
        }))
    }
}
