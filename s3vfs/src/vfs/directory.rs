//! Directory nodes: the volume root, buckets and key-prefix directories.
//!
//! Children are populated lazily by one paginated delimited listing per node
//! and kept consistent in memory afterwards by create/move/delete.

use crate::cadapter::client::MAX_DELETE_BATCH;
use crate::vfs::error::{ChildSetError, Result, VfsError};
use crate::vfs::file::FileNode;
use crate::vfs::node::{FILE_ATTRIBUTE_DIRECTORY, FileInfo, Node, TreeContext};
use crate::vfs::path::S3Path;
use crate::vfs::status::{NodeStatus, ObjectState};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Volume,
    Bucket { creation_date: SystemTime },
    Prefix,
}

/// Children of one directory, unique by name across directories and files.
#[derive(Default)]
pub struct ChildSet {
    dirs: BTreeMap<String, Arc<DirectoryNode>>,
    files: BTreeMap<String, Arc<FileNode>>,
}

impl ChildSet {
    pub fn get(&self, name: &str) -> Option<Node> {
        if let Some(d) = self.dirs.get(name) {
            return Some(Node::Directory(d.clone()));
        }
        self.files.get(name).map(|f| Node::File(f.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dirs.contains_key(name) || self.files.contains_key(name)
    }

    pub fn insert(&mut self, node: Node) -> std::result::Result<(), ChildSetError> {
        let name = node.name();
        if self.contains(&name) {
            return Err(ChildSetError::Duplicate(name));
        }
        match node {
            Node::Directory(d) => {
                self.dirs.insert(name, d);
            }
            Node::File(f) => {
                self.files.insert(name, f);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> std::result::Result<Node, ChildSetError> {
        if let Some(d) = self.dirs.remove(name) {
            return Ok(Node::Directory(d));
        }
        self.files
            .remove(name)
            .map(Node::File)
            .ok_or_else(|| ChildSetError::Missing(name.to_string()))
    }

    /// Directories first, then files, each by name.
    pub fn ordered(&self) -> Vec<Node> {
        self.dirs
            .values()
            .cloned()
            .map(Node::Directory)
            .chain(self.files.values().cloned().map(Node::File))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dirs.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct DirectoryNode {
    ctx: Arc<TreeContext>,
    kind: DirectoryKind,
    path: S3Path,
    status: Mutex<NodeStatus>,
    parent: Weak<DirectoryNode>,
    children: RwLock<ChildSet>,
    /// Keys equal to this directory's own prefix (`dir/` marker objects).
    markers: Mutex<Vec<String>>,
    fetched: OnceCell<()>,
}

impl DirectoryNode {
    pub(crate) fn new_root(ctx: Arc<TreeContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            kind: DirectoryKind::Volume,
            path: S3Path::root(),
            status: Mutex::new(NodeStatus::Active),
            parent: Weak::new(),
            children: RwLock::new(ChildSet::default()),
            markers: Mutex::new(Vec::new()),
            fetched: OnceCell::new(),
        })
    }

    fn new_child(self: &Arc<Self>, kind: DirectoryKind, path: S3Path, status: NodeStatus) -> Arc<Self> {
        Arc::new(Self {
            ctx: self.ctx.clone(),
            kind,
            path,
            status: Mutex::new(status),
            parent: Arc::downgrade(self),
            children: RwLock::new(ChildSet::default()),
            markers: Mutex::new(Vec::new()),
            fetched: OnceCell::new(),
        })
    }

    pub fn name(&self) -> String {
        match self.kind {
            DirectoryKind::Volume => self.ctx.config.volume_name.clone(),
            _ => self.path.name().to_string(),
        }
    }

    pub fn path(&self) -> S3Path {
        self.path.clone()
    }

    pub fn kind(&self) -> DirectoryKind {
        self.kind
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: NodeStatus) {
        *self.status.lock() = status;
    }

    pub fn parent(&self) -> Option<Arc<DirectoryNode>> {
        self.parent.upgrade()
    }

    pub fn root(self: &Arc<Self>) -> Arc<DirectoryNode> {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    pub fn file_info(&self) -> FileInfo {
        let created = match self.kind {
            DirectoryKind::Bucket { creation_date } => creation_date,
            _ => SystemTime::UNIX_EPOCH,
        };
        FileInfo {
            creation_time: created,
            last_access_time: created,
            last_write_time: created,
            change_time: created,
            file_size: 0,
            allocation_size: 0,
            file_attributes: FILE_ATTRIBUTE_DIRECTORY,
        }
    }

    /// Whether the remote listing has been merged into the child set.
    pub fn is_fetched(&self) -> bool {
        self.fetched.initialized()
    }

    /// Runs the remote listing at most once. A failed listing may be retried.
    pub async fn ensure_fetched(self: &Arc<Self>) -> Result<()> {
        if matches!(self.status(), NodeStatus::New | NodeStatus::Deleted) {
            return Ok(());
        }
        self.fetched
            .get_or_try_init(|| self.fetch_listing())
            .await
            .map(|_| ())
    }

    async fn fetch_listing(self: &Arc<Self>) -> Result<()> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut markers = Vec::new();
        match self.kind {
            DirectoryKind::Volume => {
                let buckets = self
                    .ctx
                    .backend
                    .list_buckets()
                    .await
                    .map_err(VfsError::backend("list_buckets"))?;
                debug!(count = buckets.len(), "listed buckets");
                for b in buckets {
                    dirs.push(self.new_child(
                        DirectoryKind::Bucket {
                            creation_date: b.creation_date,
                        },
                        S3Path::bucket_root(b.name),
                        NodeStatus::Active,
                    ));
                }
            }
            DirectoryKind::Bucket { .. } | DirectoryKind::Prefix => {
                let prefix = self.path.dir_prefix();
                let layout = self.ctx.config.layout;
                let mut token = None;
                let mut pages = 0usize;
                loop {
                    let page = self
                        .ctx
                        .backend
                        .list_objects(self.path.bucket(), &prefix, "/", token.take())
                        .await
                        .map_err(VfsError::backend("list_objects"))?;
                    pages += 1;
                    debug!(
                        path = %self.path,
                        page = pages,
                        prefixes = page.common_prefixes.len(),
                        objects = page.objects.len(),
                        "listing page"
                    );
                    for p in &page.common_prefixes {
                        let name = p.strip_prefix(prefix.as_str()).unwrap_or(p.as_str()).trim_end_matches('/');
                        if name.is_empty() || name.contains('/') {
                            continue;
                        }
                        dirs.push(self.new_child(
                            DirectoryKind::Prefix,
                            self.path.append(name),
                            NodeStatus::Active,
                        ));
                    }
                    for obj in page.objects {
                        let name = obj.key.strip_prefix(prefix.as_str()).unwrap_or(obj.key.as_str());
                        // "dir/" marker objects describe the directory itself
                        if name.is_empty() {
                            markers.push(obj.key);
                            continue;
                        }
                        if name.contains('/') {
                            continue;
                        }
                        let state = ObjectState::shared(
                            NodeStatus::Active,
                            obj.size,
                            layout.allocation_size(obj.size),
                            obj.last_modified,
                        );
                        files.push(FileNode::new(self.ctx.clone(), self.path.append(name), self, state));
                    }
                    match page.next_continuation_token {
                        Some(t) => token = Some(t),
                        None => break,
                    }
                }
            }
        }

        *self.markers.lock() = markers;
        let mut children = self.children.write();
        for d in dirs {
            if !children.contains(&d.name()) {
                children.insert(Node::Directory(d))?;
            }
        }
        for f in files {
            let name = f.name();
            if children.dirs.contains_key(&name) {
                warn!(path = %f.path(), "object shadowed by a prefix of the same name");
                continue;
            }
            if !children.contains(&name) {
                children.insert(Node::File(f))?;
            }
        }
        Ok(())
    }

    /// In-memory child lookup, without triggering a fetch.
    pub fn child(&self, name: &str) -> Option<Node> {
        self.children.read().get(name)
    }

    async fn find_child(self: &Arc<Self>, name: &str) -> Result<Option<Node>> {
        if let Some(node) = self.child(name) {
            return Ok(Some(node));
        }
        if self.is_fetched() {
            return Ok(None);
        }
        self.ensure_fetched().await?;
        Ok(self.child(name))
    }

    /// Resolves `path` below this directory. `None` when nothing lives there
    /// or the path is not under this node.
    pub async fn lookup_node(self: &Arc<Self>, path: &S3Path) -> Result<Option<Node>> {
        if *path == self.path {
            return Ok(Some(Node::Directory(self.clone())));
        }
        let Some(segments) = path.relative_to(&self.path) else {
            return Ok(None);
        };
        let mut dir = self.clone();
        let last = segments.len().saturating_sub(1);
        for (i, seg) in segments.iter().enumerate() {
            match dir.find_child(seg).await? {
                None => return Ok(None),
                Some(Node::Directory(d)) if i == last => return Ok(Some(Node::Directory(d))),
                Some(Node::Directory(d)) => dir = d,
                Some(Node::File(f)) if i == last => return Ok(Some(Node::File(f))),
                Some(Node::File(_)) => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Ordered children, or the tail strictly after the child named `after_marker`.
    pub async fn get_children(self: &Arc<Self>, after_marker: Option<&str>) -> Result<Vec<Node>> {
        self.ensure_fetched().await?;
        let all = self.children.read().ordered();
        let Some(marker) = after_marker else {
            return Ok(all);
        };
        Ok(match all.iter().position(|n| n.name() == marker) {
            Some(idx) => all[idx + 1..].to_vec(),
            None => Vec::new(),
        })
    }

    fn check_child_path(&self, path: &S3Path) -> Result<()> {
        if self.status() == NodeStatus::Deleted {
            return Err(VfsError::not_found(self.path.to_fs_path()));
        }
        if path.parent().as_ref() != Some(&self.path) {
            return Err(VfsError::invalid(
                format!("not a direct child of {}", self.path.to_fs_path()),
                path.to_fs_path(),
            ));
        }
        Ok(())
    }

    fn insert_new(&self, node: Node) -> Result<()> {
        let mut children = self.children.write();
        if children.contains(&node.name()) {
            return Err(VfsError::collision(node.path().to_fs_path()));
        }
        children.insert(node)?;
        Ok(())
    }

    /// Creates an empty local object; nothing reaches the store until it is persisted.
    pub async fn create_file(self: &Arc<Self>, path: &S3Path) -> Result<Arc<FileNode>> {
        if self.kind == DirectoryKind::Volume {
            return Err(VfsError::unsupported("create file", path.to_fs_path()));
        }
        self.check_child_path(path)?;
        self.ensure_fetched().await?;
        let state = ObjectState::shared(NodeStatus::New, 0, 0, SystemTime::now());
        let file = FileNode::new(self.ctx.clone(), path.clone(), self, state);
        self.insert_new(Node::File(file.clone()))?;
        debug!(path = %path, "created file");
        Ok(file)
    }

    pub async fn create_directory(self: &Arc<Self>, path: &S3Path) -> Result<Arc<DirectoryNode>> {
        if self.kind == DirectoryKind::Volume {
            return Err(VfsError::unsupported("create bucket", path.to_fs_path()));
        }
        self.check_child_path(path)?;
        self.ensure_fetched().await?;
        let dir = self.new_child(DirectoryKind::Prefix, path.clone(), NodeStatus::New);
        // nothing remote to list, whatever the status becomes later
        let _ = dir.fetched.set(());
        self.insert_new(Node::Directory(dir.clone()))?;
        debug!(path = %path, "created directory");
        Ok(dir)
    }

    /// Moves every descendant below `new_path` and removes this directory.
    ///
    /// Not atomic: a failure part-way leaves children split between both places.
    pub fn move_to<'a>(
        self: &'a Arc<Self>,
        new_path: &'a S3Path,
        replace_if_exists: bool,
    ) -> BoxFuture<'a, Result<Arc<DirectoryNode>>> {
        Box::pin(async move {
            if self.kind != DirectoryKind::Prefix {
                return Err(VfsError::unsupported("move", self.path.to_fs_path()));
            }
            if self.status() == NodeStatus::Deleted {
                return Err(VfsError::not_found(self.path.to_fs_path()));
            }
            if *new_path == self.path {
                return Ok(self.clone());
            }
            if new_path.starts_with(&self.path) {
                return Err(VfsError::invalid(
                    "destination lies inside the source",
                    new_path.to_fs_path(),
                ));
            }
            if self.path.starts_with(new_path) {
                return Err(VfsError::invalid(
                    "destination is an ancestor of the source",
                    new_path.to_fs_path(),
                ));
            }
            let parent_path = new_path.parent().ok_or_else(|| {
                VfsError::invalid("destination is not inside a bucket", new_path.to_fs_path())
            })?;
            let root = self.root();
            let new_parent = match root.lookup_node(&parent_path).await? {
                Some(Node::Directory(d)) => d,
                _ => return Err(VfsError::not_found(parent_path.to_fs_path())),
            };
            if let Some(existing) = root.lookup_node(new_path).await? {
                if !replace_if_exists {
                    return Err(VfsError::invalid("destination exists", new_path.to_fs_path()));
                }
                existing.delete_recursive().await?;
            }

            info!(from = %self.path, to = %new_path, "moving directory");
            let dest = new_parent.create_directory(new_path).await?;
            for child in self.get_children(None).await? {
                let target = new_path.append(&child.name());
                child.move_to(&target, false).await?;
            }
            dest.mark_populated();

            let remaining = self.children.read().len();
            if remaining != 0 {
                return Err(VfsError::invalid(
                    format!("{remaining} children left after move"),
                    self.path.to_fs_path(),
                ));
            }
            self.delete().await?;
            Ok(dest)
        })
    }

    /// Marks a locally built directory as mirroring remote content.
    fn mark_populated(&self) {
        let _ = self.fetched.set(());
        self.set_status(NodeStatus::Active);
    }

    /// Removes this directory, which must be empty.
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        if self.kind == DirectoryKind::Volume {
            return Err(VfsError::unsupported("delete", self.path.to_fs_path()));
        }
        if self.status() == NodeStatus::Deleted {
            return Ok(());
        }
        self.ensure_fetched().await?;
        let count = self.children.read().len();
        if count != 0 {
            return Err(VfsError::invalid("directory not empty", self.path.to_fs_path()));
        }
        let markers = self.markers.lock().clone();
        for key in &markers {
            self.ctx
                .backend
                .delete_object(self.path.bucket(), key)
                .await
                .map_err(VfsError::backend("delete_object"))?;
            self.markers.lock().retain(|k| k != key);
        }
        if let DirectoryKind::Bucket { .. } = self.kind {
            self.ctx
                .backend
                .delete_bucket(self.path.bucket())
                .await
                .map_err(VfsError::backend("delete_bucket"))?;
        }
        self.set_status(NodeStatus::Deleted);
        if let Some(parent) = self.parent() {
            parent.cache_remove(&self.name())?;
        }
        debug!(path = %self.path, "deleted directory");
        Ok(())
    }

    /// Deletes everything below this directory, then the directory itself.
    /// A no-op on the volume root.
    pub async fn delete_recursive(self: &Arc<Self>) -> Result<()> {
        if self.kind == DirectoryKind::Volume {
            return Ok(());
        }
        self.delete_tree(true).await
    }

    /// `unregister == false` leaves removal from the parent's set to the caller.
    ///
    /// Local state follows the store: a node is dropped only once its remote
    /// deletion succeeded, so a failure leaves everything not yet deleted in place.
    fn delete_tree(self: &Arc<Self>, unregister: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.status() == NodeStatus::Deleted {
                return Ok(());
            }
            self.ensure_fetched().await?;
            let (dirs, files): (Vec<_>, Vec<_>) = {
                let children = self.children.read();
                (
                    children.dirs.values().cloned().collect(),
                    children.files.values().cloned().collect(),
                )
            };

            for dir in dirs {
                dir.delete_tree(false).await?;
                self.cache_remove(&dir.name())?;
            }

            let (remote, local): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| f.has_remote());
            let mut targets: Vec<(String, Option<Arc<FileNode>>)> = remote
                .into_iter()
                .map(|f| (f.path().key().to_string(), Some(f)))
                .collect();
            targets.extend(self.markers.lock().iter().map(|k| (k.clone(), None)));
            for chunk in targets.chunks(MAX_DELETE_BATCH) {
                let keys: Vec<String> = chunk.iter().map(|(k, _)| k.clone()).collect();
                self.ctx
                    .backend
                    .delete_objects(self.path.bucket(), &keys)
                    .await
                    .map_err(VfsError::backend("delete_objects"))?;
                debug!(path = %self.path, count = keys.len(), "bulk deleted objects");
                for (key, file) in chunk {
                    match file {
                        Some(f) => {
                            f.mark_deleted().await;
                            self.cache_remove(&f.name())?;
                        }
                        None => {
                            self.markers.lock().retain(|k| k != key);
                        }
                    }
                }
            }

            if let DirectoryKind::Bucket { .. } = self.kind {
                self.ctx
                    .backend
                    .delete_bucket(self.path.bucket())
                    .await
                    .map_err(VfsError::backend("delete_bucket"))?;
                info!(bucket = self.path.bucket(), "deleted bucket");
            }
            for f in local {
                f.mark_deleted().await;
                self.cache_remove(&f.name())?;
            }
            self.set_status(NodeStatus::Deleted);
            if unregister {
                if let Some(parent) = self.parent() {
                    parent.cache_remove(&self.name())?;
                }
            }
            Ok(())
        })
    }

    pub fn mark_for_deletion(&self) {
        let mut status = self.status.lock();
        if *status != NodeStatus::Deleted {
            *status = NodeStatus::MarkedForDeletion;
        }
    }

    /// Persists every loaded descendant. Unfetched directories hold no local changes.
    pub fn persist_changes_recursive(self: &Arc<Self>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let children = self.children.read().ordered();
            for child in children {
                match child {
                    Node::Directory(d) => d.persist_changes_recursive().await?,
                    Node::File(f) => f.persist_changes().await?,
                }
            }
            Ok(())
        })
    }

    pub fn cache_add(&self, node: Node) -> Result<()> {
        self.children.write().insert(node)?;
        Ok(())
    }

    pub fn cache_remove(&self, name: &str) -> Result<Node> {
        Ok(self.children.write().remove(name)?)
    }
}
