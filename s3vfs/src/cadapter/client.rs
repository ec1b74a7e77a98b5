//! High-level client API for the object store
//!
//! Every remote call the node tree makes goes through [`ObjectBackend`]. The
//! trait mirrors the subset of the S3 protocol the file system needs: bucket
//! listing, delimited object listing, ranged reads, whole-object writes,
//! single and bulk deletes, server-side copy and bucket deletion.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

pub type BackendError = Box<dyn std::error::Error + Send + Sync>;
pub type BackendResult<T> = Result<T, BackendError>;

/// Hard limit of keys per bulk-delete request imposed by S3.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: SystemTime,
}

/// One page of a delimited listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Full prefixes including the trailing delimiter, e.g. `a/b/`.
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectInfo>,
    /// `Some` while the listing is truncated.
    pub next_continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn list_buckets(&self) -> BackendResult<Vec<BucketInfo>>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage>;

    /// Reads `[start, end)` of the object. The backend may return fewer bytes
    /// when the object is shorter than `end`.
    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> BackendResult<Vec<u8>>;

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> BackendResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()>;

    /// Deletes up to [`MAX_DELETE_BATCH`] keys in one request.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> BackendResult<()>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> BackendResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()>;
}

/// Thin generic wrapper over a concrete backend.
pub struct ObjectClient<B: ObjectBackend> {
    backend: B,
}

impl<B: ObjectBackend + 'static> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Type-erased handle shared by every node of a volume.
    pub fn into_dyn(self) -> Arc<dyn ObjectBackend> {
        Arc::new(self.backend)
    }
}

pub(crate) fn check_batch(keys: &[String]) -> BackendResult<()> {
    if keys.len() > MAX_DELETE_BATCH {
        return Err(format!(
            "bulk delete of {} keys exceeds the limit of {MAX_DELETE_BATCH}",
            keys.len()
        )
        .into());
    }
    Ok(())
}
