//! 内存对象存储：用于单元测试，记录每类远程调用的次数。

use crate::cadapter::client::{
    BackendResult, BucketInfo, ListPage, ObjectBackend, ObjectInfo, check_batch,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

struct StoredObject {
    data: Vec<u8>,
    last_modified: SystemTime,
}

struct StoredBucket {
    creation_date: SystemTime,
    objects: BTreeMap<String, StoredObject>,
}

/// Remote call counters, one per backend operation.
#[derive(Default, Debug)]
pub struct CallCounters {
    pub list_buckets: AtomicUsize,
    pub list_objects: AtomicUsize,
    pub get_object: AtomicUsize,
    pub put_object: AtomicUsize,
    pub delete_object: AtomicUsize,
    pub delete_objects: AtomicUsize,
    pub copy_object: AtomicUsize,
    pub delete_bucket: AtomicUsize,
    /// Sizes of every bulk-delete batch, in call order.
    pub delete_batches: Mutex<Vec<usize>>,
}

impl CallCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct InMemoryBackend {
    buckets: Mutex<BTreeMap<String, StoredBucket>>,
    page_size: usize,
    /// Remaining injected failures, by operation name.
    faults: Mutex<HashMap<&'static str, usize>>,
    pub calls: CallCounters,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            faults: Mutex::new(HashMap::new()),
            calls: CallCounters::default(),
        }
    }

    /// Caps the number of entries per listing page, to exercise pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Makes the next `times` calls of `op` (named like the trait method, e.g.
    /// `"delete_objects"`) fail without touching the store.
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.faults.lock().insert(op, times);
    }

    fn injected(&self, op: &'static str) -> BackendResult<()> {
        let mut faults = self.faults.lock();
        match faults.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(format!("injected failure: {op}").into())
            }
            _ => Ok(()),
        }
    }

    pub fn create_bucket(&self, name: &str) {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(name.to_string())
            .or_insert_with(|| StoredBucket {
                creation_date: SystemTime::now(),
                objects: BTreeMap::new(),
            });
    }

    /// Seeds an object without counting it as a remote call.
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        self.create_bucket(bucket);
        let mut buckets = self.buckets.lock();
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    last_modified: SystemTime::now(),
                },
            );
        }
    }

    /// Snapshot of an object, bypassing call accounting.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.lock();
        buckets.get(bucket).map(|b| b.objects.len()).unwrap_or(0)
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().contains_key(bucket)
    }
}

/// 按 S3 语义对有序 key 列表做分隔符分组与分页。
///
/// `entries` must be sorted by key. The continuation token is the last key or
/// common prefix returned on the previous page.
pub(crate) fn paginate<I>(
    entries: I,
    prefix: &str,
    delimiter: &str,
    continuation_token: Option<&str>,
    page_size: usize,
) -> ListPage
where
    I: IntoIterator<Item = ObjectInfo>,
{
    let mut page = ListPage::default();
    let mut emitted = 0usize;
    let mut last_token: Option<String> = None;

    for info in entries {
        let Some(rest) = info.key.strip_prefix(prefix) else {
            continue;
        };
        if let Some(token) = continuation_token {
            if info.key.as_str() <= token {
                continue;
            }
            if token.ends_with(delimiter) && !delimiter.is_empty() && info.key.starts_with(token) {
                continue;
            }
        }

        let entry = match (!delimiter.is_empty()).then(|| rest.find(delimiter)).flatten() {
            Some(idx) => {
                let common = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                if page.common_prefixes.last() == Some(&common) {
                    continue;
                }
                Err(common)
            }
            None => Ok(info),
        };

        if emitted == page_size {
            page.next_continuation_token = last_token;
            return page;
        }
        emitted += 1;
        match entry {
            Ok(info) => {
                last_token = Some(info.key.clone());
                page.objects.push(info);
            }
            Err(common) => {
                last_token = Some(common.clone());
                page.common_prefixes.push(common);
            }
        }
    }
    page
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn list_buckets(&self) -> BackendResult<Vec<BucketInfo>> {
        CallCounters::bump(&self.calls.list_buckets);
        self.injected("list_buckets")?;
        let buckets = self.buckets.lock();
        Ok(buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                creation_date: b.creation_date,
            })
            .collect())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage> {
        CallCounters::bump(&self.calls.list_objects);
        self.injected("list_objects")?;
        let buckets = self.buckets.lock();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| format!("NoSuchBucket: {bucket}"))?;
        let entries = b.objects.iter().map(|(key, o)| ObjectInfo {
            key: key.clone(),
            size: o.data.len() as u64,
            last_modified: o.last_modified,
        });
        Ok(paginate(
            entries,
            prefix,
            delimiter,
            continuation_token.as_deref(),
            self.page_size,
        ))
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> BackendResult<Vec<u8>> {
        CallCounters::bump(&self.calls.get_object);
        self.injected("get_object_range")?;
        let buckets = self.buckets.lock();
        let obj = buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .ok_or_else(|| format!("NoSuchKey: {bucket}/{key}"))?;
        let len = obj.data.len() as u64;
        let s = start.min(len) as usize;
        let e = end.min(len) as usize;
        Ok(obj.data[s..e].to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> BackendResult<()> {
        CallCounters::bump(&self.calls.put_object);
        self.injected("put_object")?;
        let mut buckets = self.buckets.lock();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| format!("NoSuchBucket: {bucket}"))?;
        b.objects.insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()> {
        CallCounters::bump(&self.calls.delete_object);
        self.injected("delete_object")?;
        let mut buckets = self.buckets.lock();
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.remove(key);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> BackendResult<()> {
        check_batch(keys)?;
        CallCounters::bump(&self.calls.delete_objects);
        self.injected("delete_objects")?;
        self.calls.delete_batches.lock().push(keys.len());
        let mut buckets = self.buckets.lock();
        if let Some(b) = buckets.get_mut(bucket) {
            for key in keys {
                b.objects.remove(key);
            }
        }
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> BackendResult<()> {
        CallCounters::bump(&self.calls.copy_object);
        self.injected("copy_object")?;
        let mut buckets = self.buckets.lock();
        let data = buckets
            .get(src_bucket)
            .and_then(|b| b.objects.get(src_key))
            .map(|o| o.data.clone())
            .ok_or_else(|| format!("NoSuchKey: {src_bucket}/{src_key}"))?;
        let dst = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| format!("NoSuchBucket: {dst_bucket}"))?;
        dst.objects.insert(
            dst_key.to_string(),
            StoredObject {
                data,
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()> {
        CallCounters::bump(&self.calls.delete_bucket);
        self.injected("delete_bucket")?;
        let mut buckets = self.buckets.lock();
        match buckets.get(bucket) {
            Some(b) if !b.objects.is_empty() => Err(format!("BucketNotEmpty: {bucket}").into()),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
            None => Err(format!("NoSuchBucket: {bucket}").into()),
        }
    }
}
