//! 本地文件目录后端，用于 mock 存储适配器（实现 ObjectBackend）。
//!
//! Each subdirectory of `root` is a bucket; every regular file below it is an
//! object whose key is its `/`-joined relative path.

use crate::cadapter::client::{
    BackendResult, BucketInfo, ListPage, ObjectBackend, ObjectInfo, check_batch,
};
use crate::cadapter::memory::{DEFAULT_PAGE_SIZE, paginate};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

pub struct LocalFsBackend {
    root: PathBuf,
    page_size: usize,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn bucket_dir(&self, bucket: &str) -> BackendResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(format!("invalid bucket name {bucket:?}").into());
        }
        Ok(self.root.join(bucket))
    }

    fn path_for(&self, bucket: &str, key: &str) -> BackendResult<PathBuf> {
        let mut path = self.bucket_dir(bucket)?;
        for part in key.split('/') {
            let valid = matches!(Path::new(part).components().next(), Some(Component::Normal(_)));
            if part.is_empty() || !valid {
                return Err(format!("invalid object key {key:?}").into());
            }
            path.push(part);
        }
        Ok(path)
    }

    async fn walk_bucket(&self, bucket: &str) -> BackendResult<Vec<ObjectInfo>> {
        let base = self.bucket_dir(bucket)?;
        if fs::metadata(&base).await.is_err() {
            return Err(format!("NoSuchBucket: {bucket}").into());
        }
        let mut out = Vec::new();
        let mut pending = vec![(base, String::new())];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = format!("{key_prefix}{name}");
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if meta.is_file() {
                    out.push(ObjectInfo {
                        key,
                        size: meta.len(),
                        last_modified: meta.modified()?,
                    });
                }
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn list_buckets(&self) -> BackendResult<Vec<BucketInfo>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_dir() {
                continue;
            }
            let creation_date = meta.created().or_else(|_| meta.modified())?;
            out.push(BucketInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                creation_date,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<String>,
    ) -> BackendResult<ListPage> {
        let entries = self.walk_bucket(bucket).await?;
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
        let path = self.path_for(bucket, key)?;
        let mut f = fs::File::open(path).await?;
        let len = f.metadata().await?.len();
        let s = start.min(len);
        let e = end.min(len);
        let mut buf = vec![0u8; (e - s) as usize];
        f.seek(SeekFrom::Start(s)).await?;
        f.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> BackendResult<()> {
        let path = self.path_for(bucket, key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()> {
        let path = self.path_for(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Box::new(e)),
        }
        // 清理空目录，保持与对象存储一致的"无空前缀"语义
        let base = self.bucket_dir(bucket)?;
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            if d == base || fs::remove_dir(&d).await.is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> BackendResult<()> {
        check_batch(keys)?;
        for key in keys {
            self.delete_object(bucket, key).await?;
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
        let src = self.path_for(src_bucket, src_key)?;
        let dst = self.path_for(dst_bucket, dst_key)?;
        if let Some(dir) = dst.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::copy(src, dst).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()> {
        if !self.walk_bucket(bucket).await?.is_empty() {
            return Err(format!("BucketNotEmpty: {bucket}").into());
        }
        fs::remove_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localfs_put_list_range() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("photos")).await.unwrap();
        let backend = LocalFsBackend::new(tmp.path());

        backend.put_object("photos", "2024/a.jpg", b"0123456789").await.unwrap();
        backend.put_object("photos", "readme", b"hi").await.unwrap();

        let buckets = backend.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].name, "photos");

        let page = backend.list_objects("photos", "", "/", None).await.unwrap();
        assert_eq!(page.common_prefixes, vec!["2024/"]);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "readme");

        let part = backend
            .get_object_range("photos", "2024/a.jpg", 3, 6)
            .await
            .unwrap();
        assert_eq!(part, b"345");
    }

    #[tokio::test]
    async fn test_localfs_delete_prunes_and_bucket_delete() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("b")).await.unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        backend.put_object("b", "x/y/z", b"1").await.unwrap();

        assert!(backend.delete_bucket("b").await.is_err());
        backend.delete_objects("b", &["x/y/z".to_string()]).await.unwrap();
        assert!(!tmp.path().join("b/x").exists());
        backend.delete_bucket("b").await.unwrap();
        assert!(!tmp.path().join("b").exists());
    }

    #[tokio::test]
    async fn test_localfs_rejects_escaping_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        assert!(backend.put_object("b", "../evil", b"x").await.is_err());
        assert!(backend.put_object("b", "dir/", b"x").await.is_err());
    }
}
