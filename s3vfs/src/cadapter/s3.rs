//! S3 适配器：基于 aws-sdk-s3 的实现，支持分页列举、范围读取、批量删除与基础重试。

use crate::cadapter::client::{
    BackendResult, BucketInfo, ListPage, ObjectBackend, ObjectInfo, check_batch,
};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

/// S3 后端配置选项
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3-compatible endpoint, e.g. `http://127.0.0.1:9000/`
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the environment provider is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Path-style addressing (`endpoint/bucket/key`), required by most self-hosted stores.
    pub force_path_style: bool,
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始重试延迟（毫秒）
    pub initial_retry_delay_ms: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: true,
            max_retries: 3,
            initial_retry_delay_ms: 100,
        }
    }
}

const MAX_RETRY_DELAY_MS: u64 = 30_000;

pub struct S3Backend {
    client: Client,
    config: S3Config,
}

fn to_system_time(dt: Option<&DateTime>) -> SystemTime {
    dt.and_then(|d| SystemTime::try_from(*d).ok())
        .unwrap_or(UNIX_EPOCH)
}

/// RFC 3986 unreserved characters plus `/`, which separates bucket and key segments.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encodes a `bucket/key` pair for the `x-amz-copy-source` header.
fn copy_source(bucket: &str, key: &str) -> String {
    utf8_percent_encode(&format!("{bucket}/{key}"), COPY_SOURCE).to_string()
}

/// Exponential backoff for retry `attempt` (1-based), saturating instead of overflowing.
fn retry_delay(initial_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(initial_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

impl S3Backend {
    pub async fn new(config: S3Config) -> BackendResult<Self> {
        let mut loader = aws_config::ConfigLoader::default()
            .region(Region::new(config.region.clone()));
        loader = match (&config.access_key, &config.secret_key) {
            (Some(ak), Some(sk)) => {
                loader.credentials_provider(Credentials::new(ak, sk, None, None, "s3vfs"))
            }
            _ => loader.credentials_provider(
                aws_config::environment::EnvironmentVariableCredentialsProvider::new(),
            ),
        };
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();
        Ok(Self {
            client: Client::from_conf(s3_config),
            config,
        })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    async fn execute_with_retry<T, F, Fut, E>(
        &self,
        operation: F,
        operation_name: &'static str,
    ) -> BackendResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        let mut attempt = 0;
        let max_retries = self.config.max_retries;
        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt > max_retries {
                        return Err(Box::new(std::io::Error::other(format!(
                            "{operation_name} failed after {max_retries} attempts: {e}"
                        ))));
                    }
                    warn!(operation = operation_name, attempt, "s3 request failed: {e}");
                    sleep(retry_delay(self.config.initial_retry_delay_ms, attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn list_buckets(&self) -> BackendResult<Vec<BucketInfo>> {
        let resp = self
            .execute_with_retry(|| self.client.list_buckets().send(), "list_buckets")
            .await?;
        Ok(resp
            .buckets()
            .iter()
            .filter_map(|b| {
                Some(BucketInfo {
                    name: b.name()?.to_string(),
                    creation_date: to_system_time(b.creation_date()),
                })
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
        let resp = self
            .execute_with_retry(
                || {
                    self.client
                        .list_objects_v2()
                        .bucket(bucket)
                        .prefix(prefix)
                        .delimiter(delimiter)
                        .set_continuation_token(continuation_token.clone())
                        .send()
                },
                "list_objects_v2",
            )
            .await?;

        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let objects = resp
            .contents()
            .iter()
            .filter_map(|o| {
                Some(ObjectInfo {
                    key: o.key()?.to_string(),
                    size: o.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_system_time(o.last_modified()),
                })
            })
            .collect();
        let next_continuation_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage {
            common_prefixes,
            objects,
            next_continuation_token,
        })
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> BackendResult<Vec<u8>> {
        if end <= start {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", start, end - 1);
        debug!(bucket, key, %range, "s3 ranged get");
        let resp = self
            .execute_with_retry(
                || {
                    self.client
                        .get_object()
                        .bucket(bucket)
                        .key(key)
                        .range(range.clone())
                        .send()
                },
                "get_object",
            )
            .await?;
        let body = resp.body.collect().await?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> BackendResult<()> {
        let checksum = Self::md5_base64(data);
        self.execute_with_retry(
            || {
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(data.to_owned()))
                    .content_md5(checksum.clone())
                    .send()
            },
            "put_object",
        )
        .await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.execute_with_retry(
            || self.client.delete_object().bucket(bucket).key(key).send(),
            "delete_object",
        )
        .await?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> BackendResult<()> {
        check_batch(keys)?;
        if keys.is_empty() {
            return Ok(());
        }
        let ids = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<Result<Vec<_>, _>>()?;
        let delete = Delete::builder().set_objects(Some(ids)).quiet(true).build()?;
        let resp = self
            .execute_with_retry(
                || {
                    self.client
                        .delete_objects()
                        .bucket(bucket)
                        .delete(delete.clone())
                        .send()
                },
                "delete_objects",
            )
            .await?;
        if let Some(err) = resp.errors().first() {
            return Err(format!(
                "delete_objects: {} of {} keys failed, first {:?}: {:?}",
                resp.errors().len(),
                keys.len(),
                err.key(),
                err.message()
            )
            .into());
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
        let source = copy_source(src_bucket, src_key);
        self.execute_with_retry(
            || {
                self.client
                    .copy_object()
                    .copy_source(source.clone())
                    .bucket(dst_bucket)
                    .key(dst_key)
                    .send()
            },
            "copy_object",
        )
        .await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> BackendResult<()> {
        self.execute_with_retry(
            || self.client.delete_bucket().bucket(bucket).send(),
            "delete_bucket",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("b", "dir/a b+c.txt"), "b/dir/a%20b%2Bc.txt");
        assert_eq!(copy_source("b", "x/ü~-_.k"), "b/x/%C3%BC~-_.k");
    }

    #[test]
    fn test_retry_delay_saturates() {
        assert_eq!(retry_delay(100, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 3), Duration::from_millis(400));
        assert_eq!(retry_delay(100, 64), Duration::from_millis(MAX_RETRY_DELAY_MS));
        assert_eq!(retry_delay(100, u32::MAX), Duration::from_millis(MAX_RETRY_DELAY_MS));
    }

    #[tokio::test]
    #[ignore = "requires an S3-compatible endpoint at 127.0.0.1:9000 with bucket `main`"]
    async fn test_s3_backend() -> BackendResult<()> {
        let backend = S3Backend::new(S3Config {
            endpoint: Some("http://127.0.0.1:9000/".to_string()),
            ..S3Config::default()
        })
        .await?;
        let data_1 = Vec::from("hello");
        backend.put_object("main", "test_0", &data_1).await?;

        let res = backend.get_object_range("main", "test_0", 1, 4).await?;
        assert_eq!(res, b"ell");
        backend.delete_object("main", "test_0").await?;
        Ok(())
    }
}
