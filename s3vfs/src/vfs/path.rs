//! Path algebra: file-system paths <-> (bucket, key) pairs.
//!
//! An empty bucket denotes the volume root and an empty key the bucket itself.
//! Keys use `/` as the hierarchy separator and never carry leading or trailing
//! separators.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct S3Path {
    bucket: String,
    key: String,
}

impl S3Path {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let key: String = key.into();
        let key = key
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self {
            bucket: bucket.into(),
            key,
        }
    }

    /// The volume root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn bucket_root(bucket: impl Into<String>) -> Self {
        Self::new(bucket, "")
    }

    /// Parses `\bucket\dir\file` or `/bucket/dir/file`.
    ///
    /// Returns `None` for an empty or root-only path.
    pub fn from_fs_path(path: &str) -> Option<Self> {
        let normalized = path.replace('\\', "/");
        let mut parts = normalized.split('/').filter(|s| !s.is_empty());
        let bucket = parts.next()?;
        let key = parts.collect::<Vec<_>>().join("/");
        Some(Self {
            bucket: bucket.to_string(),
            key,
        })
    }

    /// Canonical file-system spelling, `/bucket/key`.
    pub fn to_fs_path(&self) -> String {
        match (self.bucket.is_empty(), self.key.is_empty()) {
            (true, _) => "/".to_string(),
            (false, true) => format!("/{}", self.bucket),
            (false, false) => format!("/{}/{}", self.bucket, self.key),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_root(&self) -> bool {
        self.bucket.is_empty()
    }

    pub fn is_bucket_root(&self) -> bool {
        !self.bucket.is_empty() && self.key.is_empty()
    }

    /// Key segments; empty for a bucket or the volume root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.key.split('/').filter(|s| !s.is_empty())
    }

    /// Last key segment, or the bucket name when the key is empty.
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or(self.bucket.as_str())
    }

    /// `None` at a bucket root or the volume root.
    pub fn parent(&self) -> Option<S3Path> {
        if self.bucket.is_empty() || self.key.is_empty() {
            return None;
        }
        let parent_key = match self.key.rfind('/') {
            Some(idx) => self.key[..idx].to_string(),
            None => String::new(),
        };
        Some(S3Path {
            bucket: self.bucket.clone(),
            key: parent_key,
        })
    }

    pub fn append(&self, segment: &str) -> S3Path {
        if self.bucket.is_empty() {
            return S3Path::new(segment, "");
        }
        if self.key.is_empty() {
            return S3Path::new(self.bucket.clone(), segment);
        }
        S3Path::new(self.bucket.clone(), format!("{}/{}", self.key, segment))
    }

    /// Listing prefix for this path as a directory: `key/`, or empty for a bucket root.
    pub fn dir_prefix(&self) -> String {
        if self.key.is_empty() {
            String::new()
        } else {
            format!("{}/", self.key)
        }
    }

    /// Whether `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &S3Path) -> bool {
        if other.bucket.is_empty() {
            return true;
        }
        if self.bucket != other.bucket {
            return false;
        }
        other.key.is_empty()
            || self.key == other.key
            || self
                .key
                .strip_prefix(&other.key)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Segments of `self` below `ancestor`, if `self` lies under it.
    pub fn relative_to<'a>(&'a self, ancestor: &S3Path) -> Option<Vec<&'a str>> {
        if !self.starts_with(ancestor) {
            return None;
        }
        if ancestor.bucket.is_empty() {
            let mut out = vec![self.bucket.as_str()];
            out.extend(self.segments());
            out.retain(|s| !s.is_empty());
            return Some(out);
        }
        Some(self.segments().skip(ancestor.segments().count()).collect())
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
