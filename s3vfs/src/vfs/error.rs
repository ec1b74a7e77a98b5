//! Unified error surface of the node tree.
//!
//! Transport failures arrive as boxed errors from `cadapter` and are wrapped in
//! [`VfsError::Backend`]; everything else is a local contract violation.

use crate::cadapter::client::BackendError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PathHint(Option<String>);

impl PathHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn some(path: impl Into<String>) -> Self {
        Self(Some(path.into()))
    }
}

impl fmt::Display for PathHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) if !path.is_empty() => write!(f, ": {path}"),
            _ => Ok(()),
        }
    }
}

impl From<String> for PathHint {
    fn from(value: String) -> Self {
        Self::some(value)
    }
}

impl From<&str> for PathHint {
    fn from(value: &str) -> Self {
        Self::some(value)
    }
}

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("not found{path}")]
    NotFound { path: PathHint },

    #[error("name collision{path}")]
    NameCollision { path: PathHint },

    #[error("invalid operation: {reason}{path}")]
    InvalidOperation { reason: String, path: PathHint },

    #[error("unsupported operation: {op}{path}")]
    Unsupported { op: &'static str, path: PathHint },

    #[error("invalid path {0:?}")]
    InvalidPath(String),

    #[error("backend failure during {op}: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Outcome of a rejected child-collection update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChildSetError {
    #[error("child {0:?} already present")]
    Duplicate(String),

    #[error("child {0:?} not present")]
    Missing(String),
}

impl From<ChildSetError> for VfsError {
    fn from(value: ChildSetError) -> Self {
        let name = match &value {
            ChildSetError::Duplicate(n) | ChildSetError::Missing(n) => n.clone(),
        };
        VfsError::InvalidOperation {
            reason: value.to_string(),
            path: PathHint::some(name),
        }
    }
}

pub type Result<T> = std::result::Result<T, VfsError>;

impl VfsError {
    pub fn not_found(path: impl Into<PathHint>) -> Self {
        VfsError::NotFound { path: path.into() }
    }

    pub fn collision(path: impl Into<PathHint>) -> Self {
        VfsError::NameCollision { path: path.into() }
    }

    pub fn invalid(reason: impl Into<String>, path: impl Into<PathHint>) -> Self {
        VfsError::InvalidOperation {
            reason: reason.into(),
            path: path.into(),
        }
    }

    pub fn unsupported(op: &'static str, path: impl Into<PathHint>) -> Self {
        VfsError::Unsupported {
            op,
            path: path.into(),
        }
    }

    pub fn backend(op: &'static str) -> impl FnOnce(BackendError) -> VfsError {
        move |source| VfsError::Backend { op, source }
    }

    /// errno an OS adapter should report for this error.
    pub fn to_errno(&self) -> i32 {
        match self {
            VfsError::NotFound { .. } => libc::ENOENT,
            VfsError::NameCollision { .. } => libc::EEXIST,
            VfsError::InvalidOperation { .. } | VfsError::InvalidPath(_) => libc::EINVAL,
            VfsError::Unsupported { .. } => libc::ENOTSUP,
            VfsError::Backend { .. } => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_path_hint() {
        let e = VfsError::not_found("/b/x");
        assert_eq!(e.to_string(), "not found: /b/x");
        assert_eq!(e.to_errno(), libc::ENOENT);
        assert_eq!(VfsError::collision("/b/x").to_errno(), libc::EEXIST);
        assert_eq!(VfsError::InvalidPath("".into()).to_errno(), libc::EINVAL);
        assert_eq!(VfsError::unsupported("move", "/b").to_errno(), libc::ENOTSUP);
        let io = VfsError::backend("get_object")("boom".into());
        assert_eq!(io.to_errno(), libc::EIO);
        let e: VfsError = ChildSetError::Duplicate("x".into()).into();
        assert!(matches!(e, VfsError::InvalidOperation { .. }));
        assert_eq!(VfsError::unsupported("read", PathHint::none()).to_string(), "unsupported operation: read");
    }
}
