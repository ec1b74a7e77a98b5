// Library crate for s3vfs: an object store exposed as a hierarchical file system.
pub mod cache;
pub mod cadapter;
pub mod vfs;
