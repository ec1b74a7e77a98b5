//! VFS layer: the node tree over buckets and keys.
//!
//! - `path`: file-system path <-> (bucket, key) algebra
//! - `directory` / `file`: node variants and tree mutation (create, move, delete)
//! - `fs`: the `S3Vfs` entry point holding the cache registry and the volume root
pub mod config;
pub mod directory;
pub mod error;
pub mod file;
pub mod fs;
pub mod node;
pub mod path;
pub mod status;

pub use config::VfsConfig;
pub use directory::{DirectoryKind, DirectoryNode};
pub use error::{Result, VfsError};
pub use file::FileNode;
pub use fs::S3Vfs;
pub use node::{FileInfo, Node, VolumeInfo};
pub use path::S3Path;
pub use status::NodeStatus;
