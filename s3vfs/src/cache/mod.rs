//! Per-object block caches and the registry that bounds them.

pub mod block;
pub mod layout;
pub mod registry;

pub use block::BlockCache;
pub use layout::BlockLayout;
pub use registry::CacheRegistry;
