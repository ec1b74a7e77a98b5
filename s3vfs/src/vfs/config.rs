use crate::cache::layout::BlockLayout;

/// Registry budget in block units (16384 x 256 KiB = 4 GiB).
pub const DEFAULT_CACHE_CAPACITY_BLOCKS: u64 = 4 * 1024 * 4;
pub const DEFAULT_VOLUME_NAME: &str = "S3 Volume";
/// Fixed size reported for the whole volume.
pub const DEFAULT_VOLUME_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct VfsConfig {
    pub layout: BlockLayout,
    /// Upper bound of cached data, counted in blocks of `layout.block_size`.
    /// Entries holding unpersisted data are kept beyond this bound.
    pub cache_capacity_blocks: u64,
    pub volume_name: String,
    pub volume_size: u64,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            layout: BlockLayout::default(),
            cache_capacity_blocks: DEFAULT_CACHE_CAPACITY_BLOCKS,
            volume_name: DEFAULT_VOLUME_NAME.to_string(),
            volume_size: DEFAULT_VOLUME_SIZE,
        }
    }
}

impl VfsConfig {
    pub fn new(layout: BlockLayout) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }

    pub fn cache_capacity_blocks(self, cache_capacity_blocks: u64) -> Self {
        Self {
            cache_capacity_blocks: cache_capacity_blocks.max(1),
            ..self
        }
    }

    pub fn volume_name(self, volume_name: impl Into<String>) -> Self {
        Self {
            volume_name: volume_name.into(),
            ..self
        }
    }

    pub fn volume_size(self, volume_size: u64) -> Self {
        Self {
            volume_size,
            ..self
        }
    }
}
