//! Block layout and range splitting
//!
//! An object's bytes are cached in fixed-size blocks. Logical sizes are reported
//! rounded up to the allocation unit.

/// Allocation unit reported to the OS adapter (bytes).
pub const DEFAULT_ALLOCATION_UNIT: u32 = 4096;
/// Allocation units per cache block.
pub const DEFAULT_UNITS_PER_BLOCK: u32 = 64;
pub const DEFAULT_BLOCK_SIZE: u32 = DEFAULT_ALLOCATION_UNIT * DEFAULT_UNITS_PER_BLOCK; // 256 KiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u32,
    pub allocation_unit: u32,
}

impl Default for BlockLayout {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            allocation_unit: DEFAULT_ALLOCATION_UNIT,
        }
    }
}

impl BlockLayout {
    pub fn new(allocation_unit: u32, units_per_block: u32) -> Self {
        let allocation_unit = allocation_unit.max(1);
        Self {
            block_size: allocation_unit * units_per_block.max(1),
            allocation_unit,
        }
    }

    #[inline]
    pub fn block_index_of(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    pub fn within_block_offset(&self, offset: u64) -> u32 {
        (offset % self.block_size as u64) as u32
    }

    #[inline]
    pub fn block_start(&self, index: u64) -> u64 {
        index * self.block_size as u64
    }

    /// Number of blocks needed to hold `size` bytes.
    #[inline]
    pub fn blocks_for(&self, size: u64) -> u64 {
        size.div_ceil(self.block_size as u64)
    }

    /// `size` rounded up to the allocation unit.
    #[inline]
    pub fn allocation_size(&self, size: u64) -> u64 {
        size.div_ceil(self.allocation_unit as u64) * self.allocation_unit as u64
    }
}

/// 文件范围在某个 block 内的一段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub block_index: u64,
    pub offset_in_block: u32,
    pub len_in_block: u32,
}

impl BlockSpan {
    /// Whether the span covers its whole block.
    pub fn is_full(&self, layout: BlockLayout) -> bool {
        self.offset_in_block == 0 && self.len_in_block == layout.block_size
    }
}

/// 将 [offset, offset+len) 拆分为若干 block 局部范围。
pub fn split_range_into_blocks(layout: BlockLayout, mut offset: u64, len: usize) -> Vec<BlockSpan> {
    let mut remaining = len as u64;
    let mut out = Vec::new();
    while remaining > 0 {
        let block_index = layout.block_index_of(offset);
        let offset_in_block = layout.within_block_offset(offset);
        let cap = (layout.block_size - offset_in_block) as u64;
        let take = cap.min(remaining);
        out.push(BlockSpan {
            block_index,
            offset_in_block,
            len_in_block: take as u32,
        });
        offset += take;
        remaining -= take;
    }
    out
}
