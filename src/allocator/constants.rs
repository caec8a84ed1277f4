//! Block geometry and the arithmetic between offsets and block indices.

/// log2 of the block quantum.
pub const BLOCK_LOG: u32 = 12;

/// The allocation quantum of an arena (4KB).
///
/// Part of the persisted format: an arena written with one quantum can only be
/// re-attached by an allocator using the same quantum.
pub const BLOCK_SIZE: usize = 1 << BLOCK_LOG;

/// Smallest fragment class (16 bytes), large enough to hold a free-list node.
pub const MIN_FRAGMENT_LOG: u32 = 4;

/// Requests up to this size are carved from fragments.
pub const MAX_FRAGMENT_SIZE: usize = BLOCK_SIZE / 2;

/// Number of fragment list heads stored in the parameter block, indexed by log.
pub const FRAGMENT_CLASSES: usize = BLOCK_LOG as usize;

/// Default extent the initial Block Table covers (4 MB).
pub const DEFAULT_EXTENT: usize = 4 * 1024 * 1024;

/// Blocks reserved for the parameter block at the start of every arena.
pub const PARAMETER_BLOCKS: usize = 1;

/// Name under which the parameter block is registered.
pub const ROOT_OBJECT_NAME: &str = "__arena__";

/// Info text attached to the root record.
pub const ROOT_OBJECT_INFO: &str = "arena parameter block";

/// Info text attached to every caller-named allocation.
pub const OBJECT_INFO: &str = "persistent object";

/// Number of whole blocks needed for `size` bytes.
#[inline]
pub const fn blockify(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE)
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        (value + (align - 1)) & !(align - 1)
    }
}

/// Block index covering arena offset `offset`. Index 0 is the free-list anchor.
#[inline]
pub const fn block_of(offset: usize) -> usize {
    offset / BLOCK_SIZE + 1
}

/// Arena offset of the first byte of block `block`.
#[inline]
pub const fn offset_of(block: usize) -> usize {
    (block - 1) * BLOCK_SIZE
}

/// Fragment class for a small request: `ceil(log2(size))`, never below
/// [`MIN_FRAGMENT_LOG`].
#[inline]
pub const fn fragment_log(size: usize) -> u32 {
    if size <= (1 << MIN_FRAGMENT_LOG) {
        return MIN_FRAGMENT_LOG;
    }
    usize::BITS - (size - 1).leading_zeros()
}
