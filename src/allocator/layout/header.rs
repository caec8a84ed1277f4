//! Arena parameter block.

use crate::allocator::constants::{BLOCK_SIZE, FRAGMENT_CLASSES};
use crate::allocator::layout::descriptor::DESCRIPTOR_SIZE;
use crate::allocator::stats::UsageCounters;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Magic number identifying a mapheap arena ("MAPHEAP\0").
pub const ARENA_MAGIC: u64 = u64::from_le_bytes(*b"MAPHEAP\0");

/// Current layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Fixed size of the parameter block header in bytes.
pub const HEADER_SIZE: usize = 128;

/// Offset of the fragment list heads inside the parameter block.
pub const FRAGMENT_HEADS_OFFSET: usize = HEADER_SIZE;

/// Set once bootstrap has completed.
pub const FLAG_INITIALIZED: u32 = 1;

/// Parameter block stored at offset 0 of every arena.
///
/// Everything the allocator needs to find its tables again after the arena
/// is mapped somewhere else. Offsets are arena-relative; `mapped_base` is
/// only used to detect that a relocation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct ArenaHeader {
    /// Magic number for arena identification.
    pub magic: u64,
    /// Layout version.
    pub version: u32,
    /// Block quantum the arena was written with.
    pub block_size: u32,
    /// Descriptor size the arena was written with.
    pub descriptor_size: u32,
    /// Arena flags.
    pub flags: u32,
    /// Base address of the mapping at the last attach.
    pub mapped_base: u64,
    /// Declared extent in bytes.
    pub extent: u64,
    /// Offset of the Block Table.
    pub table_offset: u64,
    /// Number of descriptors the Block Table can hold.
    pub table_capacity: u64,
    /// Free-list cursor.
    pub heap_index: u64,
    /// One past the last block index in use by the arena.
    pub heap_limit: u64,
    /// Live allocations, counting each fragment and each large object once.
    pub chunks_used: u64,
    /// Bytes held by live allocations, at fragment/block granularity.
    pub bytes_used: u64,
    /// Free fragments plus free runs.
    pub chunks_free: u64,
    /// Bytes in free fragments and free runs.
    pub bytes_free: u64,
    /// Records registered in the object directory for this arena.
    pub object_count: u64,
    /// Arena id the directory records were keyed by at the last flush.
    pub arena_id: u64,
    /// Reserved for future use.
    pub reserved: u64,
}

impl ArenaHeader {
    /// Header for a freshly bootstrapped arena.
    pub fn new(mapped_base: usize) -> Self {
        Self {
            magic: ARENA_MAGIC,
            version: LAYOUT_VERSION,
            block_size: BLOCK_SIZE as u32,
            descriptor_size: DESCRIPTOR_SIZE as u32,
            mapped_base: mapped_base as u64,
            ..Self::new_zeroed()
        }
    }

    /// Checks that the arena was written with this allocator's layout.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.magic != ARENA_MAGIC {
            return Err("invalid magic number");
        }
        if self.version != LAYOUT_VERSION {
            return Err("unsupported layout version");
        }
        if self.block_size as usize != BLOCK_SIZE {
            return Err("block quantum mismatch");
        }
        if self.descriptor_size as usize != DESCRIPTOR_SIZE {
            return Err("block descriptor size mismatch");
        }
        if self.flags & FLAG_INITIALIZED == 0 {
            return Err("arena was never bootstrapped");
        }
        Ok(())
    }

    /// The usage counters recorded in this header.
    pub fn usage(&self) -> UsageCounters {
        UsageCounters {
            chunks_used: self.chunks_used,
            bytes_used: self.bytes_used,
            chunks_free: self.chunks_free,
            bytes_free: self.bytes_free,
        }
    }

    /// Stores `usage` into this header.
    pub fn set_usage(&mut self, usage: &UsageCounters) {
        self.chunks_used = usage.chunks_used;
        self.bytes_used = usage.bytes_used;
        self.chunks_free = usage.chunks_free;
        self.bytes_free = usage.bytes_free;
    }
}

/// A `{next, prev}` pair of arena offsets.
///
/// Used both for the fragment list heads in the parameter block and for the
/// nodes written in place inside free fragments. Offset 0 terminates a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct FragmentLink {
    /// Next free fragment of the same class, or 0.
    pub next: u64,
    /// Previous fragment, or the class head.
    pub prev: u64,
}

/// Size of a [`FragmentLink`] and therefore the minimum fragment size.
pub const LINK_SIZE: usize = core::mem::size_of::<FragmentLink>();

/// Offset of the list head for fragment class `log`.
#[inline]
pub const fn fragment_head(log: u32) -> usize {
    FRAGMENT_HEADS_OFFSET + log as usize * LINK_SIZE
}

/// Bytes of the parameter block in use.
pub const PARAMETER_BLOCK_SIZE: usize = FRAGMENT_HEADS_OFFSET + FRAGMENT_CLASSES * LINK_SIZE;

const _: () = {
    assert!(core::mem::size_of::<ArenaHeader>() == HEADER_SIZE);
    assert!(LINK_SIZE == 16);
    assert!(PARAMETER_BLOCK_SIZE <= BLOCK_SIZE);
};
