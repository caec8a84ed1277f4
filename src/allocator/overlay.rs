//! Raw access to arena memory.
//!
//! This is the only module that turns arena offsets into memory accesses.
//! Every access is bounds-checked against the current mapping and goes
//! through `zerocopy`, so any bit pattern found in a persisted arena decodes
//! to *some* value; the callers validate what they read.
//!
//! The fragment-node functions touch memory inside fragments. They are
//! `unsafe` because the same bytes belong to the caller once the fragment is
//! allocated.

use super::growth::ArenaGrowth;
use super::layout::FragmentLink;
use core::ptr::NonNull;
use zerocopy::{AsBytes, FromBytes};

/// A bounds-checked view of the current mapping.
///
/// Only valid until the next growth of the arena: growth may move the base.
#[derive(Clone, Copy)]
pub(crate) struct ArenaMemory {
    base: NonNull<u8>,
    len: usize,
}

impl ArenaMemory {
    pub(crate) fn of<G: ArenaGrowth + ?Sized>(region: &G) -> Self {
        Self {
            base: region.base(),
            len: region.frontier(),
        }
    }

    pub(crate) fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    fn range(&self, offset: usize, len: usize) -> Option<*mut u8> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        // SAFETY: `offset + len <= self.len`, inside the mapped region.
        Some(unsafe { self.base.as_ptr().add(offset) })
    }

    /// Reads a bookkeeping record (parameter block or Block Table entry).
    ///
    /// The allocator exclusively owns these ranges while the arena lock is held.
    pub(crate) fn read<T: FromBytes>(&self, offset: usize) -> Option<T> {
        let ptr = self.range(offset, core::mem::size_of::<T>())?;
        // SAFETY: in bounds, and bookkeeping memory is never handed to callers.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, core::mem::size_of::<T>()) };
        T::read_from(bytes)
    }

    /// Writes a bookkeeping record.
    pub(crate) fn write<T: AsBytes>(&self, offset: usize, value: &T) -> Option<()> {
        let len = core::mem::size_of_val(value);
        let ptr = self.range(offset, len)?;
        // SAFETY: as for `read`.
        let bytes = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
        value.write_to(bytes)
    }

    /// Zeroes `len` bytes of bookkeeping memory.
    pub(crate) fn zero(&self, offset: usize, len: usize) -> Option<()> {
        let ptr = self.range(offset, len)?;
        // SAFETY: as for `read`.
        unsafe { core::ptr::write_bytes(ptr, 0, len) };
        Some(())
    }

    /// Copies `len` bytes between two non-overlapping ranges.
    ///
    /// # Safety
    /// Neither range may be in use by anyone but the allocator: either
    /// bookkeeping memory, or allocations the allocator is moving.
    pub(crate) unsafe fn copy(&self, from: usize, to: usize, len: usize) -> Option<()> {
        let src = self.range(from, len)?;
        let dst = self.range(to, len)?;
        if from < to + len && to < from + len {
            return None;
        }
        core::ptr::copy_nonoverlapping(src, dst, len);
        Some(())
    }

    /// Reads the node written in place at the start of a free fragment, or a
    /// fragment list head.
    ///
    /// # Safety
    /// `offset` must be a list head or a fragment currently on a free list.
    pub(crate) unsafe fn read_link(&self, offset: usize) -> Option<FragmentLink> {
        self.read(offset)
    }

    /// Writes a fragment node in place.
    ///
    /// # Safety
    /// `offset` must be a list head or a fragment that is free (or is being
    /// made free); the caller must not own it.
    pub(crate) unsafe fn write_link(&self, offset: usize, link: FragmentLink) -> Option<()> {
        self.write(offset, &link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::constants::BLOCK_SIZE;
    use crate::allocator::growth::HeapRegion;
    use crate::allocator::layout::RawDescriptor;
    use zerocopy::FromZeroes;

    #[test]
    fn accesses_are_bounds_checked() {
        let mut region = HeapRegion::new(2 * BLOCK_SIZE).unwrap();
        region.grow(BLOCK_SIZE).unwrap();
        let mem = ArenaMemory::of(&region);

        assert!(mem.write(BLOCK_SIZE - 32, &RawDescriptor::new_zeroed()).is_some());
        assert!(mem.write(BLOCK_SIZE - 16, &RawDescriptor::new_zeroed()).is_none());
        assert!(mem.read::<u64>(BLOCK_SIZE).is_none());
        assert!(mem.zero(usize::MAX - 4, 8).is_none());
    }

    #[test]
    fn links_round_trip_in_place() {
        let mut region = HeapRegion::new(BLOCK_SIZE).unwrap();
        region.grow(BLOCK_SIZE).unwrap();
        let mem = ArenaMemory::of(&region);

        let link = FragmentLink { next: 0x40, prev: 0x80 };
        unsafe {
            mem.write_link(0x20, link).unwrap();
            assert_eq!(mem.read_link(0x20), Some(link));
        }
    }

    #[test]
    fn overlapping_copy_is_refused() {
        let mut region = HeapRegion::new(BLOCK_SIZE).unwrap();
        region.grow(BLOCK_SIZE).unwrap();
        let mem = ArenaMemory::of(&region);

        unsafe {
            assert!(mem.copy(0, 16, 32).is_none());
            assert!(mem.copy(0, 32, 32).is_some());
        }
    }
}
