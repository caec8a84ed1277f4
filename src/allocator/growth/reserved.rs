//! Growth over a reserved virtual address range.

use super::{ArenaGrowth, GrowError};
use crate::allocator::constants::{align_up, BLOCK_SIZE};
use crate::allocator::syscall;
use core::ptr::NonNull;

/// A growth adapter over one virtual memory reservation.
///
/// The whole address range is reserved up front and committed as the arena
/// grows, so the base never moves and growth is always contiguous.
pub struct ReservedRegion {
    start: NonNull<u8>,
    capacity: usize,
    committed: usize,
}

impl ReservedRegion {
    /// Reserves `capacity` bytes of address space (rounded up to the block size).
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = align_up(capacity.max(BLOCK_SIZE), BLOCK_SIZE);
        let start = unsafe { syscall::reserve_region(capacity)? };
        Some(Self {
            start: NonNull::new(start)?,
            capacity,
            committed: 0,
        })
    }

    /// Returns the capacity of the reservation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// Send is safe because the region owns its reservation exclusively.
unsafe impl Send for ReservedRegion {}

impl ArenaGrowth for ReservedRegion {
    fn base(&self) -> NonNull<u8> {
        self.start
    }

    fn frontier(&self) -> usize {
        self.committed
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        let additional = align_up(additional, BLOCK_SIZE);
        if additional > self.capacity - self.committed {
            return Err(GrowError::Exhausted {
                capacity: self.capacity,
                frontier: self.committed,
                requested: additional,
            });
        }

        let at = self.committed;
        if additional > 0 {
            unsafe {
                syscall::commit_region(self.start.as_ptr().add(at), additional).map_err(GrowError::Os)?;
            }
        }
        self.committed += additional;
        Ok(at)
    }
}

impl Drop for ReservedRegion {
    fn drop(&mut self) {
        unsafe {
            syscall::release_region(self.start.as_ptr(), self.capacity);
        }
    }
}
