//! Growth over a buffer from the global allocator.

use super::{ArenaGrowth, GrowError};
use crate::allocator::constants::{align_up, BLOCK_SIZE};
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

/// A growth adapter over a block-aligned buffer from the global allocator.
///
/// The buffer is allocated at full capacity and zeroed; growth only moves the
/// frontier. [`HeapRegion::from_image`] copies an arena image into a fresh
/// buffer, which is how an arena ends up at a different base address.
pub struct HeapRegion {
    base: NonNull<u8>,
    layout: Layout,
    len: usize,
}

impl HeapRegion {
    /// Allocates an empty region able to grow to `capacity` bytes.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = align_up(capacity.max(BLOCK_SIZE), BLOCK_SIZE);
        let layout = Layout::from_size_align(capacity, BLOCK_SIZE).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        Some(Self {
            base: NonNull::new(ptr)?,
            layout,
            len: 0,
        })
    }

    /// Creates a region whose first `image.len()` bytes are mapped and hold `image`.
    pub fn from_image(image: &[u8], capacity: usize) -> Option<Self> {
        let mut region = Self::new(capacity.max(image.len()))?;
        unsafe {
            core::ptr::copy_nonoverlapping(image.as_ptr(), region.base.as_ptr(), image.len());
        }
        region.len = image.len();
        Some(region)
    }

    /// Returns the capacity of the region.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }
}

// Send is safe because the region owns its buffer exclusively.
unsafe impl Send for HeapRegion {}

impl ArenaGrowth for HeapRegion {
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    fn frontier(&self) -> usize {
        self.len
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        if additional > self.capacity() - self.len {
            return Err(GrowError::Exhausted {
                capacity: self.capacity(),
                frontier: self.len,
                requested: additional,
            });
        }
        let at = self.len;
        self.len += additional;
        Ok(at)
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_lands_at_new_base() {
        let mut region = HeapRegion::new(4 * BLOCK_SIZE).unwrap();
        region.grow(BLOCK_SIZE).unwrap();
        unsafe { *region.base().as_ptr().add(10) = 7 };

        let image = unsafe { region.mapped_bytes() }.to_vec();
        let copy = HeapRegion::from_image(&image, 8 * BLOCK_SIZE).unwrap();

        assert_ne!(copy.base(), region.base());
        assert_eq!(copy.frontier(), BLOCK_SIZE);
        assert_eq!(copy.capacity(), 8 * BLOCK_SIZE);
        assert_eq!(unsafe { copy.mapped_bytes() }[10], 7);
    }

    #[test]
    fn growth_past_capacity_fails() {
        let mut region = HeapRegion::new(2 * BLOCK_SIZE).unwrap();
        assert_eq!(region.grow(2 * BLOCK_SIZE), Ok(0));
        assert!(region.grow(1).is_err());
    }
}
