//! Arena growth adapters.
//!
//! The allocator does not create or map backing stores. It asks an
//! [`ArenaGrowth`] implementation for more memory at the end of the arena and
//! reads the current base address from it on every access.

pub mod heap;
pub mod reserved;

pub use heap::HeapRegion;
pub use reserved::ReservedRegion;

use core::ptr::NonNull;
use thiserror::Error;

/// Failure reported by a growth adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrowError {
    /// The adapter's reservation cannot hold the request.
    #[error("reservation of {capacity} bytes exhausted ({requested} more requested at {frontier})")]
    Exhausted {
        /// Total bytes the adapter can ever map.
        capacity: usize,
        /// Bytes already mapped.
        frontier: usize,
        /// Bytes requested.
        requested: usize,
    },

    /// The operating system refused to map the memory.
    #[error("mapping failed with os error {0}")]
    Os(i32),
}

/// A mapped, growable memory region backing one arena.
///
/// Contract: memory between offset 0 and [`frontier`](Self::frontier) is
/// mapped, readable and writable, and newly grown memory is zeroed. `grow`
/// extends the mapping at the frontier; it may move the base, so callers
/// must re-read [`base`](Self::base) after growing.
pub trait ArenaGrowth: Send {
    /// Base address of the current mapping.
    fn base(&self) -> NonNull<u8>;

    /// Length of the mapped region. New memory always starts here.
    fn frontier(&self) -> usize;

    /// Maps `additional` more bytes and returns the offset where they begin.
    fn grow(&mut self, additional: usize) -> Result<usize, GrowError>;

    /// Called when an existing arena is attached at a different base than the
    /// one it was last used at.
    fn relocate_notify(&mut self, old_base: usize, new_base: usize) {
        tracing::debug!(old_base, new_base, "arena relocated");
    }

    /// The mapped bytes.
    ///
    /// # Safety
    /// Nothing may write to the region while the returned slice is alive,
    /// including through addresses previously returned by the allocator.
    unsafe fn mapped_bytes(&self) -> &[u8] {
        core::slice::from_raw_parts(self.base().as_ptr(), self.frontier())
    }
}

impl<T: ArenaGrowth + ?Sized> ArenaGrowth for Box<T> {
    fn base(&self) -> NonNull<u8> {
        (**self).base()
    }

    fn frontier(&self) -> usize {
        (**self).frontier()
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        (**self).grow(additional)
    }

    fn relocate_notify(&mut self, old_base: usize, new_base: usize) {
        (**self).relocate_notify(old_base, new_base);
    }
}
