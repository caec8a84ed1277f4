//! Arena handles and relocatable addresses.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Opaque handle to one attached arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaId(u32);

impl ArenaId {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// Location of an allocation.
///
/// The arena-relative `offset` is the durable part. The absolute address is
/// only meaningful for the mapping that was current when the `Address` was
/// produced; after a remap, resolve the object again (for example through
/// [`crate::lookup`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    arena: ArenaId,
    offset: usize,
    addr: usize,
}

impl Address {
    pub(crate) const fn new(arena: ArenaId, offset: usize, base: usize) -> Self {
        Self { arena, offset, addr: base + offset }
    }

    /// The arena this address belongs to.
    pub const fn arena(&self) -> ArenaId {
        self.arena
    }

    /// Byte offset from the arena base.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute address in the mapping current at creation time.
    pub const fn addr(&self) -> usize {
        self.addr
    }

    /// Raw pointer to the allocation.
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.arena, self.offset)
    }
}
