//! # `mapheap` - Relocatable Arena Allocator
//!
//! A block/fragment allocator for memory arenas that may be mapped at a
//! different base address every time they are attached: shared memory
//! segments, memory-mapped files, or plain heap buffers handed between
//! processes.
//!
//! ## Model
//!
//! An arena is carved into fixed 4096-byte *blocks*. Its first block holds
//! the parameter block (header plus fragment list heads); the *Block Table*
//! that follows describes every block with one 32-byte descriptor.
//!
//! - Requests of at most half a block are served from power-of-two
//!   *fragment* lists (16 to 2048 bytes). A block is split only when its
//!   class list is empty, and is given back once all its fragments are free.
//! - Larger requests take whole blocks from a circular free list kept in
//!   address order, searched first-fit from a rotating cursor. When nothing
//!   fits, the arena grows; a free run already ending at the frontier is
//!   extended in place so only the shortfall is mapped.
//! - The Block Table doubles itself when the arena outgrows it and recycles
//!   its old copy as ordinary free blocks.
//!
//! Nothing in the arena stores an absolute address. Free lists and fragment
//! nodes hold block indices and arena offsets, so an arena found at a new
//! base is usable as soon as its header has been validated.
//!
//! ## Names
//!
//! Allocations can be given a name, recorded in a [`NameDirectory`] by
//! arena offset. After the arena is re-attached elsewhere, [`lookup`]
//! resolves the name against the new base.
//!
//! ## Concurrency
//!
//! All arenas of a process share one table behind one mutex. Every public
//! operation takes the lock for its whole duration.
//!
//! ## Example
//!
//! ```
//! use mapheap::{allocate, attach, initialize, lookup, ArenaConfig, HeapRegion, ObjectDirectory, Provenance};
//!
//! let region = HeapRegion::new(1 << 22).unwrap();
//! let arena = attach(region, ObjectDirectory::default(), ArenaConfig::default());
//! initialize(arena, Provenance::New).unwrap();
//!
//! let table = allocate(arena, 8192, Some("table")).unwrap();
//! assert_eq!(lookup(arena, "table").unwrap(), Some(table));
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod allocator;

pub use allocator::growth::{ArenaGrowth, GrowError, HeapRegion, ReservedRegion};
pub use allocator::naming::{NameDirectory, NameError, NamedObject, ObjectDirectory};
pub use allocator::stats::{ArenaStatus, BlockInfo, BlockKind, HeapReport, UsageCounters};
pub use allocator::{
    allocate, attach, check, detach, initialize, inspect, is_initialized, lookup, reallocate, release, resolve,
    status, usage, Address, AllocError, AllocResult, ArenaConfig, ArenaId, Detached, Provenance,
};

// Compile-time assertions for the persisted layout
const _: () = {
    use allocator::constants::{BLOCK_SIZE, FRAGMENT_CLASSES, MAX_FRAGMENT_SIZE, MIN_FRAGMENT_LOG};
    use allocator::layout::{ArenaHeader, RawDescriptor, DESCRIPTOR_SIZE};
    use core::mem;

    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(MAX_FRAGMENT_SIZE == BLOCK_SIZE / 2);
    assert!(1 << MIN_FRAGMENT_LOG == mem::size_of::<allocator::layout::FragmentLink>());
    assert!(1 << FRAGMENT_CLASSES == BLOCK_SIZE);

    // Block descriptors tile the Block Table with no padding.
    assert!(mem::size_of::<RawDescriptor>() == DESCRIPTOR_SIZE);
    assert!(BLOCK_SIZE % DESCRIPTOR_SIZE == 0);
    assert!(mem::align_of::<RawDescriptor>() <= DESCRIPTOR_SIZE);

    // The header stays a fixed prefix of the parameter block.
    assert!(mem::size_of::<ArenaHeader>() == 128);
};
