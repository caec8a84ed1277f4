//! Block descriptors.
//!
//! The Block Table is an array of [`RawDescriptor`]s in arena memory, one per
//! block. The allocator never branches on the raw fields; it decodes them into
//! [`Descriptor`] and matches on that.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

const STATE_BUSY: u32 = 0;
const STATE_FREE: u32 = 1;

/// Persisted form of a block descriptor.
///
/// ```text
/// +--------+--------+----------------+----------------+----------------+
/// | state  |  log   |      size      |      next      |      prev      |
/// |  u32   |  u32   |      i64       |      u64       |      u64       |
/// +--------+--------+----------------+----------------+----------------+
/// ```
///
/// An all-zero descriptor decodes as [`Span::Untracked`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct RawDescriptor {
    state: u32,
    log: u32,
    size: i64,
    next: u64,
    prev: u64,
}

/// Size of one Block Table entry.
pub const DESCRIPTOR_SIZE: usize = core::mem::size_of::<RawDescriptor>();

const _: () = assert!(DESCRIPTOR_SIZE == 32);

/// Position of a block inside a busy large allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// Zeroed entry: not yet handed to any allocation.
    Untracked,
    /// First block of an allocation spanning `blocks` blocks.
    Head(usize),
    /// A later block; the head is this many blocks back.
    Continuation(usize),
}

/// Decoded block descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// First block of a free run, linked into the circular free list.
    Free {
        /// Run length in blocks.
        size: usize,
        /// Next run in the free list.
        next: usize,
        /// Previous run in the free list.
        prev: usize,
    },
    /// Block belonging to one large allocation.
    Large(Span),
    /// Block split into `1 << log` byte fragments.
    Fragmented {
        /// log2 of the fragment size.
        log: u32,
        /// Fragments of this block currently on the fragment list.
        nfree: usize,
        /// Index within the block of one free fragment.
        first: usize,
    },
}

impl Descriptor {
    /// Encodes into the persisted form.
    pub fn encode(self) -> RawDescriptor {
        match self {
            Self::Free { size, next, prev } => RawDescriptor {
                state: STATE_FREE,
                log: 0,
                size: size as i64,
                next: next as u64,
                prev: prev as u64,
            },
            Self::Large(span) => RawDescriptor {
                state: STATE_BUSY,
                log: 0,
                size: match span {
                    Span::Untracked => 0,
                    Span::Head(blocks) => blocks as i64,
                    Span::Continuation(back) => -(back as i64),
                },
                next: 0,
                prev: 0,
            },
            Self::Fragmented { log, nfree, first } => RawDescriptor {
                state: STATE_BUSY,
                log,
                size: nfree as i64,
                next: first as u64,
                prev: 0,
            },
        }
    }

    /// Decodes a persisted descriptor, or `None` if its fields are impossible.
    pub fn decode(raw: RawDescriptor) -> Option<Self> {
        match (raw.state, raw.log) {
            (STATE_FREE, 0) => Some(Self::Free {
                size: usize::try_from(raw.size).ok()?,
                next: usize::try_from(raw.next).ok()?,
                prev: usize::try_from(raw.prev).ok()?,
            }),
            (STATE_BUSY, 0) => Some(Self::Large(match raw.size {
                0 => Span::Untracked,
                n if n > 0 => Span::Head(n as usize),
                n => Span::Continuation(n.unsigned_abs() as usize),
            })),
            (STATE_BUSY, log) => Some(Self::Fragmented {
                log,
                nfree: usize::try_from(raw.size).ok()?,
                first: usize::try_from(raw.next).ok()?,
            }),
            _ => None,
        }
    }
}
