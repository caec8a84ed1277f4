//! The block/fragment allocator over one arena.
//!
//! Requests of at most half a block are served from power-of-two fragment
//! lists; larger ones take whole blocks from a circular free list kept in
//! address order. All state is addressed by block index or arena offset.

mod allocator;
mod arena;
mod check;
mod fragment;
mod large;

pub(crate) use allocator::{Origin, Placement};
pub(crate) use arena::{Arena, Heap, HeapState};
