//! Persisted arena layout.
//!
//! # Layout
//!
//! ```text
//! offset 0
//! +----------------------------------------------------------+  block 1
//! | ArenaHeader (128 bytes)                                  |
//! | fragment list heads, one FragmentLink per log class      |
//! +----------------------------------------------------------+  block 2
//! | Block Table: RawDescriptor[table_capacity]               |
//! +----------------------------------------------------------+
//! | blocks handed out as large allocations, fragment blocks, |
//! | free runs, and later copies of the Block Table           |
//! +----------------------------------------------------------+  extent
//! ```
//!
//! The quantum and both record layouts are the arena's on-disk format. The
//! header records them and an existing arena is rejected if they differ.

pub mod descriptor;
pub mod header;

pub use descriptor::{Descriptor, RawDescriptor, Span, DESCRIPTOR_SIZE};
pub use header::{ArenaHeader, FragmentLink, ARENA_MAGIC, LAYOUT_VERSION};
