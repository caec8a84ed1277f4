//! Counter and report types.

use serde::{Deserialize, Serialize};

/// Per-arena usage counters.
///
/// Diagnostics only: the allocator never makes a decision based on them.
/// Every mapped block is accounted either as used or as free, so
/// `bytes_used + bytes_free` always equals the arena's mapped blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    /// Live allocations, each fragment and each large object counted once.
    pub chunks_used: u64,
    /// Bytes held by live allocations and bookkeeping.
    pub bytes_used: u64,
    /// Free fragments plus free runs.
    pub chunks_free: u64,
    /// Bytes on the free lists.
    pub bytes_free: u64,
}

impl UsageCounters {
    /// A chunk of `bytes` moved from free space to a live allocation.
    #[inline(always)]
    pub fn on_alloc(&mut self, bytes: usize) {
        self.chunks_used += 1;
        self.bytes_used += bytes as u64;
        self.bytes_free -= bytes as u64;
    }

    /// A live chunk of `bytes` became free.
    #[inline(always)]
    pub fn on_release(&mut self, bytes: usize) {
        self.chunks_used -= 1;
        self.bytes_used -= bytes as u64;
        self.bytes_free += bytes as u64;
    }

    /// Freshly mapped bytes handed straight to an allocation.
    #[inline(always)]
    pub fn on_grow_used(&mut self, bytes: usize) {
        self.chunks_used += 1;
        self.bytes_used += bytes as u64;
    }

    /// Freshly mapped bytes added to an existing free run.
    #[inline(always)]
    pub fn on_grow_free(&mut self, bytes: usize) {
        self.bytes_free += bytes as u64;
    }

    /// Total bytes accounted for.
    pub fn total_bytes(&self) -> u64 {
        self.bytes_used + self.bytes_free
    }
}

/// Snapshot of an arena's state for status tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStatus {
    /// Current usage counters.
    pub usage: UsageCounters,
    /// Bytes currently mapped by the growth adapter.
    pub mapped_len: usize,
    /// One past the last block index in use.
    pub heap_limit: usize,
    /// Descriptors the Block Table can hold.
    pub table_capacity: usize,
    /// Records the arena has registered in its object directory.
    pub object_count: usize,
}

/// What a block index holds, as reported by [`crate::inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    /// Inside a free run.
    Free {
        /// Head block of the run.
        run: usize,
    },
    /// Part of a large allocation.
    Large {
        /// Head block of the allocation.
        head: usize,
        /// Blocks the allocation spans.
        blocks: usize,
    },
    /// A fragmented block.
    Fragment {
        /// log2 of the fragment size.
        log: u32,
        /// Fragment size in bytes.
        size: usize,
        /// Fragments of this block on the free list.
        free_in_block: usize,
    },
    /// Parameter block or Block Table.
    Bookkeeping,
}

/// Resolved location of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Block index holding the address.
    pub block: usize,
    /// How the block is used.
    pub kind: BlockKind,
}

/// Result of a full consistency walk, see [`crate::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapReport {
    /// Runs on the large free list (anchor excluded).
    pub free_runs: usize,
    /// Blocks covered by those runs.
    pub free_blocks: usize,
    /// `(log, free fragments)` for every non-empty fragment class.
    pub fragments: Vec<(u32, usize)>,
    /// Counters the walk was checked against.
    pub usage: UsageCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_conserve_total() {
        let mut usage = UsageCounters { bytes_free: 8192, chunks_free: 1, ..Default::default() };
        usage.on_alloc(4096);
        assert_eq!(usage.bytes_used, 4096);
        assert_eq!(usage.total_bytes(), 8192);

        usage.on_release(4096);
        assert_eq!(usage.chunks_used, 0);
        assert_eq!(usage.total_bytes(), 8192);
    }

    #[test]
    fn block_kind_serializes_tagged() {
        let info = BlockInfo { block: 12, kind: BlockKind::Large { head: 10, blocks: 3 } };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["kind"]["kind"], "large");
        assert_eq!(json["kind"]["head"], 10);
    }
}
