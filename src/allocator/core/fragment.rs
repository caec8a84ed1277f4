//! Fragment lists: blocks split into power-of-two pieces.
//!
//! Each log class has a doubly linked list of free fragments. The nodes live
//! in the first 16 bytes of the free fragments themselves and hold arena
//! offsets; the list heads live in the parameter block. The free fragments
//! of one block are always adjacent in their list, starting at the
//! fragment recorded as `first` in the block's descriptor.

use super::allocator::Origin;
use super::arena::Heap;
use crate::allocator::constants::{block_of, offset_of, BLOCK_SIZE};
use crate::allocator::error::AllocResult;
use crate::allocator::layout::header::fragment_head;
use crate::allocator::layout::{Descriptor, FragmentLink, Span};
use tracing::trace;

/// Fragment state read from a block descriptor.
#[derive(Debug, Clone, Copy)]
struct FragmentBlock {
    log: u32,
    nfree: usize,
    first: usize,
}

impl FragmentBlock {
    fn count(&self) -> usize {
        BLOCK_SIZE >> self.log
    }

    fn offset_in(&self, block: usize, index: usize) -> usize {
        offset_of(block) + (index << self.log)
    }
}

impl Heap<'_> {
    fn fragment_block(&self, block: usize) -> AllocResult<FragmentBlock> {
        match self.descriptor(block)? {
            Descriptor::Fragmented { log, nfree, first } => Ok(FragmentBlock { log, nfree, first }),
            other => Err(self.corruption(block, format!("expected a fragmented block, found {other:?}"))),
        }
    }

    fn set_fragment_block(&mut self, block: usize, frag: FragmentBlock) -> AllocResult<()> {
        self.set_descriptor(
            block,
            Descriptor::Fragmented { log: frag.log, nfree: frag.nfree, first: frag.first },
        )
    }

    /// Sets the `next` field of the node (or head) at `offset`.
    fn relink_next(&mut self, offset: usize, next: usize) -> AllocResult<()> {
        let link = self.link(offset)?;
        self.set_link(offset, FragmentLink { next: next as u64, ..link })
    }

    /// Sets the `prev` field of the node at `offset`, unless it is the end of the list.
    fn relink_prev(&mut self, offset: usize, prev: usize) -> AllocResult<()> {
        if offset == 0 {
            return Ok(());
        }
        let link = self.link(offset)?;
        self.set_link(offset, FragmentLink { prev: prev as u64, ..link })
    }

    /// Inserts the free fragment at `offset` right after the node (or head) at `after`.
    fn insert_after(&mut self, after: usize, offset: usize) -> AllocResult<()> {
        let next = self.link(after)?.next as usize;
        self.set_link(offset, FragmentLink { next: next as u64, prev: after as u64 })?;
        self.relink_next(after, offset)?;
        self.relink_prev(next, offset)
    }

    /// Allocates one fragment of `1 << log` bytes and returns its offset.
    pub(crate) fn allocate_fragment(&mut self, log: u32) -> AllocResult<usize> {
        let head = fragment_head(log);
        let offset = self.link(head)?.next as usize;
        if offset == 0 {
            return self.split_block(log);
        }

        let node = self.link(offset)?;
        let next = node.next as usize;
        self.relink_next(head, next)?;
        self.relink_prev(next, head)?;

        let block = block_of(offset);
        let mut frag = self.fragment_block(block)?;
        if frag.log != log || frag.nfree == 0 {
            return Err(self.corruption(block, format!("fragment list {log} holds a fragment of {frag:?}")));
        }
        frag.nfree -= 1;
        frag.first = if frag.nfree > 0 { (next % BLOCK_SIZE) >> log } else { 0 };
        self.set_fragment_block(block, frag)?;

        self.state.usage.on_alloc(1 << log);
        self.state.usage.chunks_free -= 1;
        trace!(arena = %self.id, offset, log, "fragment allocated");
        Ok(offset)
    }

    /// Takes a whole block, splits it into fragments of `1 << log` bytes and
    /// returns the first.
    fn split_block(&mut self, log: u32) -> AllocResult<usize> {
        let offset = self.allocate(BLOCK_SIZE, None, Origin::Internal)?.offset();
        let block = block_of(offset);
        let frag = FragmentBlock { log, nfree: (BLOCK_SIZE >> log) - 1, first: 1 };

        // Insert from the top down so the list ends up in address order.
        let head = fragment_head(log);
        for index in (1..frag.count()).rev() {
            self.insert_after(head, frag.offset_in(block, index))?;
        }
        self.set_fragment_block(block, frag)?;

        let spare = BLOCK_SIZE - (1 << log);
        self.state.usage.chunks_free += frag.nfree as u64;
        self.state.usage.bytes_free += spare as u64;
        self.state.usage.bytes_used -= spare as u64;
        trace!(arena = %self.id, block, log, "block split into fragments");
        Ok(offset)
    }

    /// Returns the fragment at `offset` to its list. Releases the whole block
    /// once every fragment in it is free.
    pub(crate) fn release_fragment(&mut self, offset: usize) -> AllocResult<()> {
        let block = block_of(offset);
        let mut frag = self.fragment_block(block)?;
        if offset % (1 << frag.log) != 0 || self.is_listed(block, offset)? {
            return Err(self.invalid(offset));
        }
        let size = 1usize << frag.log;
        self.state.usage.on_release(size);
        self.state.usage.chunks_free += 1;

        let first = frag.offset_in(block, frag.first);
        if frag.nfree == frag.count() - 1 {
            // Unlink the block's other free fragments and give the block back.
            let mut after = first;
            for _ in 1..frag.count() {
                after = self.link(after)?.next as usize;
            }
            let before = self.link(first)?.prev as usize;
            self.relink_next(before, after)?;
            self.relink_prev(after, before)?;

            self.set_descriptor(block, Descriptor::Large(Span::Head(1)))?;
            let usage = &mut self.state.usage;
            usage.chunks_used += 1;
            usage.bytes_used += BLOCK_SIZE as u64;
            usage.chunks_free -= frag.count() as u64;
            usage.bytes_free -= BLOCK_SIZE as u64;
            trace!(arena = %self.id, block, log = frag.log, "fragment block fully free");
            return self.release_blocks(block);
        }

        if frag.nfree != 0 {
            self.insert_after(first, offset)?;
            frag.nfree += 1;
        } else {
            self.insert_after(fragment_head(frag.log), offset)?;
            frag.nfree = 1;
            frag.first = (offset % BLOCK_SIZE) >> frag.log;
        }
        self.set_fragment_block(block, frag)?;
        trace!(arena = %self.id, offset, log = frag.log, "fragment released");
        Ok(())
    }

    /// Whether `offset` is already among the free fragments of `block`.
    fn is_listed(&self, block: usize, offset: usize) -> AllocResult<bool> {
        Ok(self.free_fragments(block)?.contains(&offset))
    }

    /// The free fragments of `block`, in list order.
    pub(crate) fn free_fragments(&self, block: usize) -> AllocResult<Vec<usize>> {
        let frag = self.fragment_block(block)?;
        let mut nodes = Vec::with_capacity(frag.nfree);
        let mut node = frag.offset_in(block, frag.first);
        for _ in 0..frag.nfree {
            if block_of(node) != block {
                return Err(self.corruption(block, "free fragments of a block are not adjacent in their list"));
            }
            nodes.push(node);
            node = self.link(node)?.next as usize;
        }
        Ok(nodes)
    }
}
