//! Whole-block allocations and the circular, address-ordered free list.
//!
//! Descriptor 0 is the list anchor: a free run of size 0 that is never
//! handed out. Runs are linked in ascending block order, so `desc[0].prev`
//! is always the highest free run in the arena.

use super::arena::{FreeRun, Heap};
use crate::allocator::constants::{block_of, blockify, offset_of, BLOCK_SIZE};
use crate::allocator::error::{AllocError, AllocResult};
use crate::allocator::layout::{Descriptor, Span, DESCRIPTOR_SIZE};
use tracing::{debug, trace};

impl Heap<'_> {
    /// Allocates `blocks` contiguous blocks and returns the head block index.
    pub(crate) fn allocate_blocks(&mut self, blocks: usize) -> AllocResult<usize> {
        let start = self.state.heap_index;
        let mut block = start;
        let mut steps = 0;
        loop {
            let run = self.free_run(block)?;
            if run.size >= blocks {
                break;
            }
            block = run.next;
            steps += 1;
            if steps > self.state.table_capacity {
                return Err(self.corruption(start, "large free list does not close"));
            }
            if block == start {
                match self.extend_final_run(blocks)? {
                    Some(last) => {
                        block = last;
                        break;
                    }
                    None => return self.allocate_fresh(blocks),
                }
            }
        }
        self.take_run(block, blocks)?;
        Ok(block)
    }

    /// Grows the highest free run in place if it ends at the mapping frontier.
    ///
    /// Returns the run's head once it is large enough, or `None` if the run
    /// is not adjacent to the frontier.
    fn extend_final_run(&mut self, blocks: usize) -> AllocResult<Option<usize>> {
        let last = self.free_run(0)?.prev;
        if last == 0 {
            return Ok(None);
        }
        let run = self.free_run(last)?;
        let heap_limit = self.state.heap_limit;
        if last + run.size != heap_limit || self.region.frontier() != offset_of(heap_limit) {
            return Ok(None);
        }

        let shortfall = blocks - run.size;
        let bytes = shortfall * BLOCK_SIZE;
        let at = self.morecore(bytes)?;
        if at != offset_of(heap_limit) {
            return Err(self.corruption(heap_limit, "frontier moved while extending the final run"));
        }
        // A doubled table releases its old copy, which may merge into the
        // final run from below; the run still ends at the old limit.
        let last = self.free_run(0)?.prev;
        let run = self.free_run(last)?;
        if last + run.size != heap_limit {
            return Err(self.corruption(last, "final free run moved while the arena grew"));
        }
        self.set_free_run(last, FreeRun { size: run.size + shortfall, ..run })?;
        self.state.usage.on_grow_free(bytes);
        debug!(arena = %self.id, block = last, shortfall, "extended final free run");
        Ok(Some(last))
    }

    /// Satisfies a request from freshly mapped memory.
    fn allocate_fresh(&mut self, blocks: usize) -> AllocResult<usize> {
        let bytes = blocks * BLOCK_SIZE;
        let offset = self.morecore(bytes)?;
        let head = block_of(offset);
        self.mark_large(head, blocks)?;
        self.state.usage.on_grow_used(bytes);
        Ok(head)
    }

    /// Maps `bytes` more bytes, doubling the Block Table when the new
    /// region lies beyond it. Returns the offset of the region.
    ///
    /// The region and a new table are mapped by one growth call, so a
    /// failure leaves the arena exactly as it was.
    fn morecore(&mut self, bytes: usize) -> AllocResult<usize> {
        let id = self.id;
        let too_large = move || AllocError::TooLarge { arena: id, requested: bytes };
        let table_at = self.region.frontier().checked_add(bytes).ok_or_else(too_large)?;
        let end = block_of(table_at);
        if end <= self.state.table_capacity {
            let result = self.grow(bytes)?;
            self.state.heap_limit = self.state.heap_limit.max(end);
            return Ok(result);
        }

        let old_offset = self.state.table_offset;
        let old_capacity = self.state.table_capacity;
        let mut capacity = old_capacity;
        let table_bytes = loop {
            capacity = capacity.checked_mul(2).ok_or_else(too_large)?;
            let table_bytes = blockify(capacity * DESCRIPTOR_SIZE) * BLOCK_SIZE;
            let table_end = table_at.checked_add(table_bytes).ok_or_else(too_large)?;
            if block_of(table_end) <= capacity {
                break table_bytes;
            }
        };

        let result = self.grow(bytes + table_bytes)?;
        let new_offset = result + bytes;
        let memory = self.memory();
        let copied_len = old_capacity * DESCRIPTOR_SIZE;
        // SAFETY: both tables are bookkeeping memory and the new one lies
        // entirely above the old one.
        unsafe { memory.copy(old_offset, new_offset, copied_len) }
            .and_then(|()| memory.zero(new_offset + copied_len, table_bytes - copied_len))
            .ok_or_else(|| self.corruption(block_of(new_offset), "new Block Table is not mapped"))?;

        self.state.table_offset = new_offset;
        self.state.table_capacity = capacity;
        self.state.heap_limit = block_of(new_offset + table_bytes);
        let table_blocks = table_bytes / BLOCK_SIZE;
        self.mark_large(block_of(new_offset), table_blocks)?;
        self.state.usage.on_grow_used(table_bytes);

        // The old table was recorded as a busy large allocation; recycle it.
        self.release_blocks(block_of(old_offset))?;
        debug!(
            arena = %self.id,
            old_capacity,
            capacity,
            offset = new_offset,
            "Block Table doubled"
        );
        Ok(result)
    }

    /// Removes the first `blocks` blocks of the free run at `block` from the
    /// free list and marks them busy.
    fn take_run(&mut self, block: usize, blocks: usize) -> AllocResult<()> {
        let run = self.free_run(block)?;
        if run.size > blocks {
            let tail = block + blocks;
            self.set_free_run(tail, FreeRun { size: run.size - blocks, ..run })?;
            self.set_next(run.prev, tail)?;
            self.set_prev(run.next, tail)?;
            self.state.heap_index = tail;
        } else {
            self.set_prev(run.next, run.prev)?;
            self.set_next(run.prev, run.next)?;
            self.state.heap_index = run.next;
            self.state.usage.chunks_free -= 1;
        }
        self.mark_large(block, blocks)?;
        self.state.usage.on_alloc(blocks * BLOCK_SIZE);
        trace!(arena = %self.id, block, blocks, "blocks taken from free run");
        Ok(())
    }

    /// Returns the large allocation headed by `block` to the free list,
    /// merging it with adjacent free runs.
    pub(crate) fn release_blocks(&mut self, block: usize) -> AllocResult<()> {
        let size = match self.descriptor(block)? {
            Descriptor::Large(Span::Head(size)) => size,
            other => {
                return Err(self.corruption(block, format!("released block is {other:?}, not a large head")))
            }
        };
        self.state.usage.on_release(size * BLOCK_SIZE);

        let pred = self.predecessor(block)?;
        let pred_run = self.free_run(pred)?;
        let block = if pred != 0 && pred + pred_run.size == block {
            self.set_free_run(pred, FreeRun { size: pred_run.size + size, ..pred_run })?;
            pred
        } else {
            self.set_free_run(block, FreeRun { size, next: pred_run.next, prev: pred })?;
            self.set_next(pred, block)?;
            self.set_prev(pred_run.next, block)?;
            self.state.usage.chunks_free += 1;
            block
        };

        let run = self.free_run(block)?;
        if run.next != 0 && block + run.size == run.next {
            let succ = self.free_run(run.next)?;
            self.set_free_run(block, FreeRun { size: run.size + succ.size, next: succ.next, prev: run.prev })?;
            self.set_prev(succ.next, block)?;
            self.state.usage.chunks_free -= 1;
        }
        self.state.heap_index = block;
        trace!(arena = %self.id, block, size, "blocks released");
        Ok(())
    }

    /// The free run (or the anchor) immediately below `block` in address order.
    fn predecessor(&self, block: usize) -> AllocResult<usize> {
        let mut i = self.state.heap_index;
        let mut steps = 0;
        let mut step = |heap: &Self| {
            steps += 1;
            if steps > heap.state.table_capacity {
                return Err(heap.corruption(block, "large free list does not close"));
            }
            Ok(())
        };
        if i > block {
            while i > block {
                i = self.free_run(i)?.prev;
                step(self)?;
            }
        } else {
            loop {
                i = self.free_run(i)?.next;
                step(self)?;
                if i == 0 || i >= block {
                    break;
                }
            }
            i = self.free_run(i)?.prev;
        }
        Ok(i)
    }

    /// Shrinks the large allocation at `head` to `blocks` blocks, freeing the tail.
    pub(crate) fn shrink_blocks(&mut self, head: usize, blocks: usize) -> AllocResult<()> {
        let size = match self.descriptor(head)? {
            Descriptor::Large(Span::Head(size)) => size,
            other => return Err(self.corruption(head, format!("expected a large head, found {other:?}"))),
        };
        if blocks >= size {
            return Ok(());
        }
        self.set_descriptor(head, Descriptor::Large(Span::Head(blocks)))?;
        self.mark_large(head + blocks, size - blocks)?;
        // The tail counts as a live chunk until it is released.
        self.state.usage.chunks_used += 1;
        self.release_blocks(head + blocks)
    }
}
