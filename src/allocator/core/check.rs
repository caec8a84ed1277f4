//! Read-only walks over an arena's bookkeeping.

use super::arena::Heap;
use crate::allocator::constants::{block_of, offset_of, BLOCK_SIZE, FRAGMENT_CLASSES};
use crate::allocator::error::AllocResult;
use crate::allocator::layout::header::fragment_head;
use crate::allocator::layout::{Descriptor, Span};
use crate::allocator::stats::{BlockInfo, BlockKind, HeapReport};
use std::collections::HashMap;

impl Heap<'_> {
    /// The free run containing `block`, if any.
    fn enclosing_free_run(&self, block: usize) -> AllocResult<Option<usize>> {
        let mut run = self.free_run(0)?.next;
        let mut steps = 0;
        while run != 0 && run <= block {
            let body = self.free_run(run)?;
            if block < run + body.size {
                return Ok(Some(run));
            }
            run = body.next;
            steps += 1;
            if steps > self.state.table_capacity {
                return Err(self.corruption(0, "large free list does not close"));
            }
        }
        Ok(None)
    }

    /// Describes the block holding `offset`.
    pub(crate) fn inspect(&self, offset: usize) -> AllocResult<BlockInfo> {
        let block = block_of(offset);
        if block >= self.state.heap_limit {
            return Err(self.invalid(offset));
        }
        let kind = if self.is_bookkeeping(block) {
            BlockKind::Bookkeeping
        } else if let Some(run) = self.enclosing_free_run(block)? {
            BlockKind::Free { run }
        } else {
            match self.descriptor(block)? {
                Descriptor::Fragmented { log, nfree, .. } => {
                    BlockKind::Fragment { log, size: 1 << log, free_in_block: nfree }
                }
                Descriptor::Large(Span::Untracked) => return Err(self.invalid(offset)),
                Descriptor::Large(_) => {
                    let head = self.owning_head(block)?.ok_or_else(|| self.invalid(offset))?;
                    match self.descriptor(head)? {
                        Descriptor::Large(Span::Head(blocks)) if block < head + blocks => {
                            BlockKind::Large { head, blocks }
                        }
                        _ => return Err(self.corruption(block, "continuation does not lead to its head")),
                    }
                }
                Descriptor::Free { .. } => {
                    return Err(self.corruption(block, "free descriptor outside the free list"))
                }
            }
        };
        Ok(BlockInfo { block, kind })
    }

    /// Walks every list in the arena and cross-checks the usage counters.
    pub(crate) fn check(&self) -> AllocResult<HeapReport> {
        let (free_runs, free_blocks) = self.check_free_list()?;
        let fragments = self.check_fragment_lists()?;

        let usage = self.state.usage;
        let mapped = (self.state.heap_limit - 1) * BLOCK_SIZE;
        if usage.total_bytes() != mapped as u64 {
            return Err(self.corruption(
                self.state.heap_limit,
                format!("usage counters cover {} bytes, {mapped} are mapped", usage.total_bytes()),
            ));
        }
        let listed_free = free_blocks * BLOCK_SIZE
            + fragments.iter().map(|&(log, count)| count << log).sum::<usize>();
        if usage.bytes_free != listed_free as u64 {
            return Err(self.corruption(
                0,
                format!("{} bytes counted free, {listed_free} found on free lists", usage.bytes_free),
            ));
        }
        if usage.chunks_free != (free_runs + fragments.iter().map(|&(_, count)| count).sum::<usize>()) as u64 {
            return Err(self.corruption(0, "free chunk count does not match the free lists"));
        }
        Ok(HeapReport { free_runs, free_blocks, fragments, usage })
    }

    /// Returns the number of free runs and the blocks they cover.
    fn check_free_list(&self) -> AllocResult<(usize, usize)> {
        let anchor = self.free_run(0)?;
        if anchor.size != 0 {
            return Err(self.corruption(0, "free list anchor has a size"));
        }
        let (mut runs, mut blocks) = (0, 0);
        let mut current = 0;
        let mut end = 1;
        loop {
            let body = self.free_run(current)?;
            let next = body.next;
            if self.free_run(next)?.prev != current {
                return Err(self.corruption(next, "free list prev does not invert next"));
            }
            if next == 0 {
                break;
            }
            let run = self.free_run(next)?;
            if next < end {
                return Err(self.corruption(next, "free list out of address order"));
            }
            if run.size == 0 || next + run.size > self.state.heap_limit {
                return Err(self.corruption(next, format!("impossible free run of {} blocks", run.size)));
            }
            runs += 1;
            blocks += run.size;
            end = next + run.size;
            current = next;
            if runs > self.state.table_capacity {
                return Err(self.corruption(next, "large free list does not close"));
            }
        }
        Ok((runs, blocks))
    }

    /// Returns `(log, free fragments)` for every non-empty class.
    fn check_fragment_lists(&self) -> AllocResult<Vec<(u32, usize)>> {
        let limit = self.state.table_capacity * (BLOCK_SIZE >> 4);
        let mut classes = Vec::new();
        for log in 0..FRAGMENT_CLASSES as u32 {
            let head = fragment_head(log);
            let mut per_block: HashMap<usize, usize> = HashMap::new();
            let mut current_block = None;
            let mut prev = head;
            let mut node = self.link(head)?.next as usize;
            let mut count = 0;
            while node != 0 {
                let link = self.link(node)?;
                let block = block_of(node);
                if link.prev as usize != prev {
                    return Err(self.corruption(block, "fragment list prev does not invert next"));
                }
                match self.descriptor(block)? {
                    Descriptor::Fragmented { log: found, .. } if found == log => {}
                    other => {
                        return Err(self.corruption(block, format!("fragment list {log} reaches {other:?}")))
                    }
                }
                if node % (1 << log) != 0 || node < offset_of(block) {
                    return Err(self.corruption(block, "misaligned free fragment"));
                }
                if current_block != Some(block) {
                    if per_block.contains_key(&block) {
                        return Err(self.corruption(block, "free fragments of a block are not adjacent in their list"));
                    }
                    current_block = Some(block);
                }
                *per_block.entry(block).or_default() += 1;
                count += 1;
                if count > limit {
                    return Err(self.corruption(block, "fragment list does not end"));
                }
                prev = node;
                node = link.next as usize;
            }
            for (&block, &listed) in &per_block {
                if let Descriptor::Fragmented { nfree, .. } = self.descriptor(block)? {
                    if nfree != listed {
                        return Err(self.corruption(block, format!("nfree is {nfree}, {listed} fragments listed")));
                    }
                }
            }
            if count > 0 {
                classes.push((log, count));
            }
        }
        Ok(classes)
    }
}
