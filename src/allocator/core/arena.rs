use crate::allocator::config::ArenaConfig;
use crate::allocator::constants::{block_of, BLOCK_SIZE};
use crate::allocator::error::{AllocError, AllocResult};
use crate::allocator::growth::ArenaGrowth;
use crate::allocator::handle::{Address, ArenaId};
use crate::allocator::layout::{ArenaHeader, Descriptor, FragmentLink, RawDescriptor, Span, DESCRIPTOR_SIZE};
use crate::allocator::naming::NameDirectory;
use crate::allocator::overlay::ArenaMemory;
use crate::allocator::stats::UsageCounters;
use tracing::{debug, warn};

/// An attached arena: its adapters plus, once bootstrapped, its heap state.
pub(crate) struct Arena {
    pub(crate) id: ArenaId,
    pub(crate) region: Box<dyn ArenaGrowth>,
    pub(crate) directory: Box<dyn NameDirectory>,
    pub(crate) config: ArenaConfig,
    /// `None` until bootstrap has run.
    pub(crate) state: Option<HeapState>,
}

impl Arena {
    pub(crate) fn new(
        id: ArenaId,
        region: Box<dyn ArenaGrowth>,
        directory: Box<dyn NameDirectory>,
        config: ArenaConfig,
    ) -> Self {
        Self { id, region, directory, config, state: None }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Borrows the bootstrapped heap.
    pub(crate) fn heap(&mut self) -> AllocResult<Heap<'_>> {
        let state = self.state.as_mut().ok_or(AllocError::Uninitialized(self.id))?;
        Ok(Heap {
            id: self.id,
            region: &mut *self.region,
            directory: &mut *self.directory,
            state,
        })
    }
}

/// The parameter-block fields, mirrored in memory while the lock is held.
///
/// Flushed to the [`ArenaHeader`] at the end of every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeapState {
    pub(crate) table_offset: usize,
    pub(crate) table_capacity: usize,
    /// Rotating cursor into the large free list.
    pub(crate) heap_index: usize,
    /// One past the last block index that has been mapped.
    pub(crate) heap_limit: usize,
    pub(crate) usage: UsageCounters,
    pub(crate) object_count: usize,
}

impl HeapState {
    pub(crate) fn from_header(header: &ArenaHeader) -> Self {
        Self {
            table_offset: header.table_offset as usize,
            table_capacity: header.table_capacity as usize,
            heap_index: header.heap_index as usize,
            heap_limit: header.heap_limit as usize,
            usage: header.usage(),
            object_count: header.object_count as usize,
        }
    }

    /// Number of blocks the current Block Table occupies.
    pub(crate) fn table_blocks(&self) -> usize {
        (self.table_capacity * DESCRIPTOR_SIZE).div_ceil(BLOCK_SIZE)
    }
}

/// The body of a free run, as stored in its head descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeRun {
    pub(crate) size: usize,
    pub(crate) next: usize,
    pub(crate) prev: usize,
}

/// Exclusive access to one bootstrapped arena.
///
/// Only ever built while the process-wide arena lock is held.
pub(crate) struct Heap<'a> {
    pub(crate) id: ArenaId,
    pub(crate) region: &'a mut dyn ArenaGrowth,
    pub(crate) directory: &'a mut dyn NameDirectory,
    pub(crate) state: &'a mut HeapState,
}

impl Heap<'_> {
    /// The current mapping. Re-fetch after every growth.
    pub(crate) fn memory(&self) -> ArenaMemory {
        ArenaMemory::of(&*self.region)
    }

    pub(crate) fn address(&self, offset: usize) -> Address {
        Address::new(self.id, offset, self.memory().base_addr())
    }

    pub(crate) fn corruption(&self, block: usize, cause: impl Into<String>) -> AllocError {
        let cause = cause.into();
        warn!(arena = %self.id, block, %cause, "arena corruption detected");
        AllocError::Corruption { arena: self.id, block, cause }
    }

    pub(crate) fn invalid(&self, offset: usize) -> AllocError {
        AllocError::InvalidAddress { arena: self.id, offset }
    }

    fn descriptor_offset(&self, block: usize) -> AllocResult<usize> {
        if block >= self.state.table_capacity {
            return Err(self.corruption(block, "block index beyond the Block Table"));
        }
        Ok(self.state.table_offset + block * DESCRIPTOR_SIZE)
    }

    pub(crate) fn descriptor(&self, block: usize) -> AllocResult<Descriptor> {
        let offset = self.descriptor_offset(block)?;
        let raw: RawDescriptor = self
            .memory()
            .read(offset)
            .ok_or_else(|| self.corruption(block, "Block Table lies outside the mapping"))?;
        Descriptor::decode(raw).ok_or_else(|| self.corruption(block, "undecodable block descriptor"))
    }

    pub(crate) fn set_descriptor(&mut self, block: usize, desc: Descriptor) -> AllocResult<()> {
        let offset = self.descriptor_offset(block)?;
        self.memory()
            .write(offset, &desc.encode())
            .ok_or_else(|| self.corruption(block, "Block Table lies outside the mapping"))
    }

    /// Reads a block that must be the head of a free run (or the anchor).
    pub(crate) fn free_run(&self, block: usize) -> AllocResult<FreeRun> {
        match self.descriptor(block)? {
            Descriptor::Free { size, next, prev } => Ok(FreeRun { size, next, prev }),
            other => Err(self.corruption(block, format!("expected a free run, found {other:?}"))),
        }
    }

    pub(crate) fn set_free_run(&mut self, block: usize, run: FreeRun) -> AllocResult<()> {
        self.set_descriptor(
            block,
            Descriptor::Free { size: run.size, next: run.next, prev: run.prev },
        )
    }

    pub(crate) fn set_next(&mut self, block: usize, next: usize) -> AllocResult<()> {
        let run = self.free_run(block)?;
        self.set_free_run(block, FreeRun { next, ..run })
    }

    pub(crate) fn set_prev(&mut self, block: usize, prev: usize) -> AllocResult<()> {
        let run = self.free_run(block)?;
        self.set_free_run(block, FreeRun { prev, ..run })
    }

    /// Marks `blocks` blocks starting at `head` as one busy large allocation.
    pub(crate) fn mark_large(&mut self, head: usize, blocks: usize) -> AllocResult<()> {
        self.set_descriptor(head, Descriptor::Large(Span::Head(blocks)))?;
        for back in 1..blocks {
            self.set_descriptor(head + back, Descriptor::Large(Span::Continuation(back)))?;
        }
        Ok(())
    }

    /// Resolves any block of a large allocation to its head.
    pub(crate) fn owning_head(&self, block: usize) -> AllocResult<Option<usize>> {
        match self.descriptor(block)? {
            Descriptor::Large(Span::Head(_)) => Ok(Some(block)),
            Descriptor::Large(Span::Continuation(back)) if back < block => Ok(Some(block - back)),
            Descriptor::Large(Span::Continuation(_)) => {
                Err(self.corruption(block, "continuation points before the arena"))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn link(&self, offset: usize) -> AllocResult<FragmentLink> {
        // SAFETY: callers only pass list heads or offsets taken from a list.
        unsafe { self.memory().read_link(offset) }
            .ok_or_else(|| self.corruption(block_of(offset), "fragment link outside the mapping"))
    }

    pub(crate) fn set_link(&mut self, offset: usize, link: FragmentLink) -> AllocResult<()> {
        // SAFETY: callers only write heads and fragments that are on, or are
        // being put on, a free list.
        unsafe { self.memory().write_link(offset, link) }
            .ok_or_else(|| self.corruption(block_of(offset), "fragment link outside the mapping"))
    }

    /// Whether `block` holds allocator bookkeeping (parameter block or Block Table).
    pub(crate) fn is_bookkeeping(&self, block: usize) -> bool {
        let table = block_of(self.state.table_offset);
        block == block_of(0) || (table..table + self.state.table_blocks()).contains(&block)
    }

    /// Maps `bytes` more bytes at the frontier and returns their offset.
    ///
    /// The frontier must be block aligned and the adapter must grow exactly
    /// there; anything else would leave mapped bytes no descriptor covers.
    pub(crate) fn grow(&mut self, bytes: usize) -> AllocResult<usize> {
        let frontier = self.region.frontier();
        if frontier % BLOCK_SIZE != 0 {
            return Err(self.corruption(block_of(frontier), format!("frontier {frontier:#x} is not block aligned")));
        }
        let at = self
            .region
            .grow(bytes)
            .map_err(|source| AllocError::OutOfSpace { arena: self.id, requested: bytes, source })?;
        if at != frontier {
            return Err(self.corruption(block_of(at), format!("adapter grew at {at:#x}, frontier was {frontier:#x}")));
        }
        debug!(arena = %self.id, bytes, offset = at, "arena grown");
        Ok(at)
    }

    /// Writes the in-memory state back to the parameter block.
    pub(crate) fn flush(&mut self) -> AllocResult<()> {
        let memory = self.memory();
        let mut header: ArenaHeader = memory
            .read(0)
            .ok_or_else(|| self.corruption(block_of(0), "parameter block is not mapped"))?;
        header.mapped_base = memory.base_addr() as u64;
        header.extent = self.region.frontier() as u64;
        header.table_offset = self.state.table_offset as u64;
        header.table_capacity = self.state.table_capacity as u64;
        header.heap_index = self.state.heap_index as u64;
        header.heap_limit = self.state.heap_limit as u64;
        header.set_usage(&self.state.usage);
        header.object_count = self.state.object_count as u64;
        header.arena_id = u64::from(self.id.raw());
        memory
            .write(0, &header)
            .ok_or_else(|| self.corruption(block_of(0), "parameter block is not mapped"))
    }
}
