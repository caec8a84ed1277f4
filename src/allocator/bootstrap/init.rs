//! New-arena layout and restoration of existing arenas.

use crate::allocator::constants::{blockify, block_of, BLOCK_SIZE, PARAMETER_BLOCKS, ROOT_OBJECT_INFO};
use crate::allocator::core::{Arena, Heap, HeapState};
use crate::allocator::error::{AllocError, AllocResult};
use crate::allocator::handle::ArenaId;
use crate::allocator::layout::header::FLAG_INITIALIZED;
use crate::allocator::layout::{ArenaHeader, Descriptor, DESCRIPTOR_SIZE};
use crate::allocator::overlay::ArenaMemory;
use crate::allocator::stats::UsageCounters;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Whether the region handed to [`crate::initialize`] is empty or holds an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// A freshly mapped, empty region.
    New,
    /// A region that already holds a bootstrapped arena, possibly mapped
    /// at a different base than when it was last used.
    Existing,
}

impl Arena {
    /// Brings the arena into an allocatable state. A no-op once done.
    pub(crate) fn initialize(&mut self, provenance: Provenance) -> AllocResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let state = match provenance {
            Provenance::New => self.bootstrap_new()?,
            Provenance::Existing => self.restore()?,
        };
        self.state = Some(state);
        Ok(())
    }

    fn incompatible(&self, cause: &'static str) -> AllocError {
        AllocError::IncompatibleLayout { arena: self.id, cause }
    }

    fn bootstrap_new(&mut self) -> AllocResult<HeapState> {
        if self.region.frontier() != 0 {
            return Err(self.incompatible("region handed over as new is not empty"));
        }
        let root_name = self.config.root_name.clone();
        let extent = self.config.initial_extent;
        let capacity = self.config.initial_table_capacity();
        let table_bytes = blockify(capacity * DESCRIPTOR_SIZE) * BLOCK_SIZE;

        let mut state = HeapState {
            table_offset: 0,
            table_capacity: capacity,
            heap_index: 0,
            heap_limit: 1,
            usage: UsageCounters::default(),
            object_count: 0,
        };
        let mut heap = Heap {
            id: self.id,
            region: &mut *self.region,
            directory: &mut *self.directory,
            state: &mut state,
        };

        let params = heap.grow(PARAMETER_BLOCKS * BLOCK_SIZE)?;
        let table = heap.grow(table_bytes)?;
        let memory = heap.memory();
        memory
            .zero(params, PARAMETER_BLOCKS * BLOCK_SIZE)
            .and_then(|()| memory.zero(table, table_bytes))
            .ok_or_else(|| heap.corruption(block_of(params), "bootstrap region is not mapped"))?;

        let mut header = ArenaHeader::new(memory.base_addr());
        header.flags |= FLAG_INITIALIZED;
        memory
            .write(params, &header)
            .ok_or_else(|| heap.corruption(block_of(params), "parameter block is not mapped"))?;

        heap.state.table_offset = table;
        heap.state.heap_limit = block_of(table + table_bytes);
        heap.set_descriptor(0, Descriptor::Free { size: 0, next: 0, prev: 0 })?;
        heap.mark_large(block_of(params), PARAMETER_BLOCKS)?;
        heap.state.usage.on_grow_used(PARAMETER_BLOCKS * BLOCK_SIZE);
        heap.mark_large(block_of(table), table_bytes / BLOCK_SIZE)?;
        heap.state.usage.on_grow_used(table_bytes);

        let root = heap.address(params);
        heap.register(root, extent, &root_name, ROOT_OBJECT_INFO)
            .map_err(|source| AllocError::Registration { address: root, name: root_name.clone(), source })?;
        heap.flush()?;
        debug!(
            arena = %self.id,
            capacity,
            table_offset = table,
            root = %root_name,
            "bootstrapped new arena"
        );
        Ok(state)
    }

    fn restore(&mut self) -> AllocResult<HeapState> {
        let header: ArenaHeader = ArenaMemory::of(&*self.region)
            .read(0)
            .ok_or_else(|| self.incompatible("region is too small to hold a parameter block"))?;
        header.validate().map_err(|cause| self.incompatible(cause))?;

        let extent = header.extent as usize;
        let frontier = self.region.frontier();
        if extent > frontier {
            self.region.grow(extent - frontier).map_err(|source| AllocError::OutOfSpace {
                arena: self.id,
                requested: extent - frontier,
                source,
            })?;
            debug!(arena = %self.id, extent, mapped = frontier, "remapped arena to its declared extent");
        }

        let mut state = HeapState::from_header(&header);
        let table_end = state
            .table_capacity
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|bytes| bytes.checked_add(state.table_offset));
        let described = table_end.is_some_and(|end| end <= self.region.frontier())
            && state.table_offset % BLOCK_SIZE == 0
            && (2..=state.table_capacity).contains(&state.heap_limit);
        if !described {
            return Err(AllocError::Corruption {
                arena: self.id,
                block: block_of(state.table_offset),
                cause: "parameter block describes a Block Table outside the arena".to_owned(),
            });
        }

        let base = self.region.base().as_ptr() as usize;
        let old_base = header.mapped_base as usize;
        if old_base != base {
            info!(arena = %self.id, old_base, new_base = base, "arena relocated since last attach");
            self.region.relocate_notify(old_base, base);
        }

        let previous = ArenaId::new(header.arena_id as u32);
        let adopted = self.directory.adopt(previous, self.id);
        if adopted > 0 {
            debug!(arena = %self.id, %previous, adopted, "named objects carried over from previous attach");
        }

        let mut heap = Heap {
            id: self.id,
            region: &mut *self.region,
            directory: &mut *self.directory,
            state: &mut state,
        };
        heap.state.object_count = heap.directory.object_count(heap.id);
        heap.flush()?;
        debug!(arena = %self.id, heap_limit = heap.state.heap_limit, "restored existing arena");
        Ok(state)
    }
}
