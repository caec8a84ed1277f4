use super::arena::Heap;
use crate::allocator::constants::{block_of, blockify, fragment_log, offset_of, BLOCK_SIZE, MAX_FRAGMENT_SIZE, OBJECT_INFO};
use crate::allocator::error::{AllocError, AllocResult};
use crate::allocator::handle::Address;
use crate::allocator::layout::header::LINK_SIZE;
use crate::allocator::layout::{Descriptor, Span};
use crate::allocator::naming::NameError;
use tracing::{trace, warn};

/// Who asked for an allocation.
///
/// Blocks the allocator takes for its own fragment lists are never named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Caller,
    Internal,
}

/// Where a live allocation sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Head block and span of a large allocation.
    Large { head: usize, blocks: usize },
    /// A fragment of `1 << log` bytes inside `block`.
    Fragment { block: usize, log: u32 },
}

impl Placement {
    /// Usable bytes at the allocation's address.
    pub(crate) fn capacity(&self) -> usize {
        match *self {
            Self::Large { blocks, .. } => blocks * BLOCK_SIZE,
            Self::Fragment { log, .. } => 1 << log,
        }
    }
}

impl Heap<'_> {
    /// The allocator entry point.
    ///
    /// A name, when given, is checked before anything is allocated and
    /// registered after. A registration failure leaves the memory allocated.
    pub(crate) fn allocate(&mut self, size: usize, name: Option<&str>, origin: Origin) -> AllocResult<Address> {
        let name = match origin {
            Origin::Caller => name.filter(|name| !name.is_empty()),
            Origin::Internal => None,
        };
        if let Some(name) = name {
            if self.directory.exists(self.id, name) {
                return Err(AllocError::AlreadyExists { arena: self.id, name: name.to_owned() });
            }
        }

        let rounded = size.max(LINK_SIZE);
        let offset = if rounded <= MAX_FRAGMENT_SIZE {
            self.allocate_fragment(fragment_log(rounded))?
        } else {
            let blocks = blockify(rounded);
            if blocks.checked_mul(BLOCK_SIZE).is_none() {
                return Err(AllocError::TooLarge { arena: self.id, requested: size });
            }
            offset_of(self.allocate_blocks(blocks)?)
        };
        let address = self.address(offset);
        trace!(arena = %self.id, size, offset, ?origin, "allocated");

        if let Some(name) = name {
            self.register(address, size, name, OBJECT_INFO).map_err(|source| {
                warn!(arena = %self.id, %address, name, %source, "name registration failed");
                AllocError::Registration { address, name: name.to_owned(), source }
            })?;
        }
        Ok(address)
    }

    /// Records `name` for `address` in the object directory.
    pub(crate) fn register(&mut self, address: Address, size: usize, name: &str, info: &str) -> Result<(), NameError> {
        let slot = self.directory.get_free_slot(self.id)?;
        if !self.directory.register(self.id, slot, address, name) {
            return Err(NameError::Rejected(name.to_owned()));
        }
        self.directory.set_info(self.id, slot, info);
        self.directory.set_size(self.id, slot, size);
        self.state.object_count = self.directory.object_count(self.id);
        Ok(())
    }

    /// Classifies the live allocation starting at `offset`.
    ///
    /// Bookkeeping blocks, free memory and interior addresses are rejected.
    pub(crate) fn placement(&self, offset: usize) -> AllocResult<Placement> {
        let block = block_of(offset);
        if block >= self.state.heap_limit || self.is_bookkeeping(block) {
            return Err(self.invalid(offset));
        }
        match self.descriptor(block)? {
            Descriptor::Large(Span::Head(blocks)) if offset == offset_of(block) => {
                Ok(Placement::Large { head: block, blocks })
            }
            Descriptor::Fragmented { log, .. } if offset % (1 << log) == 0 => {
                Ok(Placement::Fragment { block, log })
            }
            _ => Err(self.invalid(offset)),
        }
    }

    /// Releases the allocation at `offset` and drops its name, if any.
    pub(crate) fn release(&mut self, offset: usize) -> AllocResult<()> {
        match self.placement(offset)? {
            Placement::Large { head, .. } => self.release_blocks(head)?,
            Placement::Fragment { .. } => self.release_fragment(offset)?,
        }
        if let Some(record) = self.directory.unregister(self.id, offset) {
            trace!(arena = %self.id, offset, name = %record.name, "named object released");
            self.state.object_count = self.directory.object_count(self.id);
        }
        Ok(())
    }

    /// Resizes the allocation at `offset`, moving it only when it must.
    pub(crate) fn reallocate(&mut self, offset: usize, size: usize) -> AllocResult<Address> {
        let placement = self.placement(offset)?;
        let rounded = size.max(LINK_SIZE);
        match placement {
            Placement::Fragment { log, .. } if rounded <= MAX_FRAGMENT_SIZE && fragment_log(rounded) == log => {
                return Ok(self.address(offset));
            }
            Placement::Large { head, blocks } if rounded > MAX_FRAGMENT_SIZE && blockify(rounded) <= blocks => {
                self.shrink_blocks(head, blockify(rounded))?;
                return Ok(self.address(offset));
            }
            _ => {}
        }

        let moved = self.allocate(size, None, Origin::Caller)?.offset();
        let len = placement.capacity().min(rounded);
        let memory = self.memory();
        // SAFETY: the old allocation is still owned by the caller and the new
        // one has not been handed out; distinct live allocations never overlap.
        unsafe { memory.copy(offset, moved, len) }
            .ok_or_else(|| self.corruption(block_of(moved), "reallocation copy outside the mapping"))?;

        let address = self.address(moved);
        if self.directory.rebind(self.id, offset, address) {
            trace!(arena = %self.id, from = offset, to = moved, "named object moved");
        }
        match placement {
            Placement::Large { head, .. } => self.release_blocks(head)?,
            Placement::Fragment { .. } => self.release_fragment(offset)?,
        }
        Ok(address)
    }
}
