//! The process-wide arena table and the public operations over it.
//!
//! Every attached arena lives in one table behind one mutex. Each operation
//! holds the lock from start to finish, so the Block Table and free lists of
//! an arena are never observed half-updated.

use super::bootstrap::Provenance;
use super::config::ArenaConfig;
use super::core::{Arena, Heap, Origin};
use super::error::{AllocError, AllocResult};
use super::growth::ArenaGrowth;
use super::handle::{Address, ArenaId};
use super::naming::NameDirectory;
use super::stats::{ArenaStatus, BlockInfo, HeapReport, UsageCounters};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct ArenaTable {
    arenas: Vec<Arena>,
    next_id: u32,
}

impl ArenaTable {
    fn get_mut(&mut self, id: ArenaId) -> AllocResult<&mut Arena> {
        self.arenas
            .iter_mut()
            .find(|arena| arena.id == id)
            .ok_or(AllocError::NotAttached(id))
    }
}

static ARENAS: Mutex<ArenaTable> = Mutex::new(ArenaTable { arenas: Vec::new(), next_id: 0 });

// A panic mid-operation leaves at worst the in-memory mirror of one arena
// stale; the persisted state is only ever written by `flush`.
fn lock() -> MutexGuard<'static, ArenaTable> {
    ARENAS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `op` on a bootstrapped arena and persists its state afterwards,
/// whether or not `op` succeeded.
fn with_heap<R>(id: ArenaId, op: impl FnOnce(&mut Heap<'_>) -> AllocResult<R>) -> AllocResult<R> {
    let mut table = lock();
    let mut heap = table.get_mut(id)?.heap()?;
    let result = op(&mut heap);
    let flushed = heap.flush();
    let value = result?;
    flushed?;
    Ok(value)
}

fn read_heap<R>(id: ArenaId, op: impl FnOnce(&Heap<'_>) -> AllocResult<R>) -> AllocResult<R> {
    let mut table = lock();
    let heap = table.get_mut(id)?.heap()?;
    op(&heap)
}

/// An arena taken out of the table by [`detach`].
pub struct Detached {
    /// The growth adapter, still holding the arena image.
    pub region: Box<dyn ArenaGrowth>,
    /// The name directory, with the arena's records.
    pub directory: Box<dyn NameDirectory>,
    /// Usage at detach time, if the arena had been initialized.
    pub usage: Option<UsageCounters>,
}

/// Adds an arena to the process-wide table.
///
/// The arena cannot allocate until [`initialize`] has run on it.
pub fn attach<G, D>(region: G, directory: D, config: ArenaConfig) -> ArenaId
where
    G: ArenaGrowth + 'static,
    D: NameDirectory + 'static,
{
    let mut table = lock();
    let id = ArenaId::new(table.next_id);
    table.next_id += 1;
    table.arenas.push(Arena::new(id, Box::new(region), Box::new(directory), config));
    debug!(arena = %id, "arena attached");
    id
}

/// Bootstraps a new arena or restores an existing one. Idempotent.
pub fn initialize(arena: ArenaId, provenance: Provenance) -> AllocResult<()> {
    lock().get_mut(arena)?.initialize(provenance)
}

/// Whether [`initialize`] has completed for `arena`.
pub fn is_initialized(arena: ArenaId) -> AllocResult<bool> {
    Ok(lock().get_mut(arena)?.is_initialized())
}

/// Allocates `size` bytes in `arena`, optionally under a name.
///
/// Requests of up to half a block come from a power-of-two fragment list,
/// anything larger takes whole blocks. A non-empty `name` must not be
/// registered in the arena yet; it is recorded once the memory is
/// allocated. If recording fails the memory stays allocated and
/// [`AllocError::Registration`] carries its address.
pub fn allocate(arena: ArenaId, size: usize, name: Option<&str>) -> AllocResult<Address> {
    with_heap(arena, |heap| heap.allocate(size, name, Origin::Caller))
}

/// Releases a live allocation, dropping its name if it has one.
pub fn release(address: Address) -> AllocResult<()> {
    with_heap(address.arena(), |heap| heap.release(address.offset()))
}

/// Resizes a live allocation, keeping its name.
///
/// The address only changes when the allocation cannot be resized in place.
pub fn reallocate(address: Address, size: usize) -> AllocResult<Address> {
    with_heap(address.arena(), |heap| heap.reallocate(address.offset(), size))
}

/// Turns a pointer into the current mapping of `arena` into an [`Address`].
pub fn resolve(arena: ArenaId, ptr: *const u8) -> AllocResult<Address> {
    read_heap(arena, |heap| {
        let offset = (ptr as usize)
            .checked_sub(heap.memory().base_addr())
            .filter(|&offset| offset < heap.region.frontier())
            .ok_or(AllocError::InvalidAddress { arena, offset: ptr as usize })?;
        Ok(heap.address(offset))
    })
}

/// Finds a named object against the arena's current base.
pub fn lookup(arena: ArenaId, name: &str) -> AllocResult<Option<Address>> {
    read_heap(arena, |heap| {
        Ok(heap
            .directory
            .lookup(arena, name)
            .map(|record| heap.address(record.offset)))
    })
}

/// The four usage counters.
pub fn usage(arena: ArenaId) -> AllocResult<UsageCounters> {
    read_heap(arena, |heap| Ok(heap.state.usage))
}

/// Usage counters plus the arena's mapping and table sizes.
pub fn status(arena: ArenaId) -> AllocResult<ArenaStatus> {
    read_heap(arena, |heap| {
        Ok(ArenaStatus {
            usage: heap.state.usage,
            mapped_len: heap.region.frontier(),
            heap_limit: heap.state.heap_limit,
            table_capacity: heap.state.table_capacity,
            object_count: heap.state.object_count,
        })
    })
}

/// Resolves the block holding `address` and how it is used.
pub fn inspect(address: Address) -> AllocResult<BlockInfo> {
    read_heap(address.arena(), |heap| heap.inspect(address.offset()))
}

/// Walks every free list of `arena` and cross-checks its counters.
///
/// Any inconsistency is reported as [`AllocError::Corruption`].
pub fn check(arena: ArenaId) -> AllocResult<HeapReport> {
    read_heap(arena, |heap| heap.check())
}

/// Removes `arena` from the table, persisting its parameter block first.
pub fn detach(arena: ArenaId) -> AllocResult<Detached> {
    let mut table = lock();
    let index = table
        .arenas
        .iter()
        .position(|entry| entry.id == arena)
        .ok_or(AllocError::NotAttached(arena))?;
    let entry = &mut table.arenas[index];
    let usage = match entry.heap() {
        Ok(mut heap) => {
            heap.flush()?;
            Some(heap.state.usage)
        }
        Err(_) => None,
    };
    let entry = table.arenas.swap_remove(index);
    debug!(arena = %arena, "arena detached");
    Ok(Detached {
        region: entry.region,
        directory: entry.directory,
        usage,
    })
}
