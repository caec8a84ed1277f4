//! Named-object directory interface.
//!
//! Allocations given a name are recorded here by arena-relative offset, so
//! they can be found again after the arena is mapped at another address.

pub mod directory;

pub use directory::ObjectDirectory;

use super::handle::{Address, ArenaId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a name directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Every slot is in use.
    #[error("object directory is full ({capacity} slots)")]
    Full {
        /// Slots the directory holds.
        capacity: usize,
    },

    /// The directory refused the record.
    #[error("object directory rejected '{0}'")]
    Rejected(String),
}

/// One named object record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedObject {
    /// Arena the object lives in.
    pub arena: ArenaId,
    /// Directory slot holding the record.
    pub slot: usize,
    /// Registered name.
    pub name: String,
    /// Arena-relative offset of the object.
    pub offset: usize,
    /// Size declared at registration.
    pub size: usize,
    /// Free-text description.
    pub info: String,
}

/// The directory operations the allocator consumes.
///
/// The allocator only ever adds records for caller-named top-level
/// allocations, and removes a record when the object it names is released.
pub trait NameDirectory: Send {
    /// Whether `name` is registered for `arena`.
    fn exists(&self, arena: ArenaId, name: &str) -> bool;

    /// An unused slot. Never returns a slot that holds a record.
    fn get_free_slot(&mut self, arena: ArenaId) -> Result<usize, NameError>;

    /// Records `name` for `address` in `slot`. Returns false if refused.
    fn register(&mut self, arena: ArenaId, slot: usize, address: Address, name: &str) -> bool;

    /// Sets the free-text info of a record.
    fn set_info(&mut self, arena: ArenaId, slot: usize, info: &str);

    /// Sets the declared size of a record.
    fn set_size(&mut self, arena: ArenaId, slot: usize, size: usize);

    /// The record registered under `name`.
    fn lookup(&self, arena: ArenaId, name: &str) -> Option<NamedObject>;

    /// Points the record for the object at `old_offset` to `address`.
    fn rebind(&mut self, arena: ArenaId, old_offset: usize, address: Address) -> bool;

    /// Removes the record for the object at `offset`, if there is one.
    fn unregister(&mut self, arena: ArenaId, offset: usize) -> Option<NamedObject>;

    /// Number of records held for `arena`.
    fn object_count(&self, arena: ArenaId) -> usize;

    /// Moves every record of arena `from` over to arena `to`.
    ///
    /// Called when an existing arena is re-attached under a new id.
    fn adopt(&mut self, from: ArenaId, to: ArenaId) -> usize;
}

impl<T: NameDirectory + ?Sized> NameDirectory for Box<T> {
    fn exists(&self, arena: ArenaId, name: &str) -> bool {
        (**self).exists(arena, name)
    }

    fn get_free_slot(&mut self, arena: ArenaId) -> Result<usize, NameError> {
        (**self).get_free_slot(arena)
    }

    fn register(&mut self, arena: ArenaId, slot: usize, address: Address, name: &str) -> bool {
        (**self).register(arena, slot, address, name)
    }

    fn set_info(&mut self, arena: ArenaId, slot: usize, info: &str) {
        (**self).set_info(arena, slot, info);
    }

    fn set_size(&mut self, arena: ArenaId, slot: usize, size: usize) {
        (**self).set_size(arena, slot, size);
    }

    fn lookup(&self, arena: ArenaId, name: &str) -> Option<NamedObject> {
        (**self).lookup(arena, name)
    }

    fn rebind(&mut self, arena: ArenaId, old_offset: usize, address: Address) -> bool {
        (**self).rebind(arena, old_offset, address)
    }

    fn unregister(&mut self, arena: ArenaId, offset: usize) -> Option<NamedObject> {
        (**self).unregister(arena, offset)
    }

    fn object_count(&self, arena: ArenaId) -> usize {
        (**self).object_count(arena)
    }

    fn adopt(&mut self, from: ArenaId, to: ArenaId) -> usize {
        (**self).adopt(from, to)
    }
}
