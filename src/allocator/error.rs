//! Error types for arena allocation.
//!
//! Every variant names the arena it concerns. Adapter failures keep their own
//! error as `source` so the caller can see what the backing store or the
//! object directory reported.

use super::growth::GrowError;
use super::handle::{Address, ArenaId};
use super::naming::NameError;
use thiserror::Error;

/// The error type for arena operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The handle does not name an attached arena.
    #[error("{0} is not attached")]
    NotAttached(ArenaId),

    /// The arena is attached but its bookkeeping has not been bootstrapped.
    #[error("{0} has not been initialized")]
    Uninitialized(ArenaId),

    /// The address is not the start of a live allocation.
    #[error("offset {offset:#x} is not a live allocation in {arena}")]
    InvalidAddress {
        /// Arena the address was checked against.
        arena: ArenaId,
        /// Arena-relative offset that was rejected.
        offset: usize,
    },

    /// A named object with this name is already registered.
    #[error("object '{name}' already exists in {arena}")]
    AlreadyExists {
        /// Arena holding the existing record.
        arena: ArenaId,
        /// The duplicate name.
        name: String,
    },

    /// The growth adapter could not extend the arena.
    #[error("{arena} is out of space: {requested} more bytes requested")]
    OutOfSpace {
        /// Arena that failed to grow.
        arena: ArenaId,
        /// Bytes requested from the adapter.
        requested: usize,
        /// What the adapter reported.
        #[source]
        source: GrowError,
    },

    /// The request cannot be described by the arena's address space.
    #[error("{arena} cannot hold a request of {requested} bytes")]
    TooLarge {
        /// Arena the request was made against.
        arena: ArenaId,
        /// Bytes requested.
        requested: usize,
    },

    /// Block descriptor invariants do not hold. Fatal for the arena.
    #[error("{arena} is corrupted at block {block}: {cause}")]
    Corruption {
        /// Arena whose tables are damaged.
        arena: ArenaId,
        /// Block index where the violation was found.
        block: usize,
        /// Description of the violation.
        cause: String,
    },

    /// The memory was allocated but could not be registered under its name.
    ///
    /// The allocation is not rolled back; `address` stays valid and must be
    /// released by the caller.
    #[error("allocated {address} but could not register '{name}'")]
    Registration {
        /// The allocation that now exists unnamed.
        address: Address,
        /// The name that could not be registered.
        name: String,
        /// What the directory reported.
        #[source]
        source: NameError,
    },

    /// An existing arena was written with a different layout.
    #[error("{arena} has an incompatible layout: {cause}")]
    IncompatibleLayout {
        /// Arena that was being attached.
        arena: ArenaId,
        /// What did not match.
        cause: &'static str,
    },
}

impl AllocError {
    /// Whether this error means the arena's tables can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

/// Result alias used throughout the allocator.
pub type AllocResult<T> = Result<T, AllocError>;
