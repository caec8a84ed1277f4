//! Arena allocator internals and the adapters it consumes.

pub mod bootstrap;
pub mod config;
pub mod constants;
pub(crate) mod core;
pub mod error;
pub mod growth;
pub mod handle;
pub mod layout;
pub mod naming;
pub(crate) mod overlay;
pub mod registry;
pub mod stats;
pub(crate) mod syscall;

pub use self::bootstrap::Provenance;
pub use self::config::ArenaConfig;
pub use self::error::{AllocError, AllocResult};
pub use self::handle::{Address, ArenaId};
pub use self::registry::{
    allocate, attach, check, detach, initialize, inspect, is_initialized, lookup, reallocate, release, resolve,
    status, usage, Detached,
};
