//! Arena bootstrap: laying out a new arena, or picking up an existing one.

pub mod init;

pub use init::Provenance;
