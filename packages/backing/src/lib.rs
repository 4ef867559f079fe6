//! Byte-stream collaborators for the preference store.
//!
//! This crate knows nothing about preference nodes or the file format. It
//! moves whole streams of bytes between the store and wherever they live:
//!
//! - [`BackingStore`] - the collaborator trait
//! - [`MemoryBackingStore`] - streams kept in a map, for tests and ephemeral hosts
//! - [`LocalDiskBackingStore`] - streams as files below a root directory
//!
//! Absence is not an error: reading a missing stream yields `Ok(None)`.

mod error;
mod local_disk;
mod memory;
mod traits;

pub use error::BackingError;
pub use local_disk::LocalDiskBackingStore;
pub use memory::MemoryBackingStore;
pub use traits::BackingStore;

// Re-export bytes for convenience
pub use bytes::Bytes;
