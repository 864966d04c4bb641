//! Storage backends: in-memory cache and tables, and the fjall-backed disk store.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::{MemoryCache, MemoryStore};
