//! Storage layer for rtmodel.
//!
//! `KeyValueStore` is the capability contract the object layer runs on;
//! `InMemoryStore` is a thread-safe reference backend used for embedded use
//! and tests.

mod memory;
mod traits;

pub use memory::InMemoryStore;
pub use traits::{KeyValueStore, StorageError};
