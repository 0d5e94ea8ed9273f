//! Durable Key-Value Storage
//!
//! The core persists all of its restart-surviving state through a string
//! key-value store. The platform store is an external collaborator; this
//! module defines its contract, the keys the core owns, and an in-memory
//! implementation for tests and the demo binary.

pub mod kv;
pub mod keys;

pub use kv::{KeyValueStore, MemoryStore, StorageError, read_or_absent, write_or_log, remove_or_log};
