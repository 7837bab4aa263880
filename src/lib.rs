//! Persistent, fixed-capacity LRU storage in a single memory-mapped file.
//!
//! Keys are reduced to seeded 64-bit fingerprints; values have a fixed
//! size chosen at creation. The file survives restarts and can be merged
//! with another store of the same shape.

pub mod error;
pub mod file_util;
pub mod key;
pub mod lru;
pub mod mmap;
mod shared_store;
mod storage;

pub use error::{Result, StorageError};
pub use lru::layout::{StorageShape, HEADER_SIZE, MAX_CAPACITY, MAX_VALUE_SIZE, SLOT_HEADER_SIZE};
pub use lru::{LruStorage, OpenOutcome, SlotRecord};
pub use mmap::{MappedFile, Mode};
pub use shared_store::{SharedLruStorage, SharedStorageInfo};
pub use storage::Storage;
