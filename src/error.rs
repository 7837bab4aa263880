use std::io;

use thiserror::Error;

/// Errors returned by [`crate::LruStorage`] and [`crate::MappedFile`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O or mmap error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Requested or stored `value_size` is outside 1..=1024 or not 4-byte aligned.
    #[error("invalid value size: {0}")]
    InvalidValueSize(usize),

    /// Requested or stored capacity is outside 1..=1,000,000.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(usize),

    /// File is too short for a header or its size disagrees with the header.
    #[error("storage file is broken: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A value passed to insert/write does not have exactly `value_size` bytes.
    #[error("value must be {expected} bytes, got {actual}")]
    ValueSizeMismatch { expected: usize, actual: usize },

    /// Raw slot access outside `0..capacity`.
    #[error("slot {index} out of range (capacity {capacity})")]
    SlotOutOfRange { index: usize, capacity: usize },

    /// Merge source has a different value size or seed.
    #[error("cannot merge stores of different shape")]
    ShapeMismatch,

    /// Mutation attempted through a read-only mapping.
    #[error("storage is mapped read-only")]
    ReadOnly,

    /// In-memory index and recency list disagree.
    #[error("internal error: {0}")]
    Corrupted(&'static str),
}

pub type Result<T> = std::result::Result<T, StorageError>;
