//! On-disk layout of an LRU storage file.
//!
//! ```text
//! Header (12 bytes): value_size u32 | capacity u32 | seed u32
//! Slot[capacity]   : fingerprint u64 | last_access u32 | value[value_size]
//! ```
//!
//! All integers are little-endian. Slots are not aligned beyond 4 bytes,
//! so every field is read and written through byte copies.

use crate::error::{Result, StorageError};

/// Size of the fixed header at the start of the file.
pub const HEADER_SIZE: usize = 12;

/// Per-slot bytes preceding the value: fingerprint + last_access.
pub const SLOT_HEADER_SIZE: usize = 12;

/// Largest accepted value size in bytes.
pub const MAX_VALUE_SIZE: usize = 1024;

/// Largest accepted number of slots.
pub const MAX_CAPACITY: usize = 1_000_000;

/// The fixed shape of a storage file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageShape {
    pub value_size: usize,
    pub capacity: usize,
    pub seed: u32,
}

impl StorageShape {
    pub fn new(value_size: usize, capacity: usize, seed: u32) -> Self {
        StorageShape {
            value_size,
            capacity,
            seed,
        }
    }

    /// Check the value size and capacity ranges.
    pub fn validate(&self) -> Result<()> {
        if self.value_size == 0 || self.value_size > MAX_VALUE_SIZE || self.value_size % 4 != 0 {
            return Err(StorageError::InvalidValueSize(self.value_size));
        }
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(StorageError::InvalidCapacity(self.capacity));
        }
        Ok(())
    }

    pub fn item_size(&self) -> usize {
        SLOT_HEADER_SIZE + self.value_size
    }

    /// Total file size for this shape.
    pub fn file_size(&self) -> usize {
        HEADER_SIZE + self.capacity * self.item_size()
    }

    /// Byte offset of slot `index` from the start of the file.
    #[inline]
    pub fn slot_offset(&self, index: usize) -> usize {
        HEADER_SIZE + index * self.item_size()
    }

    pub fn encode_header(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&(self.value_size as u32).to_le_bytes());
        out[4..8].copy_from_slice(&(self.capacity as u32).to_le_bytes());
        out[8..12].copy_from_slice(&self.seed.to_le_bytes());
        out
    }

    /// Parse the header and check it against the size of the whole file.
    pub fn decode_header(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::SizeMismatch {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let shape = StorageShape {
            value_size: read_u32(data, 0) as usize,
            capacity: read_u32(data, 4) as usize,
            seed: read_u32(data, 8),
        };
        shape.validate()?;
        if shape.file_size() != data.len() {
            return Err(StorageError::SizeMismatch {
                expected: shape.file_size(),
                actual: data.len(),
            });
        }
        Ok(shape)
    }
}

#[inline]
pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
pub fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

/// Fingerprint of the slot starting at `slot`.
#[inline]
pub fn slot_fingerprint(slot: &[u8]) -> u64 {
    read_u64(slot, 0)
}

/// Last access time of the slot starting at `slot`. 0 = never written.
#[inline]
pub fn slot_timestamp(slot: &[u8]) -> u32 {
    read_u32(slot, 8)
}

#[inline]
pub fn slot_value(slot: &[u8], value_size: usize) -> &[u8] {
    &slot[SLOT_HEADER_SIZE..SLOT_HEADER_SIZE + value_size]
}

#[inline]
pub fn set_slot_timestamp(slot: &mut [u8], timestamp: u32) {
    slot[8..12].copy_from_slice(&timestamp.to_le_bytes());
}

/// Overwrite a whole slot record.
#[inline]
pub fn write_slot(slot: &mut [u8], fingerprint: u64, timestamp: u32, value: &[u8]) {
    slot[0..8].copy_from_slice(&fingerprint.to_le_bytes());
    slot[8..12].copy_from_slice(&timestamp.to_le_bytes());
    slot[SLOT_HEADER_SIZE..SLOT_HEADER_SIZE + value.len()].copy_from_slice(value);
}
