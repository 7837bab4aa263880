//! Fingerprint → slot index lookup table.
//!
//! Fingerprints are unique keys here: inserting an existing fingerprint
//! replaces its slot.

use ahash::RandomState;
use hashbrown::HashMap;

pub struct SlotIndex {
    map: HashMap<u64, u32, RandomState>,
}

impl SlotIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        SlotIndex {
            map: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }

    #[inline]
    pub fn get(&self, fingerprint: u64) -> Option<u32> {
        self.map.get(&fingerprint).copied()
    }

    #[inline]
    pub fn insert(&mut self, fingerprint: u64, slot: u32) -> Option<u32> {
        self.map.insert(fingerprint, slot)
    }

    #[inline]
    pub fn remove(&mut self, fingerprint: u64) -> Option<u32> {
        self.map.remove(&fingerprint)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
