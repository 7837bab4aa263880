use crate::error::Result;
use crate::lru::LruStorage;

/// Key-value storage as seen by history consumers.
///
/// Opening is left to each implementor's constructor.
pub trait Storage {
    fn insert(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn lookup(&self, key: &str) -> Option<&[u8]>;
    /// Returns whether `key` was present.
    fn erase(&mut self, key: &str) -> Result<bool>;
    fn sync(&mut self) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    /// Number of stored entries.
    fn size(&self) -> usize;
}

impl Storage for LruStorage {
    #[inline]
    fn insert(&mut self, key: &str, value: &[u8]) -> Result<()> {
        LruStorage::insert(self, key, value)
    }

    #[inline]
    fn lookup(&self, key: &str) -> Option<&[u8]> {
        LruStorage::lookup(self, key)
    }

    #[inline]
    fn erase(&mut self, key: &str) -> Result<bool> {
        self.delete(key)
    }

    fn sync(&mut self) -> Result<()> {
        LruStorage::sync(self)
    }

    fn clear(&mut self) -> Result<()> {
        LruStorage::clear(self)
    }

    fn size(&self) -> usize {
        self.used_size()
    }
}
