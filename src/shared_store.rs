use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::lru::{LruStorage, OpenOutcome, StorageShape};

/// Snapshot of a shared store's occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedStorageInfo {
    pub used_size: usize,
    pub capacity: usize,
    pub value_size: usize,
}

/// An [`LruStorage`] shared between threads.
///
/// Every call takes the lock for its whole duration, so each operation is
/// atomic with respect to the others. Lookups return owned copies because
/// views into the mapping cannot outlive the guard. Clones share the same
/// store.
#[derive(Clone)]
pub struct SharedLruStorage {
    inner: Arc<Mutex<LruStorage>>,
}

impl SharedLruStorage {
    pub fn new(storage: LruStorage) -> Self {
        SharedLruStorage {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    /// See [`LruStorage::open_or_create`].
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        shape: &StorageShape,
    ) -> Result<(Self, OpenOutcome)> {
        let (storage, outcome) = LruStorage::open_or_create(path, shape)?;
        Ok((Self::new(storage), outcome))
    }

    pub fn lookup<K: AsRef<[u8]>>(&self, key: K) -> Option<Vec<u8>> {
        let storage = self.inner.lock();
        storage.lookup(key).map(<[u8]>::to_vec)
    }

    pub fn lookup_with_timestamp<K: AsRef<[u8]>>(&self, key: K) -> Option<(Vec<u8>, u32)> {
        let storage = self.inner.lock();
        storage
            .lookup_with_timestamp(key)
            .map(|(value, ts)| (value.to_vec(), ts))
    }

    pub fn insert<K: AsRef<[u8]>>(&self, key: K, value: &[u8]) -> Result<()> {
        self.inner.lock().insert(key, value)
    }

    pub fn try_insert<K: AsRef<[u8]>>(&self, key: K, value: &[u8]) -> Result<bool> {
        self.inner.lock().try_insert(key, value)
    }

    pub fn touch<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.inner.lock().touch(key)
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.inner.lock().delete(key)
    }

    pub fn delete_elements_before(&self, timestamp: u32) -> Result<usize> {
        self.inner.lock().delete_elements_before(timestamp)
    }

    pub fn get_all_values(&self) -> Vec<Vec<u8>> {
        self.inner.lock().get_all_values()
    }

    pub fn merge_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.inner.lock().merge_file(path)
    }

    pub fn clear(&self) -> Result<()> {
        self.inner.lock().clear()
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().sync()
    }

    pub fn used_size(&self) -> usize {
        self.inner.lock().used_size()
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().path().to_path_buf()
    }

    pub fn info(&self) -> SharedStorageInfo {
        let storage = self.inner.lock();
        SharedStorageInfo {
            used_size: storage.used_size(),
            capacity: storage.capacity(),
            value_size: storage.value_size(),
        }
    }

    /// Run `f` with exclusive access to the underlying store.
    pub fn with<R>(&self, f: impl FnOnce(&mut LruStorage) -> R) -> R {
        let mut storage = self.inner.lock();
        f(&mut storage)
    }
}
