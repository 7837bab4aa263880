//! Persistent LRU storage backed by a memory-mapped file.
//!
//! The file is a 12-byte header followed by `capacity` fixed-size slots
//! (see [`layout`]). Opening scans every slot once and builds two
//! in-memory structures over slot indices: a fingerprint index and a
//! recency list. Steady-state operations touch only those structures and
//! the mapped bytes of the winning slot; nothing is allocated per insert.
//!
//! The store has no internal locking. Wrap it in
//! [`crate::SharedLruStorage`] to share it between threads.

pub mod index;
pub mod layout;
pub mod ordering;

use std::cmp::Reverse;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use hashbrown::HashSet;
use tracing::{debug, error, warn};

use crate::error::{Result, StorageError};
use crate::key::fingerprint;
use crate::mmap::{MappedFile, Mode};
use index::SlotIndex;
use layout::HEADER_SIZE;
pub use layout::StorageShape;
use ordering::RecencyList;

/// How [`LruStorage::open_or_create`] obtained its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// An existing file of the requested shape was opened.
    Opened,
    /// No file existed; a new one was created.
    Created,
    /// The file was unreadable, corrupted or of another shape and was
    /// replaced with an empty one. Previous contents are lost.
    Recreated,
}

/// One raw slot as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRecord<'a> {
    pub fingerprint: u64,
    pub last_access: u32,
    pub value: &'a [u8],
}

pub struct LruStorage {
    file: MappedFile,
    shape: StorageShape,
    index: SlotIndex,
    list: RecencyList,
    /// First never-written slot in file order; `None` once every slot is used.
    free_cursor: Option<u32>,
}

impl LruStorage {
    /// Write a fresh storage file: header followed by `capacity` zeroed slots.
    pub fn create_storage_file<P: AsRef<Path>>(path: P, shape: &StorageShape) -> Result<()> {
        let path = path.as_ref();
        shape.validate().map_err(|e| {
            error!(path = %path.display(), error = %e, "refusing to create storage file");
            e
        })?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&shape.encode_header())?;
        // Extending the file zero-fills every slot.
        file.set_len(shape.file_size() as u64)?;
        file.flush()?;

        debug!(
            path = %path.display(),
            value_size = shape.value_size,
            capacity = shape.capacity,
            "created storage file"
        );
        Ok(())
    }

    /// Open an existing storage file for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_mode(path.as_ref(), Mode::ReadWrite)
    }

    /// Open an existing storage file without write access. Mutating calls fail
    /// with [`StorageError::ReadOnly`].
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_mode(path.as_ref(), Mode::ReadOnly)
    }

    fn open_with_mode(path: &Path, mode: Mode) -> Result<Self> {
        let file = MappedFile::open(path, mode).map_err(|e| {
            error!(path = %path.display(), ?mode, error = %e, "cannot map storage file");
            e
        })?;
        let shape = StorageShape::decode_header(file.as_slice()).map_err(|e| {
            error!(path = %path.display(), error = %e, "storage file is broken");
            e
        })?;

        let mut storage = LruStorage {
            file,
            shape,
            index: SlotIndex::with_capacity(shape.capacity),
            list: RecencyList::new(shape.capacity),
            free_cursor: None,
        };
        storage.reload();
        Ok(storage)
    }

    /// Open `path`, creating or recreating it when it is missing, broken or
    /// of a different value size or capacity.
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        shape: &StorageShape,
    ) -> Result<(Self, OpenOutcome)> {
        let path = path.as_ref();
        shape.validate()?;

        if !path.exists() {
            debug!(path = %path.display(), "storage file does not exist, creating");
            Self::create_storage_file(path, shape)?;
            return Ok((Self::open(path)?, OpenOutcome::Created));
        }

        match Self::open(path) {
            Ok(storage)
                if storage.shape.value_size == shape.value_size
                    && storage.shape.capacity == shape.capacity =>
            {
                return Ok((storage, OpenOutcome::Opened));
            }
            Ok(storage) => {
                warn!(
                    path = %path.display(),
                    old_value_size = storage.shape.value_size,
                    old_capacity = storage.shape.capacity,
                    new_value_size = shape.value_size,
                    new_capacity = shape.capacity,
                    "storage format changed, recreating"
                );
                // Unmap before truncating the file underneath.
                drop(storage);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "storage file unusable, recreating");
            }
        }

        Self::create_storage_file(path, shape)?;
        let storage = Self::open(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "open failed after recreating storage file");
            e
        })?;
        Ok((storage, OpenOutcome::Recreated))
    }

    /// Flush and unmap.
    pub fn close(self) -> Result<()> {
        self.file.close()
    }

    /// Write dirty pages back to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.flush()
    }

    /// Rebuild the index, recency list and free cursor from the mapped slots.
    ///
    /// Slots are ordered by last access, newest first; equal timestamps keep
    /// file order. Slots that repeat an already indexed fingerprint are
    /// dropped (and zeroed when the mapping is writable) so every listed slot
    /// is reachable through the index.
    pub fn reload(&mut self) {
        let capacity = self.shape.capacity as u32;
        let mut order: Vec<u32> = (0..capacity).collect();
        {
            let data = self.file.as_slice();
            let shape = &self.shape;
            order.sort_by_key(|&i| Reverse(slot_timestamp_at(data, shape, i)));
        }

        self.index.clear();
        self.list.clear();
        let mut duplicates = Vec::new();
        for &slot in &order {
            let bytes = self.slot(slot);
            if layout::slot_timestamp(bytes) == 0 {
                // Remaining slots are all unused.
                break;
            }
            let fp = layout::slot_fingerprint(bytes);
            if self.index.get(fp).is_some() {
                duplicates.push(slot);
                continue;
            }
            self.index.insert(fp, slot);
            self.list.push_back(slot);
        }

        if !duplicates.is_empty() {
            warn!(count = duplicates.len(), "dropping slots with duplicated fingerprints");
            if self.file.mode() == Mode::ReadWrite {
                for slot in duplicates {
                    if let Err(e) = self.zero_slot(slot) {
                        error!(slot, error = %e, "cannot clear duplicated slot");
                    }
                }
            }
        }

        self.free_cursor = self.next_unused_from(0);
        debug_assert_eq!(self.index.len(), self.list.len());
    }

    pub fn shape(&self) -> StorageShape {
        self.shape
    }

    pub fn value_size(&self) -> usize {
        self.shape.value_size
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.shape.capacity
    }

    /// Number of live entries.
    pub fn used_size(&self) -> usize {
        self.list.len()
    }

    pub fn seed(&self) -> u32 {
        self.shape.seed
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Value stored for `key`. Does not update recency.
    ///
    /// Entries never expire on their own: a stale entry is returned until
    /// it is removed with [`delete_elements_before`](Self::delete_elements_before)
    /// or [`delete_elements_untouched_for`](Self::delete_elements_untouched_for).
    pub fn lookup<K: AsRef<[u8]>>(&self, key: K) -> Option<&[u8]> {
        self.lookup_with_timestamp(key).map(|(value, _)| value)
    }

    /// Value and last access time (unix seconds) stored for `key`.
    pub fn lookup_with_timestamp<K: AsRef<[u8]>>(&self, key: K) -> Option<(&[u8], u32)> {
        let fp = fingerprint(key.as_ref(), self.shape.seed);
        let slot = self.index.get(fp)?;
        let bytes = self.slot(slot);
        Some((
            layout::slot_value(bytes, self.shape.value_size),
            layout::slot_timestamp(bytes),
        ))
    }

    /// Mark `key` as used now. Returns false if it is not stored.
    pub fn touch<K: AsRef<[u8]>>(&mut self, key: K) -> Result<bool> {
        self.ensure_writable()?;
        let fp = fingerprint(key.as_ref(), self.shape.seed);
        let Some(slot) = self.index.get(fp) else {
            return Ok(false);
        };
        let now = current_unix_seconds();
        layout::set_slot_timestamp(self.slot_mut(slot)?, now);
        self.list.move_to_front(slot);
        Ok(true)
    }

    /// Store `value` under `key`, evicting the least recently used entry when full.
    pub fn insert<K: AsRef<[u8]>>(&mut self, key: K, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        self.ensure_writable()?;
        let fp = fingerprint(key.as_ref(), self.shape.seed);
        let now = current_unix_seconds();

        if let Some(slot) = self.index.get(fp) {
            layout::write_slot(self.slot_mut(slot)?, fp, now, value);
            self.list.move_to_front(slot);
            return Ok(());
        }

        if let Some(slot) = self.free_cursor {
            layout::write_slot(self.slot_mut(slot)?, fp, now, value);
            self.free_cursor = self.next_unused_from(slot + 1);
            self.list.push_front(slot);
            self.index.insert(fp, slot);
            return Ok(());
        }

        let Some(slot) = self.list.back() else {
            error!("insertion failed: no free slot and nothing to evict");
            return Err(StorageError::Corrupted("no free slot and empty recency list"));
        };
        let old_fp = layout::slot_fingerprint(self.slot(slot));
        if self.index.get(old_fp) == Some(slot) {
            self.index.remove(old_fp);
        }
        layout::write_slot(self.slot_mut(slot)?, fp, now, value);
        self.list.move_to_front(slot);
        self.index.insert(fp, slot);
        debug_assert_eq!(self.list.front(), Some(slot));
        Ok(())
    }

    /// Like [`insert`](Self::insert) but only refreshes an entry that already
    /// exists. Returns whether anything was written.
    pub fn try_insert<K: AsRef<[u8]>>(&mut self, key: K, value: &[u8]) -> Result<bool> {
        self.check_value(value)?;
        self.ensure_writable()?;
        let fp = fingerprint(key.as_ref(), self.shape.seed);
        let Some(slot) = self.index.get(fp) else {
            return Ok(false);
        };
        layout::write_slot(self.slot_mut(slot)?, fp, current_unix_seconds(), value);
        self.list.move_to_front(slot);
        Ok(true)
    }

    /// Remove `key`. Returns false if it was not stored.
    ///
    /// Written slots stay packed at the front of the file: the last written
    /// slot is moved into the hole, keeping its place in the recency order.
    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<bool> {
        let fp = fingerprint(key.as_ref(), self.shape.seed);
        let Some(slot) = self.index.get(fp) else {
            return Ok(false);
        };
        self.ensure_writable()?;
        self.remove_slot(fp, slot)?;
        Ok(true)
    }

    /// Delete entries, oldest first, whose last access is before `timestamp`.
    pub fn delete_elements_before(&mut self, timestamp: u32) -> Result<usize> {
        if self.list.is_empty() {
            return Ok(0);
        }
        self.ensure_writable()?;
        let mut deleted = 0;
        while let Some(slot) = self.list.back() {
            let bytes = self.slot(slot);
            if layout::slot_timestamp(bytes) >= timestamp {
                break;
            }
            let fp = layout::slot_fingerprint(bytes);
            self.remove_slot(fp, slot)?;
            deleted += 1;
        }
        if deleted > 0 {
            debug!(deleted, timestamp, "deleted stale entries");
        }
        Ok(deleted)
    }

    /// Delete entries not touched within `age` of now.
    pub fn delete_elements_untouched_for(&mut self, age: Duration) -> Result<usize> {
        let age = age.as_secs().min(u32::MAX as u64) as u32;
        self.delete_elements_before(current_unix_seconds().saturating_sub(age))
    }

    /// Snapshot of every live value, most recently used first.
    pub fn get_all_values(&self) -> Vec<Vec<u8>> {
        self.list
            .iter()
            .map(|slot| layout::slot_value(self.slot(slot), self.shape.value_size).to_vec())
            .collect()
    }

    /// Zero every slot (the header is kept) and forget all entries.
    pub fn clear(&mut self) -> Result<()> {
        if self.list.is_empty() {
            return Ok(());
        }
        self.file.as_mut_slice()?[HEADER_SIZE..].fill(0);
        self.reload();
        Ok(())
    }

    /// Merge the live entries of `other` into this store.
    ///
    /// Records from both stores are ordered by last access, newest first,
    /// and only the newest record per fingerprint survives. The result is
    /// written from slot 0, truncated to this store's capacity.
    pub fn merge(&mut self, other: &LruStorage) -> Result<()> {
        if other.shape.value_size != self.shape.value_size || other.shape.seed != self.shape.seed {
            warn!(
                path = %other.path().display(),
                "cannot merge storage with a different value size or seed"
            );
            return Err(StorageError::ShapeMismatch);
        }
        self.ensure_writable()?;

        let item_size = self.shape.item_size();
        let region_len = self.shape.capacity * item_size;
        let mut merged = Vec::with_capacity(region_len);
        {
            let mut records: Vec<&[u8]> = self.live_slots().chain(other.live_slots()).collect();
            records.sort_by_key(|slot| Reverse(layout::slot_timestamp(slot)));

            let mut seen = HashSet::with_capacity(records.len());
            for slot in records {
                if merged.len() >= region_len {
                    break;
                }
                if seen.insert(layout::slot_fingerprint(slot)) {
                    merged.extend_from_slice(slot);
                }
            }
        }

        // Not atomic: a crash here leaves a partially merged file.
        let region = &mut self.file.as_mut_slice()?[HEADER_SIZE..];
        region[..merged.len()].copy_from_slice(&merged);
        region[merged.len()..].fill(0);

        self.reload();
        debug!(
            path = %other.path().display(),
            used = self.used_size(),
            "merged storage"
        );
        Ok(())
    }

    /// Merge the storage file at `path` (opened read-only) into this store.
    pub fn merge_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let other = Self::open_read_only(path)?;
        self.merge(&other)
    }

    /// Raw read of slot `index`, bypassing the index and recency list.
    pub fn read(&self, index: usize) -> Result<SlotRecord<'_>> {
        self.check_slot_index(index)?;
        let bytes = self.slot(index as u32);
        Ok(SlotRecord {
            fingerprint: layout::slot_fingerprint(bytes),
            last_access: layout::slot_timestamp(bytes),
            value: layout::slot_value(bytes, self.shape.value_size),
        })
    }

    /// Raw read of slot `index` without a range check.
    ///
    /// # Safety
    /// `index` must be less than [`capacity`](Self::capacity).
    pub unsafe fn read_unchecked(&self, index: usize) -> SlotRecord<'_> {
        debug_assert!(index < self.shape.capacity);
        let data = self.file.as_slice();
        let offset = self.shape.slot_offset(index);
        let bytes = data.get_unchecked(offset..offset + self.shape.item_size());
        SlotRecord {
            fingerprint: layout::slot_fingerprint(bytes),
            last_access: layout::slot_timestamp(bytes),
            value: layout::slot_value(bytes, self.shape.value_size),
        }
    }

    /// Raw write of slot `index`, bypassing the index and recency list.
    ///
    /// Intended for bulk population; call [`reload`](Self::reload) afterwards
    /// to make the written entries visible to lookups.
    pub fn write(&mut self, index: usize, fp: u64, value: &[u8], last_access: u32) -> Result<()> {
        self.check_slot_index(index)?;
        self.check_value(value)?;
        layout::write_slot(self.slot_mut(index as u32)?, fp, last_access, value);
        Ok(())
    }

    /// Raw write of slot `index` without range or length checks.
    ///
    /// # Safety
    /// `index` must be less than [`capacity`](Self::capacity) and `value`
    /// must be exactly [`value_size`](Self::value_size) bytes.
    pub unsafe fn write_unchecked(
        &mut self,
        index: usize,
        fp: u64,
        value: &[u8],
        last_access: u32,
    ) -> Result<()> {
        debug_assert!(index < self.shape.capacity);
        debug_assert_eq!(value.len(), self.shape.value_size);
        let offset = self.shape.slot_offset(index);
        let base = self.file.as_mut_slice()?.as_mut_ptr().add(offset);
        std::ptr::copy_nonoverlapping(fp.to_le_bytes().as_ptr(), base, 8);
        std::ptr::copy_nonoverlapping(last_access.to_le_bytes().as_ptr(), base.add(8), 4);
        std::ptr::copy_nonoverlapping(
            value.as_ptr(),
            base.add(layout::SLOT_HEADER_SIZE),
            value.len(),
        );
        Ok(())
    }

    // --- internals ---

    #[inline]
    fn slot(&self, index: u32) -> &[u8] {
        let offset = self.shape.slot_offset(index as usize);
        &self.file.as_slice()[offset..offset + self.shape.item_size()]
    }

    #[inline]
    fn slot_mut(&mut self, index: u32) -> Result<&mut [u8]> {
        let offset = self.shape.slot_offset(index as usize);
        let item_size = self.shape.item_size();
        Ok(&mut self.file.as_mut_slice()?[offset..offset + item_size])
    }

    fn zero_slot(&mut self, index: u32) -> Result<()> {
        self.slot_mut(index)?.fill(0);
        Ok(())
    }

    /// Every written slot in file order.
    fn live_slots(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.file.as_slice()[HEADER_SIZE..]
            .chunks_exact(self.shape.item_size())
            .filter(|slot| layout::slot_timestamp(slot) != 0)
    }

    /// First unused slot at or after `start`.
    fn next_unused_from(&self, start: u32) -> Option<u32> {
        let data = self.file.as_slice();
        (start..self.shape.capacity as u32).find(|&i| slot_timestamp_at(data, &self.shape, i) == 0)
    }

    /// Unlink `slot` (holding `fp`) and compact the written region.
    fn remove_slot(&mut self, fp: u64, slot: u32) -> Result<()> {
        let end = self.free_cursor.unwrap_or(self.shape.capacity as u32);
        if self.index.get(fp) == Some(slot) {
            self.index.remove(fp);
        }
        self.list.remove(slot);

        let last = end.wrapping_sub(1);
        if slot < end && last != slot && self.list.contains(last) {
            let item_size = self.shape.item_size();
            let from = self.shape.slot_offset(last as usize);
            let to = self.shape.slot_offset(slot as usize);
            self.file
                .as_mut_slice()?
                .copy_within(from..from + item_size, to);
            self.zero_slot(last)?;

            let moved_fp = layout::slot_fingerprint(self.slot(slot));
            self.list.replace(last, slot);
            if self.index.get(moved_fp) == Some(last) {
                self.index.insert(moved_fp, slot);
            }
            self.free_cursor = Some(last);
        } else {
            self.zero_slot(slot)?;
            self.free_cursor = Some(end.min(slot));
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.shape.value_size {
            error!(
                expected = self.shape.value_size,
                actual = value.len(),
                "value size mismatch"
            );
            return Err(StorageError::ValueSizeMismatch {
                expected: self.shape.value_size,
                actual: value.len(),
            });
        }
        Ok(())
    }

    fn check_slot_index(&self, index: usize) -> Result<()> {
        if index >= self.shape.capacity {
            return Err(StorageError::SlotOutOfRange {
                index,
                capacity: self.shape.capacity,
            });
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.file.mode() {
            Mode::ReadWrite => Ok(()),
            Mode::ReadOnly => Err(StorageError::ReadOnly),
        }
    }
}

#[inline]
fn slot_timestamp_at(data: &[u8], shape: &StorageShape, index: u32) -> u32 {
    layout::read_u32(data, shape.slot_offset(index as usize) + 8)
}

/// Wall-clock time in whole seconds since the unix epoch, never 0.
fn current_unix_seconds() -> u32 {
    #[cfg(unix)]
    let secs = {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
        }
        ts.tv_sec.max(0) as u64
    };

    #[cfg(not(unix))]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // 0 marks an unused slot.
    secs.clamp(1, u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SEED: u32 = 0x76fef;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lru.db");
        (dir, path)
    }

    fn new_storage(path: &Path, value_size: usize, capacity: usize) -> LruStorage {
        let shape = StorageShape::new(value_size, capacity, SEED);
        LruStorage::create_storage_file(path, &shape).unwrap();
        LruStorage::open(path).unwrap()
    }

    /// Values in file order for the first `used_size()` slots.
    fn values_in_storage_order(storage: &LruStorage) -> Vec<Vec<u8>> {
        (0..storage.used_size())
            .map(|i| storage.read(i).unwrap().value.to_vec())
            .collect()
    }

    #[test]
    fn create_writes_header_and_zeroed_slots() {
        let (_dir, path) = scratch();
        let shape = StorageShape::new(8, 5, SEED);
        LruStorage::create_storage_file(&path, &shape).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 12 + 5 * 20);
        assert_eq!(&bytes[..12], &shape.encode_header());
        assert!(bytes[12..].iter().all(|&b| b == 0));

        let storage = LruStorage::open(&path).unwrap();
        assert_eq!(storage.shape(), shape);
        assert_eq!(storage.used_size(), 0);
        assert_eq!(storage.path(), path.as_path());
    }

    #[test]
    fn create_rejects_bad_shape() {
        let (_dir, path) = scratch();
        let result = LruStorage::create_storage_file(&path, &StorageShape::new(3, 10, 0));
        assert!(matches!(result, Err(StorageError::InvalidValueSize(3))));
        assert!(!path.exists());
    }

    #[test]
    fn open_rejects_corrupted_file() {
        let (_dir, path) = scratch();
        fs::write(&path, b"test").unwrap();
        assert!(LruStorage::open(&path).is_err());
    }

    #[test]
    fn insert_lookup_and_eviction_scenario() {
        let (_dir, path) = scratch();
        let shape = StorageShape::new(4, 3, 0);
        let (mut storage, outcome) = LruStorage::open_or_create(&path, &shape).unwrap();
        assert_eq!(outcome, OpenOutcome::Created);

        storage.insert("a", b"aaaa").unwrap();
        storage.insert("b", b"bbbb").unwrap();
        storage.insert("c", b"cccc").unwrap();
        assert_eq!(storage.used_size(), 3);

        assert!(storage.touch("a").unwrap());
        storage.insert("d", b"dddd").unwrap();

        assert_eq!(storage.used_size(), 3);
        assert_eq!(storage.lookup("b"), None);
        assert_eq!(storage.lookup("a"), Some(&b"aaaa"[..]));
        assert_eq!(storage.lookup("c"), Some(&b"cccc"[..]));
        assert_eq!(storage.lookup("d"), Some(&b"dddd"[..]));
    }

    #[test]
    fn insert_rejects_wrong_value_size() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        assert!(matches!(
            storage.insert("k", b"abc"),
            Err(StorageError::ValueSizeMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert_eq!(storage.used_size(), 0);
    }

    #[test]
    fn overwrite_keeps_one_slot() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        storage.insert("k", b"1111").unwrap();
        storage.insert("k", b"2222").unwrap();
        assert_eq!(storage.used_size(), 1);
        assert_eq!(storage.lookup("k"), Some(&b"2222"[..]));
    }

    #[test]
    fn touch_missing_key() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        assert!(!storage.touch("nope").unwrap());
        assert_eq!(storage.used_size(), 0);
    }

    #[test]
    fn try_insert_only_updates() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 2);
        assert!(!storage.try_insert("x", b"xxxx").unwrap());
        assert_eq!(storage.lookup("x"), None);

        storage.insert("x", b"xxxx").unwrap();
        storage.insert("y", b"yyyy").unwrap();
        assert!(storage.try_insert("x", b"XXXX").unwrap());
        assert_eq!(storage.lookup("x"), Some(&b"XXXX"[..]));

        // "x" was freshened, so "y" is evicted next.
        storage.insert("z", b"zzzz").unwrap();
        assert_eq!(storage.lookup("y"), None);
        assert!(storage.lookup("x").is_some());
    }

    #[test]
    fn try_insert_never_claims_or_evicts_when_full() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        storage.insert("a", b"aaaa").unwrap();
        storage.insert("b", b"bbbb").unwrap();
        storage.insert("c", b"cccc").unwrap();
        let before = storage.get_all_values();

        assert!(!storage.try_insert("absent", b"zzzz").unwrap());
        assert_eq!(storage.used_size(), 3);
        assert_eq!(storage.lookup("absent"), None);
        assert_eq!(storage.lookup("a"), Some(&b"aaaa"[..]));
        assert_eq!(storage.lookup("b"), Some(&b"bbbb"[..]));
        assert_eq!(storage.lookup("c"), Some(&b"cccc"[..]));
        assert_eq!(storage.get_all_values(), before);

        // The tail is still "a".
        storage.insert("d", b"dddd").unwrap();
        assert_eq!(storage.lookup("a"), None);
        assert!(storage.lookup("b").is_some());
        assert!(storage.lookup("c").is_some());
    }

    #[test]
    fn get_all_values_most_recent_first() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 4);
        storage.insert("1", b"1111").unwrap();
        storage.insert("2", b"2222").unwrap();
        storage.insert("3", b"3333").unwrap();
        storage.touch("1").unwrap();
        assert_eq!(
            storage.get_all_values(),
            vec![b"1111".to_vec(), b"3333".to_vec(), b"2222".to_vec()]
        );
    }

    #[test]
    fn clear_zeroes_slots_and_keeps_header() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        storage.insert("a", b"aaaa").unwrap();
        storage.insert("b", b"bbbb").unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.used_size(), 0);
        assert_eq!(storage.lookup("a"), None);
        storage.sync().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..12], &storage.shape().encode_header());
        assert!(bytes[12..].iter().all(|&b| b == 0));

        storage.insert("c", b"cccc").unwrap();
        assert_eq!(storage.read(0).unwrap().value, b"cccc");
    }

    #[test]
    fn open_orders_by_timestamp_and_fills_in_file_order() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 5);
        storage.write(0, 10, b"old_", 100).unwrap();
        storage.write(2, 20, b"new_", 300).unwrap();
        storage.write(3, 30, b"mid_", 200).unwrap();
        storage.reload();

        assert_eq!(storage.used_size(), 3);
        assert_eq!(
            storage.get_all_values(),
            vec![b"new_".to_vec(), b"mid_".to_vec(), b"old_".to_vec()]
        );

        // Slot 1 is the first unused slot in file order.
        storage.insert("k1", b"k1k1").unwrap();
        assert_eq!(storage.read(1).unwrap().value, b"k1k1");
        storage.insert("k2", b"k2k2").unwrap();
        assert_eq!(storage.read(4).unwrap().value, b"k2k2");

        // Full: the oldest (slot 0) goes first.
        storage.insert("k3", b"k3k3").unwrap();
        assert_eq!(storage.read(0).unwrap().value, b"k3k3");
    }

    #[test]
    fn reload_drops_duplicate_fingerprints() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        storage.write(0, 7, b"aaaa", 100).unwrap();
        storage.write(1, 7, b"bbbb", 200).unwrap();
        storage.reload();

        assert_eq!(storage.used_size(), 1);
        assert_eq!(storage.get_all_values(), vec![b"bbbb".to_vec()]);
        assert_eq!(storage.read(0).unwrap().last_access, 0);
    }

    #[test]
    fn raw_read_write() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 10);
        for i in 0..10 {
            let value = (i as u32 * 7).to_le_bytes();
            storage.write(i, i as u64 + 1000, &value, i as u32 + 1).unwrap();
        }
        for i in 0..10 {
            let record = storage.read(i).unwrap();
            assert_eq!(record.fingerprint, i as u64 + 1000);
            assert_eq!(record.value, &(i as u32 * 7).to_le_bytes());
            assert_eq!(record.last_access, i as u32 + 1);
        }

        assert!(matches!(
            storage.read(10),
            Err(StorageError::SlotOutOfRange {
                index: 10,
                capacity: 10
            })
        ));
        assert!(storage.write(10, 1, b"aaaa", 1).is_err());
        assert!(storage.write(0, 1, b"aaaaaaaa", 1).is_err());
    }

    #[test]
    fn unchecked_raw_access() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 8, 4);
        unsafe {
            storage.write_unchecked(3, 0xabcd, b"12345678", 42).unwrap();
            let record = storage.read_unchecked(3);
            assert_eq!(record.fingerprint, 0xabcd);
            assert_eq!(record.last_access, 42);
            assert_eq!(record.value, b"12345678");
        }
        assert_eq!(storage.read(3).unwrap().fingerprint, 0xabcd);
    }

    #[test]
    fn delete_keeps_written_slots_packed() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 4);
        assert!(!storage.delete("nothing to delete").unwrap());

        let entries = [
            ("0000", b"aaaa"),
            ("1111", b"bbbb"),
            ("2222", b"cccc"),
            ("3333", b"dddd"),
        ];
        for (key, value) in entries {
            storage.insert(key, value).unwrap();
        }

        // Last slot of the mapped region.
        assert!(storage.delete("3333").unwrap());
        assert_eq!(
            values_in_storage_order(&storage),
            vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]
        );
        assert_eq!(storage.lookup("3333"), None);

        // Middle: the last written slot moves into the hole.
        assert!(storage.delete("1111").unwrap());
        assert_eq!(storage.used_size(), 2);
        assert_eq!(storage.lookup("0000"), Some(&b"aaaa"[..]));
        assert_eq!(storage.lookup("2222"), Some(&b"cccc"[..]));
        assert_eq!(
            values_in_storage_order(&storage),
            vec![b"aaaa".to_vec(), b"cccc".to_vec()]
        );

        storage.insert("4444", b"eeee").unwrap();
        assert_eq!(
            values_in_storage_order(&storage),
            vec![b"aaaa".to_vec(), b"cccc".to_vec(), b"eeee".to_vec()]
        );

        // Beginning.
        assert!(storage.delete("0000").unwrap());
        assert_eq!(
            values_in_storage_order(&storage),
            vec![b"eeee".to_vec(), b"cccc".to_vec()]
        );
        assert_eq!(storage.lookup("4444"), Some(&b"eeee"[..]));

        assert!(storage.delete("4444").unwrap());
        assert_eq!(values_in_storage_order(&storage), vec![b"cccc".to_vec()]);

        assert!(storage.delete("2222").unwrap());
        assert_eq!(storage.used_size(), 0);
        assert_eq!(storage.lookup("2222"), None);
    }

    #[test]
    fn delete_preserves_recency_of_moved_entry() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 3);
        storage.insert("a", b"aaaa").unwrap();
        storage.insert("b", b"bbbb").unwrap();
        storage.insert("c", b"cccc").unwrap();
        storage.touch("b").unwrap();

        // "c" moves from slot 2 into slot 0 but stays in the middle of the order.
        assert!(storage.delete("a").unwrap());
        assert_eq!(
            storage.get_all_values(),
            vec![b"bbbb".to_vec(), b"cccc".to_vec()]
        );

        storage.insert("d", b"dddd").unwrap();
        storage.insert("e", b"eeee").unwrap();
        assert_eq!(storage.lookup("c"), None);
        assert!(storage.lookup("b").is_some());
    }

    #[test]
    fn delete_elements_before_timestamp() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 4);
        storage.write(0, 1, b"aaaa", 10).unwrap();
        storage.write(1, 2, b"bbbb", 20).unwrap();
        storage.write(2, 3, b"cccc", 30).unwrap();
        storage.write(3, 4, b"dddd", 40).unwrap();
        storage.reload();

        assert_eq!(storage.delete_elements_before(5).unwrap(), 0);
        assert_eq!(storage.delete_elements_before(25).unwrap(), 2);
        assert_eq!(storage.used_size(), 2);
        assert_eq!(
            storage.get_all_values(),
            vec![b"dddd".to_vec(), b"cccc".to_vec()]
        );
        assert_eq!(storage.delete_elements_before(u32::MAX).unwrap(), 2);
        assert_eq!(storage.used_size(), 0);
    }

    #[test]
    fn delete_untouched_entries() {
        let (_dir, path) = scratch();
        let mut storage = new_storage(&path, 4, 4);
        storage.write(0, 1, b"aaaa", 1).unwrap();
        storage.reload();
        storage.insert("fresh", b"ffff").unwrap();

        let removed = storage
            .delete_elements_untouched_for(Duration::from_secs(62 * 24 * 60 * 60))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.get_all_values(), vec![b"ffff".to_vec()]);
    }

    #[test]
    fn merge_keeps_newest_record() {
        let (_dir, path) = scratch();
        let other_path = path.with_extension("pending");
        let mut storage = new_storage(&path, 4, 4);
        let mut other = new_storage(&other_path, 4, 4);

        let shared = fingerprint(b"shared", SEED);
        storage.write(0, shared, b"old_", 100).unwrap();
        storage.write(1, fingerprint(b"mine", SEED), b"mine", 50).unwrap();
        other.write(0, shared, b"new_", 200).unwrap();
        other.write(1, fingerprint(b"theirs", SEED), b"thrs", 150).unwrap();
        storage.reload();
        other.reload();

        storage.merge(&other).unwrap();
        assert_eq!(storage.used_size(), 3);
        assert_eq!(storage.lookup("shared"), Some(&b"new_"[..]));
        assert_eq!(storage.lookup("mine"), Some(&b"mine"[..]));
        assert_eq!(storage.lookup("theirs"), Some(&b"thrs"[..]));
        assert_eq!(
            values_in_storage_order(&storage),
            vec![b"new_".to_vec(), b"thrs".to_vec(), b"mine".to_vec()]
        );
    }

    #[test]
    fn merge_truncates_to_capacity() {
        let (_dir, path) = scratch();
        let other_path = path.with_extension("pending");
        let mut storage = new_storage(&path, 4, 2);
        let mut other = new_storage(&other_path, 4, 4);
        for i in 0..4u32 {
            other.write(i as usize, i as u64 + 1, &i.to_le_bytes(), 10 + i).unwrap();
        }
        storage.merge_file(&other_path).unwrap();

        assert_eq!(storage.used_size(), 2);
        assert_eq!(
            storage.get_all_values(),
            vec![3u32.to_le_bytes().to_vec(), 2u32.to_le_bytes().to_vec()]
        );
    }

    #[test]
    fn merge_rejects_other_shape() {
        let (_dir, path) = scratch();
        let other_path = path.with_extension("pending");
        let mut storage = new_storage(&path, 4, 2);
        storage.insert("a", b"aaaa").unwrap();

        LruStorage::create_storage_file(&other_path, &StorageShape::new(8, 2, SEED)).unwrap();
        assert!(matches!(
            storage.merge_file(&other_path),
            Err(StorageError::ShapeMismatch)
        ));

        LruStorage::create_storage_file(&other_path, &StorageShape::new(4, 2, SEED + 1)).unwrap();
        assert!(matches!(
            storage.merge_file(&other_path),
            Err(StorageError::ShapeMismatch)
        ));
        assert_eq!(storage.lookup("a"), Some(&b"aaaa"[..]));
    }

    #[test]
    fn read_only_storage_rejects_mutation() {
        let (_dir, path) = scratch();
        {
            let mut storage = new_storage(&path, 4, 2);
            storage.insert("a", b"aaaa").unwrap();
            storage.close().unwrap();
        }
        let mut storage = LruStorage::open_read_only(&path).unwrap();
        assert_eq!(storage.lookup("a"), Some(&b"aaaa"[..]));
        assert!(matches!(storage.insert("b", b"bbbb"), Err(StorageError::ReadOnly)));
        assert!(matches!(storage.touch("a"), Err(StorageError::ReadOnly)));
        assert!(matches!(storage.clear(), Err(StorageError::ReadOnly)));
        assert_eq!(storage.used_size(), 1);
    }

    #[test]
    fn open_or_create_outcomes() {
        let (_dir, path) = scratch();
        let shape = StorageShape::new(4, 10, SEED);

        fs::write(&path, b"test").unwrap();
        let (mut storage, outcome) = LruStorage::open_or_create(&path, &shape).unwrap();
        assert_eq!(outcome, OpenOutcome::Recreated);
        storage.insert("test", &823u32.to_le_bytes()).unwrap();
        assert_eq!(storage.lookup("test"), Some(&823u32.to_le_bytes()[..]));
        drop(storage);

        let (storage, outcome) = LruStorage::open_or_create(&path, &shape).unwrap();
        assert_eq!(outcome, OpenOutcome::Opened);
        assert_eq!(storage.used_size(), 1);
        drop(storage);

        let bigger = StorageShape::new(8, 10, SEED);
        let (storage, outcome) = LruStorage::open_or_create(&path, &bigger).unwrap();
        assert_eq!(outcome, OpenOutcome::Recreated);
        assert_eq!(storage.shape(), bigger);
        assert_eq!(storage.used_size(), 0);
    }

    #[cfg(target_os = "linux")]
    fn locked_kib() -> u64 {
        let status = fs::read_to_string("/proc/self/status").unwrap();
        status
            .lines()
            .find_map(|line| line.strip_prefix("VmLck:"))
            .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
            .unwrap_or(0)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn open_does_not_lock_pages() {
        let (_dir, path) = scratch();
        let before = locked_kib();
        let (storage, _) =
            LruStorage::open_or_create(&path, &StorageShape::new(1024, 4_000, SEED)).unwrap();
        let reader = LruStorage::open_read_only(&path).unwrap();
        let after = locked_kib();

        // The file is about 4 MiB; other tests lock at most a page at a time.
        assert!(after.saturating_sub(before) < 1024, "{before} kB -> {after} kB");
        drop(reader);
        drop(storage);
    }

    #[test]
    fn clock_is_never_zero() {
        assert!(current_unix_seconds() > 0);
    }
}
