//! Memory-mapped file access.
//!
//! Opens a file and exposes its whole contents as one contiguous byte
//! slice, either read-only or read-write. Writes through a read-write
//! mapping land in the OS page cache immediately and reach disk on
//! `flush()`, `close()` or OS write-back.

use std::fs;
use std::ops::Index;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::debug;

use crate::error::{Result, StorageError};

/// Access mode of a mapping (`"r"` / `"r+"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
    /// Zero-length files cannot be mapped on every platform.
    Empty,
}

/// A file mapped into the address space for the lifetime of the value.
pub struct MappedFile {
    mapping: Mapping,
    path: PathBuf,
    mode: Mode,
}

impl MappedFile {
    /// Map `path` with the given mode.
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(mode == Mode::ReadWrite)
            .open(path)?;
        let len = file.metadata()?.len();

        let mapping = if len == 0 {
            Mapping::Empty
        } else {
            // Safety: the mapping is owned by this value; concurrent
            // modification by other processes is the caller's contract.
            match mode {
                Mode::ReadOnly => Mapping::ReadOnly(unsafe { Mmap::map(&file)? }),
                Mode::ReadWrite => Mapping::ReadWrite(unsafe { MmapMut::map_mut(&file)? }),
            }
        };

        debug!(path = %path.display(), len, ?mode, "mapped file");
        Ok(MappedFile {
            mapping,
            path: path.to_path_buf(),
            mode,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadOnly(m) => m,
            Mapping::ReadWrite(m) => m,
            Mapping::Empty => &[],
        }
    }

    /// Mutable view of the mapping. Fails for read-only mappings.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadWrite(m) => Ok(m),
            Mapping::Empty if self.mode == Mode::ReadWrite => Ok(&mut []),
            _ => Err(StorageError::ReadOnly),
        }
    }

    /// Byte at `index` without a bounds check.
    ///
    /// # Safety
    /// `index` must be less than `self.len()`.
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> u8 {
        *self.as_slice().get_unchecked(index)
    }

    /// Write dirty pages back to the file. No-op for read-only mappings.
    pub fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(m) = &self.mapping {
            m.flush()?;
        }
        Ok(())
    }

    /// Flush and unmap.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

impl Index<usize> for MappedFile {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.as_slice()[index]
    }
}

/// Whether page locking is available on this platform.
pub fn is_mlock_supported() -> bool {
    cfg!(all(unix, not(target_os = "android")))
}

/// Best-effort pin of `data`'s pages into RAM. Returns 0 on success, -1 otherwise.
pub fn maybe_mlock(data: &[u8]) -> i32 {
    #[cfg(all(unix, not(target_os = "android")))]
    {
        if data.is_empty() {
            return 0;
        }
        // Safety: the range is a live borrowed slice.
        let rc = unsafe { libc::mlock(data.as_ptr() as *const libc::c_void, data.len()) };
        if rc == 0 {
            0
        } else {
            -1
        }
    }

    #[cfg(not(all(unix, not(target_os = "android"))))]
    {
        let _ = data;
        -1
    }
}

/// Undo [`maybe_mlock`]. Returns 0 on success, -1 otherwise.
pub fn maybe_munlock(data: &[u8]) -> i32 {
    #[cfg(all(unix, not(target_os = "android")))]
    {
        if data.is_empty() {
            return 0;
        }
        let rc = unsafe { libc::munlock(data.as_ptr() as *const libc::c_void, data.len()) };
        if rc == 0 {
            0
        } else {
            -1
        }
    }

    #[cfg(not(all(unix, not(target_os = "android"))))]
    {
        let _ = data;
        -1
    }
}
