//! Whole-file helpers built on [`MappedFile`].

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::mmap::{MappedFile, Mode};

/// Byte-for-byte comparison of two files. Errors if either cannot be mapped.
pub fn is_equal_file<P: AsRef<Path>, Q: AsRef<Path>>(a: P, b: Q) -> Result<bool> {
    let a = MappedFile::open(a, Mode::ReadOnly)?;
    let b = MappedFile::open(b, Mode::ReadOnly)?;
    Ok(a.as_slice() == b.as_slice())
}

/// Copy `from` to `to`, replacing any existing file at `to`.
///
/// Copying a file onto itself, including through another path or a hard
/// link, leaves it untouched.
pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<()> {
    if is_same_file(from.as_ref(), to.as_ref())? {
        debug!(path = %from.as_ref().display(), "copy onto itself skipped");
        return Ok(());
    }
    let source = MappedFile::open(from.as_ref(), Mode::ReadOnly)?;
    let mut out = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(to.as_ref())?;
    out.write_all(source.as_slice())?;
    out.flush()?;
    debug!(
        from = %from.as_ref().display(),
        to = %to.as_ref().display(),
        len = source.len(),
        "copied file"
    );
    Ok(())
}

/// Whether `a` and `b` name the same existing file. A missing `b` is not `a`.
fn is_same_file(a: &Path, b: &Path) -> io::Result<bool> {
    let b_meta = match fs::metadata(b) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let a_meta = fs::metadata(a)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(a_meta.dev() == b_meta.dev() && a_meta.ino() == b_meta.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = (a_meta, b_meta);
        Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
    }
}
