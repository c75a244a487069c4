//! Positioned reads/writes against the device and the sparse cache file.
//!
//! Each operation opens the file, does its one read or write, and lets the
//! `File` drop close it — there is no long-lived descriptor for either file
//! (`spec.md` §5: "simplifies crash consistency — the OS page cache flushes
//! on close"). Positioned I/O uses `std::os::unix::fs::FileExt`, which is
//! the idiomatic stdlib way to do this on Unix; there's no ecosystem crate
//! that does this more idiomatically than the stdlib trait itself.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::Error;

/// Reads up to `len` bytes from `path` at `offset`. Returns fewer than `len`
/// bytes only at EOF, matching `Read`'s usual short-read contract rather
/// than `pread(2)`'s "fill or fail" one.
pub fn read_at(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
    let file = File::open(path).map_err(Error::StdIo)?;
    let mut buf = vec![0u8; len];
    let mut total = 0;
    loop {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                if total == len {
                    break;
                }
            }
            Err(e) => return Err(Error::StdIo(e)),
        }
    }
    buf.truncate(total);
    Ok(buf)
}

/// Writes `data` to `path` at `offset`, creating the file if absent.
pub fn write_at(path: &Path, offset: u64, data: &[u8]) -> Result<(), Error> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(Error::StdIo)?;
    file.write_all_at(data, offset).map_err(Error::StdIo)?;
    Ok(())
}

/// Creates `path` if it doesn't exist and extends it to `size` bytes as a
/// sparse file (never shrinks an existing file).
pub fn ensure_sparse_file(path: &Path, size: u64) -> Result<(), Error> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(path)
        .map_err(Error::StdIo)?;
    let current_len = file.metadata().map_err(Error::StdIo)?.len();
    if current_len < size {
        file.set_len(size).map_err(Error::StdIo)?;
    }
    Ok(())
}

/// True if `data` is non-empty and contains at least one non-zero byte.
/// A sparse cache file reads back as all-zero for never-written regions, so
/// an all-zero read is treated as indistinguishable from a hole
/// (`spec.md` §4.3's documented, deliberate approximation).
pub fn looks_written(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().any(|&b| b != 0)
}

pub fn fsync(path: &Path) -> Result<(), Error> {
    let file = OpenOptions::new().write(true).open(path).map_err(Error::StdIo)?;
    file.sync_all().map_err(Error::StdIo)
}
