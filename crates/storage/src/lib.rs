//! Raw fixed-size-record file storage.
//!
//! [`PagedFile`] is the bottom layer shared by every index: a
//! random-access file with a fixed header slot at byte 0 and a bump
//! allocator handing out ever-increasing record offsets. It knows nothing
//! about record contents; the indexes above it define their own layouts.


use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use common::{Offset, StoreError, StoreResult};

/// A random-access file of fixed-size records behind a bump allocator.
///
/// The handle is exclusively owned for the lifetime of the index that
/// opens it. All I/O is synchronous and performed inline; every write is
/// flushed before the call returns, so there is no buffering across
/// calls.
#[derive(Debug)]
pub struct PagedFile {
    file: File,
    header_len: usize,
    next_free: u64,
}

impl PagedFile {
    /// Open an existing file or create an empty one.
    ///
    /// Returns the handle plus `true` if the file was newly created (or
    /// found empty), in which case the caller must write its initial
    /// header. A fresh file's allocation cursor starts right past the
    /// header; on an existing file the caller restores the cursor from
    /// its persisted header via [`restore_next_free`].
    ///
    /// [`restore_next_free`]: PagedFile::restore_next_free
    pub fn open_or_create(path: &Path, header_len: usize) -> StoreResult<(Self, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let created = file.metadata()?.len() == 0;

        Ok((
            Self {
                file,
                header_len,
                next_free: header_len as u64,
            },
            created,
        ))
    }

    /// Read exactly `buf.len()` bytes at `offset`. A short read is an
    /// I/O failure.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Overwrite exactly `bytes.len()` bytes at `offset`, extending the
    /// file if needed. Flushed before returning.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Hand out the next record offset and advance the cursor by `size`.
    ///
    /// Bump allocation only: nothing is ever freed or reused. The cursor
    /// is persisted inside the owning index's header, not here.
    pub fn allocate(&mut self, size: usize) -> Offset {
        let offset = Offset(self.next_free);
        self.next_free += size as u64;
        offset
    }

    /// Current allocation cursor.
    pub fn next_free(&self) -> u64 {
        self.next_free
    }

    /// Restore the allocation cursor from a persisted header.
    pub fn restore_next_free(&mut self, next_free: u64) {
        self.next_free = next_free;
    }

    /// Read the fixed header slot at byte 0.
    pub fn read_header(&mut self, buf: &mut [u8]) -> StoreResult<()> {
        debug_assert_eq!(buf.len(), self.header_len);
        self.read_at(0, buf)
    }

    /// Rewrite the fixed header slot at byte 0.
    pub fn write_header(&mut self, bytes: &[u8]) -> StoreResult<()> {
        if bytes.len() != self.header_len {
            return Err(StoreError::Storage(format!(
                "header is {} bytes, expected {}",
                bytes.len(),
                self.header_len
            )));
        }
        self.write_at(0, bytes)
    }

    /// Truncate the file to nothing and reset the allocation cursor.
    ///
    /// The caller re-initializes its header afterwards. This is the only
    /// path that ever reclaims storage.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.next_free = self.header_len as u64;
        Ok(())
    }

    /// Force file contents to the backing medium.
    pub fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
