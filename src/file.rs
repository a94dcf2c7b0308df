//! Thread-safe file access.
//!
//! The sequential cursor (read/write/skip/seek) is guarded by a mutex and is
//! what the section reader and writer drive. `read_at` goes through a
//! memory-mapped view instead and may be called concurrently from any worker
//! without touching the cursor or the lock.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::Mutex;

use crate::error::{PsdError, Result};

/// A seekable document on disk with a locked sequential cursor and a
/// lock-free positional read path.
///
/// Reads past the recorded size and writes past the planned size fail with
/// [`PsdError::IoOverflow`] instead of silently truncating.
pub struct File {
    inner: Mutex<Cursor>,
    /// Memory-mapped view of the file, present when opened for reading and
    /// the file is non-empty.
    map: Option<Mmap>,
    path: PathBuf,
    /// Recorded size: the on-disk size for readers, the planned size for
    /// writers once [`plan_size`](Self::plan_size) has been called.
    size: Mutex<u64>,
}

struct Cursor {
    document: fs::File,
    offset: u64,
}

impl File {
    /// Open an existing document for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref().to_path_buf();
        let document = fs::File::open(&path)?;
        let size = document.metadata()?.len();

        let map = if size > 0 {
            // The map is only ever read and the file is opened read-only.
            Some(unsafe { Mmap::map(&document)? })
        } else {
            None
        };

        Ok(File {
            inner: Mutex::new(Cursor {
                document,
                offset: 0,
            }),
            map,
            path,
            size: Mutex::new(size),
        })
    }

    /// Create (or truncate) a document for writing.
    ///
    /// Until [`plan_size`](Self::plan_size) is called the planned size is
    /// zero and every write fails; the writer's first pass computes section
    /// sizes precisely so the plan can be recorded before any byte goes out.
    pub fn create(path: impl AsRef<Path>) -> Result<File> {
        let path = path.as_ref().to_path_buf();
        let document = fs::File::create(&path)?;

        Ok(File {
            inner: Mutex::new(Cursor {
                document,
                offset: 0,
            }),
            map: None,
            path,
            size: Mutex::new(0),
        })
    }

    /// Record the total number of bytes the writer is going to produce.
    pub fn plan_size(&self, size: u64) {
        *self.size.lock() = size;
    }

    /// The recorded size of the document.
    pub fn size(&self) -> u64 {
        *self.size.lock()
    }

    /// The path this document was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current offset of the sequential cursor.
    pub fn offset(&self) -> u64 {
        self.inner.lock().offset
    }

    /// Read exactly `buffer.len()` bytes at the cursor.
    pub fn read(&self, buffer: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_bounds(inner.offset, buffer.len() as u64)?;
        inner.document.read_exact(buffer)?;
        inner.offset += buffer.len() as u64;
        Ok(())
    }

    /// Write all of `buffer` at the cursor.
    pub fn write(&self, buffer: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_bounds(inner.offset, buffer.len() as u64)?;
        inner.document.write_all(buffer)?;
        inner.offset += buffer.len() as u64;
        Ok(())
    }

    /// Move the cursor by `count` bytes. Negative counts skip backwards.
    pub fn skip(&self, count: i64) -> Result<()> {
        let inner = self.inner.lock();
        let target = inner
            .offset
            .checked_add_signed(count)
            .ok_or_else(|| overflow(inner.offset, count.unsigned_abs(), 0))?;
        drop(inner);
        self.set_offset(target)
    }

    /// Place the cursor at an absolute offset within the recorded size.
    pub fn set_offset(&self, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_bounds(offset, 0)?;
        inner.document.seek(SeekFrom::Start(offset))?;
        inner.offset = offset;
        Ok(())
    }

    /// Read exactly `buffer.len()` bytes starting at `offset` through the
    /// memory-mapped view.
    ///
    /// Does not move the cursor and takes no lock; safe to call from any
    /// number of workers concurrently. The document reader fetches its
    /// section bodies through this path once the sequential cursor has
    /// walked the length markers.
    pub fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<()> {
        let map = self.map.as_deref().ok_or_else(|| {
            PsdError::InvalidArgument("read_at is only available on files opened for reading".into())
        })?;
        let start = offset as usize;
        let end = start
            .checked_add(buffer.len())
            .filter(|end| *end <= map.len())
            .ok_or_else(|| overflow(offset, buffer.len() as u64, map.len() as u64))?;
        buffer.copy_from_slice(&map[start..end]);
        Ok(())
    }

    fn check_bounds(&self, offset: u64, requested: u64) -> Result<()> {
        let size = *self.size.lock();
        if offset.checked_add(requested).map_or(true, |end| end > size) {
            return Err(overflow(offset, requested, size));
        }
        Ok(())
    }
}

fn overflow(offset: u64, requested: u64, available: u64) -> PsdError {
    PsdError::IoOverflow {
        offset,
        requested,
        available,
    }
}

/// Receives progress reports and answers cancellation polls during long
/// running reads and writes.
///
/// Cancellation is cooperative: the poll happens between sections and
/// chunks, never in the middle of one, and a positive answer surfaces as
/// [`PsdError::Cancelled`] from the operation.
pub trait ProgressCallback: Send {
    /// Called at section boundaries with the fraction of work completed so
    /// far and a short description of the section just finished.
    fn report(&mut self, _completed: f32, _section: &str) {}

    /// Return `true` to cancel the operation at the next boundary.
    fn cancelled(&self) -> bool {
        false
    }
}

/// The default callback: reports nothing and never cancels.
pub struct NoProgress;

impl ProgressCallback for NoProgress {}

pub(crate) fn check_cancelled(progress: &dyn ProgressCallback) -> Result<()> {
    if progress.cancelled() {
        Err(PsdError::Cancelled)
    } else {
        Ok(())
    }
}
