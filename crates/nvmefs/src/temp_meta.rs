//! Temporary file metadata: filename -> extent + live size.
//!
//! One mutex serialises create/truncate/delete and map lookups; the per-file
//! write frontier is an atomic so concurrent writers advance it without the
//! lock. The underlying extent goes back to the block manager's free list on
//! delete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{NvmefsError, NvmefsResult};
use crate::temp_block::{TemporaryBlock, TemporaryBlockManager};

/// Extent reserved for each temporary file at creation, in LBAs (4 MiB at
/// 4 KiB blocks).
pub const DEFAULT_TEMP_FILE_BLOCKS: u64 = 1024;

/// Metadata for one live temporary file.
///
/// Invariant: `extent.start <= lba_location <= extent.end`.
#[derive(Debug)]
pub struct TempFileMetadata {
    /// Monotonic id assigned at creation.
    file_index: u64,
    /// Database page size, inferred from the first write. Zero until then.
    block_size_bytes: AtomicU64,
    /// Write frontier within the extent: next LBA to write.
    lba_location: AtomicU64,
    extent: TemporaryBlock,
}

impl TempFileMetadata {
    fn new(file_index: u64, extent: TemporaryBlock) -> Self {
        Self {
            file_index,
            block_size_bytes: AtomicU64::new(0),
            lba_location: AtomicU64::new(extent.start_lba()),
            extent,
        }
    }

    /// Monotonic file id.
    pub fn file_index(&self) -> u64 {
        self.file_index
    }

    /// Inferred page size in bytes, zero before the first write.
    pub fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes.load(Ordering::Acquire)
    }

    /// Number of live pages, derived from the frontier and page size.
    pub fn nr_blocks(&self, lba_size: u64) -> u64 {
        let block_size = self.block_size_bytes();
        if block_size == 0 {
            return 0;
        }
        (self.used_lbas() * lba_size) / block_size
    }

    /// LBAs between the extent start and the frontier.
    pub fn used_lbas(&self) -> u64 {
        self.lba_location.load(Ordering::Acquire) - self.extent.start_lba()
    }

    /// The extent backing this file.
    pub fn extent(&self) -> &TemporaryBlock {
        &self.extent
    }
}

struct Inner {
    files: HashMap<String, Arc<TempFileMetadata>>,
    blocks: TemporaryBlockManager,
    next_file_index: u64,
}

/// Arbitrates create/truncate/delete/list over the temporary region.
pub struct TempFileManager {
    lba_size: u64,
    inner: Mutex<Inner>,
}

impl TempFileManager {
    /// Creates a manager over temporary LBAs `[start_lba, end_lba)`.
    pub fn new(start_lba: u64, end_lba: u64, lba_size: u64) -> Self {
        Self {
            lba_size,
            inner: Mutex::new(Inner {
                files: HashMap::new(),
                blocks: TemporaryBlockManager::new(start_lba, end_lba),
                next_file_index: 0,
            }),
        }
    }

    fn entry(&self, filename: &str) -> NvmefsResult<Arc<TempFileMetadata>> {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        inner
            .files
            .get(filename)
            .cloned()
            .ok_or_else(|| NvmefsError::InvalidPath {
                path: filename.to_string(),
                reason: "unknown temporary file".to_string(),
            })
    }

    /// Creates a temporary file, reserving [`DEFAULT_TEMP_FILE_BLOCKS`] LBAs.
    /// A no-op when the file already exists.
    pub fn create(&self, filename: &str) -> NvmefsResult<()> {
        let mut inner = self.inner.lock().expect("temp metadata poisoned");
        if inner.files.contains_key(filename) {
            return Ok(());
        }

        let extent = inner.blocks.allocate(DEFAULT_TEMP_FILE_BLOCKS)?;
        let file_index = inner.next_file_index;
        inner.next_file_index += 1;

        debug!(
            filename,
            file_index,
            start_lba = extent.start_lba(),
            lba_count = extent.lba_count(),
            "temporary file created"
        );
        inner.files.insert(
            filename.to_string(),
            Arc::new(TempFileMetadata::new(file_index, extent)),
        );
        Ok(())
    }

    /// Translates a byte offset to an LBA inside the file's extent; the
    /// `nr_lbas` the caller intends to transfer must also fit.
    pub fn get_lba(&self, filename: &str, byte_offset: u64, nr_lbas: u64) -> NvmefsResult<u64> {
        let meta = self.entry(filename)?;
        let extent = meta.extent();
        let lba = extent.start_lba() + byte_offset / self.lba_size;
        if lba < extent.start_lba() || lba + nr_lbas > extent.end_lba() {
            return Err(NvmefsError::OutOfRange {
                start_lba: lba,
                nr_lbas,
                region_start: extent.start_lba(),
                region_end: extent.end_lba() - 1,
            });
        }
        Ok(lba)
    }

    /// Monotonically advances the file's write frontier to `lba_location`.
    /// Concurrent advances race without locking; the frontier never regresses.
    pub fn move_lba_location(&self, filename: &str, lba_location: u64) -> NvmefsResult<()> {
        let meta = self.entry(filename)?;
        debug_assert!(lba_location <= meta.extent().end_lba());
        meta.lba_location.fetch_max(lba_location, Ordering::AcqRel);
        Ok(())
    }

    /// Records the page size observed on the first write.
    pub fn infer_block_size(&self, filename: &str, nr_bytes: u64) -> NvmefsResult<()> {
        let meta = self.entry(filename)?;
        let _ = meta.block_size_bytes.compare_exchange(
            0,
            nr_bytes,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Shrinks the file to `new_size_bytes`. Growing is rejected; the extent
    /// is never released.
    pub fn truncate(&self, filename: &str, new_size_bytes: u64) -> NvmefsResult<()> {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        let meta = inner
            .files
            .get(filename)
            .ok_or_else(|| NvmefsError::InvalidPath {
                path: filename.to_string(),
                reason: "unknown temporary file".to_string(),
            })?;

        let current_bytes = meta.used_lbas() * self.lba_size;
        if new_size_bytes > current_bytes {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "truncate to {new_size_bytes} bytes grows file of {current_bytes} bytes"
                ),
            });
        }

        let new_frontier =
            meta.extent().start_lba() + new_size_bytes.div_ceil(self.lba_size);
        meta.lba_location.store(new_frontier, Ordering::Release);
        debug!(filename, new_size_bytes, new_frontier, "temporary file truncated");
        Ok(())
    }

    /// Deletes the file, returning its extent to the free list.
    pub fn delete(&self, filename: &str) -> NvmefsResult<()> {
        let mut inner = self.inner.lock().expect("temp metadata poisoned");
        let meta = inner
            .files
            .remove(filename)
            .ok_or_else(|| NvmefsError::InvalidPath {
                path: filename.to_string(),
                reason: "unknown temporary file".to_string(),
            })?;
        inner.blocks.release(meta.extent().clone());
        debug!(filename, "temporary file deleted");
        Ok(())
    }

    /// Whether the file has an active entry.
    pub fn file_exists(&self, filename: &str) -> bool {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        inner.files.contains_key(filename)
    }

    /// Live size of the file in LBAs.
    pub fn file_size_lbas(&self, filename: &str) -> NvmefsResult<u64> {
        Ok(self.entry(filename)?.used_lbas())
    }

    /// Upper bound for a seek inside the file: its live size in bytes.
    pub fn seek_bound(&self, filename: &str) -> NvmefsResult<u64> {
        Ok(self.entry(filename)?.used_lbas() * self.lba_size)
    }

    /// Invokes `callback` with the basename of every live temporary file.
    pub fn list_files<F>(&self, _directory: &str, mut callback: F)
    where
        F: FnMut(&str, bool),
    {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        for path in inner.files.keys() {
            let name = path.rsplit('/').next().unwrap_or(path.as_str());
            callback(name, false);
        }
    }

    /// Bytes of the temporary region not occupied by live file contents.
    ///
    /// Occupancy counts frontier-covered LBAs, so each successful write of
    /// `n` bytes reduces the result by exactly `ceil(n / lba_size)` LBAs.
    pub fn available_space(&self, total_lba_count: u64, tmp_start: u64) -> u64 {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        let region_bytes = (total_lba_count - tmp_start) * self.lba_size;
        let used_bytes: u64 = inner
            .files
            .values()
            .map(|meta| meta.used_lbas() * self.lba_size)
            .sum();
        region_bytes - used_bytes
    }

    /// Removes every temporary file, releasing all extents.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("temp metadata poisoned");
        let files = std::mem::take(&mut inner.files);
        for (filename, meta) in files {
            debug!(filename = %filename, "temporary file dropped by clear");
            inner.blocks.release(meta.extent().clone());
        }
    }

    /// Number of live temporary files.
    pub fn file_count(&self) -> usize {
        let inner = self.inner.lock().expect("temp metadata poisoned");
        inner.files.len()
    }
}
