//! Device adapter: geometry, command contexts and synchronous LBA I/O.
//!
//! The adapter exposes a blocking interface over contiguous LBA ranges. Each
//! call issues exactly one command; data moves through a device-owned staging
//! buffer that is never handed to the caller. There are no partial-success
//! semantics: on error the target bytes are undefined and callers must not
//! advance any frontier.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NvmefsError, NvmefsResult};
use crate::placement::PlacementId;

/// Immutable namespace geometry, obtained once at device open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    /// Size of one logical block in bytes (typically 4096).
    pub lba_size: u64,
    /// Total number of LBAs on the namespace.
    pub lba_count: u64,
}

impl DeviceGeometry {
    /// Number of LBAs required to hold `nr_bytes`, rounded up.
    pub fn lbas_for(&self, nr_bytes: u64) -> u64 {
        nr_bytes.div_ceil(self.lba_size)
    }

    /// Total namespace capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.lba_size * self.lba_count
    }
}

/// A single contiguous LBA-range command.
///
/// Built once per I/O by [`CmdContext::for_transfer`]; the placement id lands
/// in the command dword reserved for placement identifiers via
/// [`PlacementId::dword`].
#[derive(Debug, Clone, Copy)]
pub struct CmdContext {
    /// Namespace the command addresses.
    pub nsid: u32,
    /// First LBA of the transfer.
    pub start_lba: u64,
    /// Number of LBAs covered by the transfer.
    pub nr_lbas: u64,
    /// Exact number of payload bytes; at most `nr_lbas * lba_size`.
    pub nr_bytes: u64,
    /// Byte offset into the first LBA for sub-block access. When non-zero
    /// the transfer must be contained in that single LBA and the device
    /// serves it by read-modify-write.
    pub in_block_offset: u64,
    /// FDP placement tag for the command.
    pub placement: PlacementId,
}

impl CmdContext {
    /// Builds a command context for a byte transfer starting at `start_lba`,
    /// with `nr_lbas = ceil(nr_bytes / lba_size)`.
    pub fn for_transfer(
        nsid: u32,
        geometry: DeviceGeometry,
        start_lba: u64,
        nr_bytes: u64,
        in_block_offset: u64,
        placement: PlacementId,
    ) -> CmdContext {
        CmdContext {
            nsid,
            start_lba,
            nr_lbas: geometry.lbas_for(nr_bytes),
            nr_bytes,
            in_block_offset,
            placement,
        }
    }
}

/// I/O statistics for a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoStats {
    /// Completed read commands.
    pub reads_completed: u64,
    /// Completed write commands.
    pub writes_completed: u64,
    /// Payload bytes read.
    pub bytes_read: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Commands that returned an error.
    pub errors: u64,
}

/// Synchronous block device interface.
///
/// Implementations guarantee that every call maps to exactly one contiguous
/// LBA-range command and that staging buffers are released on all exit
/// paths, including errors.
pub trait Device: Send + Sync {
    /// Reports the namespace geometry.
    fn geometry(&self) -> DeviceGeometry;

    /// Reports the namespace id commands should carry.
    fn namespace_id(&self) -> u32;

    /// Reads `ctx.nr_bytes` bytes into `dst`. Returns the number of LBAs
    /// transferred.
    fn read(&self, dst: &mut [u8], ctx: &CmdContext) -> NvmefsResult<u64>;

    /// Writes `ctx.nr_bytes` bytes from `src`. Returns the number of LBAs
    /// transferred.
    fn write(&self, src: &[u8], ctx: &CmdContext) -> NvmefsResult<u64>;

    /// Reclaim Unit Handle ids indexed by placement-handle index, as
    /// reported by an FDP management-receive at device open.
    fn ruh_status(&self) -> NvmefsResult<Vec<u16>>;

    /// Current I/O statistics.
    fn stats(&self) -> IoStats;

    /// Human-readable device name.
    fn name(&self) -> &str;
}

fn check_command(geometry: DeviceGeometry, ctx: &CmdContext) -> NvmefsResult<()> {
    if ctx.nr_lbas == 0 {
        return Err(NvmefsError::DeviceIo {
            reason: "zero-length command".to_string(),
        });
    }
    if ctx.start_lba >= geometry.lba_count || ctx.nr_lbas > geometry.lba_count - ctx.start_lba {
        return Err(NvmefsError::DeviceIo {
            reason: format!(
                "LBA range [{}, {}) beyond namespace of {} LBAs",
                ctx.start_lba,
                ctx.start_lba + ctx.nr_lbas,
                geometry.lba_count
            ),
        });
    }
    if ctx.in_block_offset + ctx.nr_bytes > ctx.nr_lbas * geometry.lba_size {
        return Err(NvmefsError::DeviceIo {
            reason: format!(
                "{} bytes at in-block offset {} exceed {} LBAs",
                ctx.nr_bytes, ctx.in_block_offset, ctx.nr_lbas
            ),
        });
    }
    if ctx.in_block_offset > 0 && ctx.nr_lbas != 1 {
        return Err(NvmefsError::DeviceIo {
            reason: "sub-block transfer spanning multiple LBAs".to_string(),
        });
    }
    Ok(())
}

/// An aligned staging buffer suitable for direct I/O.
///
/// Allocation is zero-initialised; the memory is released on drop, which
/// also covers error and panic exits from an I/O path.
pub struct DmaBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl DmaBuffer {
    /// Allocates `len` zeroed bytes aligned to `align`.
    pub fn alloc(len: usize, align: usize) -> NvmefsResult<DmaBuffer> {
        let layout = Layout::from_size_align(len.max(1), align.max(1)).map_err(|e| {
            NvmefsError::DeviceIo {
                reason: format!("bad DMA layout: {e}"),
            }
        })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| NvmefsError::DeviceIo {
            reason: format!("DMA allocation of {len} bytes failed"),
        })?;
        Ok(DmaBuffer { ptr, layout })
    }

    /// The buffer as an immutable byte slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the buffer's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// The buffer as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid and uniquely borrowed through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout in alloc().
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the buffer owns its allocation exclusively.
unsafe impl Send for DmaBuffer {}

/// In-memory namespace, used by tests and as the embedded fallback when no
/// raw device is available.
///
/// Blocks are stored sparsely; unwritten LBAs read back as zeroes, matching
/// a freshly formatted namespace.
pub struct MemoryDevice {
    geometry: DeviceGeometry,
    nsid: u32,
    placement_handles: u16,
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
    stats: Mutex<IoStats>,
}

impl MemoryDevice {
    /// Creates a namespace with the given geometry.
    pub fn new(geometry: DeviceGeometry) -> Self {
        debug!(
            lba_size = geometry.lba_size,
            lba_count = geometry.lba_count,
            "memory device created"
        );
        Self {
            geometry,
            nsid: 1,
            placement_handles: 8,
            blocks: Mutex::new(HashMap::new()),
            stats: Mutex::new(IoStats::default()),
        }
    }

    /// Overrides the number of advertised FDP placement handles.
    pub fn with_placement_handles(mut self, count: u16) -> Self {
        self.placement_handles = count;
        self
    }

    fn update_stats<F>(&self, f: F)
    where
        F: FnOnce(&mut IoStats),
    {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn byte_range(&self, ctx: &CmdContext) -> (u64, u64) {
        let pos = ctx.start_lba * self.geometry.lba_size + ctx.in_block_offset;
        (pos, ctx.nr_bytes)
    }
}

impl Device for MemoryDevice {
    fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    fn namespace_id(&self) -> u32 {
        self.nsid
    }

    fn read(&self, dst: &mut [u8], ctx: &CmdContext) -> NvmefsResult<u64> {
        check_command(self.geometry, ctx)?;
        if (dst.len() as u64) < ctx.nr_bytes {
            self.update_stats(|s| s.errors += 1);
            return Err(NvmefsError::DeviceIo {
                reason: format!(
                    "destination buffer of {} bytes too small for {}-byte read",
                    dst.len(),
                    ctx.nr_bytes
                ),
            });
        }

        let lba_size = self.geometry.lba_size as usize;
        let (mut pos, len) = self.byte_range(ctx);
        let blocks = self.blocks.lock().expect("memory device poisoned");
        let mut copied = 0usize;
        while (copied as u64) < len {
            let lba = pos / self.geometry.lba_size;
            let in_block = (pos % self.geometry.lba_size) as usize;
            let chunk = (lba_size - in_block).min(len as usize - copied);
            match blocks.get(&lba) {
                Some(block) => {
                    dst[copied..copied + chunk].copy_from_slice(&block[in_block..in_block + chunk]);
                }
                None => {
                    dst[copied..copied + chunk].fill(0);
                }
            }
            copied += chunk;
            pos += chunk as u64;
        }
        drop(blocks);

        self.update_stats(|s| {
            s.reads_completed += 1;
            s.bytes_read += len;
        });
        Ok(ctx.nr_lbas)
    }

    fn write(&self, src: &[u8], ctx: &CmdContext) -> NvmefsResult<u64> {
        check_command(self.geometry, ctx)?;
        if (src.len() as u64) < ctx.nr_bytes {
            self.update_stats(|s| s.errors += 1);
            return Err(NvmefsError::DeviceIo {
                reason: format!(
                    "source buffer of {} bytes too small for {}-byte write",
                    src.len(),
                    ctx.nr_bytes
                ),
            });
        }

        debug!(
            start_lba = ctx.start_lba,
            nr_lbas = ctx.nr_lbas,
            placement = ctx.placement.0,
            "memory device write"
        );

        let lba_size = self.geometry.lba_size as usize;
        let (mut pos, len) = self.byte_range(ctx);
        let mut blocks = self.blocks.lock().expect("memory device poisoned");
        let mut copied = 0usize;
        while (copied as u64) < len {
            let lba = pos / self.geometry.lba_size;
            let in_block = (pos % self.geometry.lba_size) as usize;
            let chunk = (lba_size - in_block).min(len as usize - copied);
            let block = blocks.entry(lba).or_insert_with(|| vec![0u8; lba_size]);
            block[in_block..in_block + chunk].copy_from_slice(&src[copied..copied + chunk]);
            copied += chunk;
            pos += chunk as u64;
        }
        drop(blocks);

        self.update_stats(|s| {
            s.writes_completed += 1;
            s.bytes_written += len;
        });
        Ok(ctx.nr_lbas)
    }

    fn ruh_status(&self) -> NvmefsResult<Vec<u16>> {
        Ok((0..self.placement_handles).collect())
    }

    fn stats(&self) -> IoStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn name(&self) -> &str {
        "MemoryDevice"
    }
}

/// Options for opening a [`BlockFileDevice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockFileOptions {
    /// LBA size to present; must match the namespace format for real devices.
    pub lba_size: u64,
    /// LBA count to present. Zero means probe the backing file/device size.
    pub lba_count: u64,
    /// Open with `O_DIRECT`, bypassing the kernel page cache.
    pub direct_io: bool,
    /// Number of FDP placement handles to advertise.
    pub placement_handles: u16,
}

impl Default for BlockFileOptions {
    fn default() -> Self {
        Self {
            lba_size: 4096,
            lba_count: 0,
            direct_io: true,
            placement_handles: 8,
        }
    }
}

/// Block device backed by a file or block special node.
///
/// Transfers are staged through an LBA-aligned [`DmaBuffer`]; partial-LBA
/// edges are served by read-modify-write so the device only ever sees
/// whole-block commands.
pub struct BlockFileDevice {
    file: File,
    path: String,
    geometry: DeviceGeometry,
    nsid: u32,
    placement_handles: u16,
    stats: Mutex<IoStats>,
}

impl BlockFileDevice {
    /// Opens (creating a regular file if necessary) a device at `path`.
    pub fn open(path: &Path, nsid: u32, opts: BlockFileOptions) -> NvmefsResult<Self> {
        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true).create(opts.lba_count > 0);
        if opts.direct_io {
            open_opts.custom_flags(libc::O_DIRECT);
        }
        let mut file = match open_opts.open(path) {
            Ok(file) => file,
            Err(err) if opts.direct_io => {
                // Regular files on some filesystems reject O_DIRECT.
                warn!(path = %path.display(), %err, "O_DIRECT open failed, retrying buffered");
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(opts.lba_count > 0)
                    .open(path)?
            }
            Err(err) => return Err(err.into()),
        };

        let lba_count = if opts.lba_count > 0 {
            file.set_len(opts.lba_count * opts.lba_size)?;
            opts.lba_count
        } else {
            // Block special files report zero metadata length; seek instead.
            let end = file.seek(SeekFrom::End(0))?;
            end / opts.lba_size
        };

        if lba_count == 0 {
            return Err(NvmefsError::DeviceIo {
                reason: format!("device {} has no addressable LBAs", path.display()),
            });
        }

        let geometry = DeviceGeometry {
            lba_size: opts.lba_size,
            lba_count,
        };
        info!(
            path = %path.display(),
            lba_size = geometry.lba_size,
            lba_count = geometry.lba_count,
            "block file device opened"
        );

        Ok(Self {
            file,
            path: path.display().to_string(),
            geometry,
            nsid,
            placement_handles: opts.placement_handles,
            stats: Mutex::new(IoStats::default()),
        })
    }

    fn update_stats<F>(&self, f: F)
    where
        F: FnOnce(&mut IoStats),
    {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn staging(&self, ctx: &CmdContext) -> NvmefsResult<DmaBuffer> {
        let len = (ctx.nr_lbas * self.geometry.lba_size) as usize;
        DmaBuffer::alloc(len, self.geometry.lba_size as usize)
    }

    fn read_staging(&self, buf: &mut DmaBuffer, ctx: &CmdContext) -> NvmefsResult<()> {
        let pos = ctx.start_lba * self.geometry.lba_size;
        self.file.read_exact_at(buf.as_mut_slice(), pos)?;
        Ok(())
    }
}

impl Device for BlockFileDevice {
    fn geometry(&self) -> DeviceGeometry {
        self.geometry
    }

    fn namespace_id(&self) -> u32 {
        self.nsid
    }

    fn read(&self, dst: &mut [u8], ctx: &CmdContext) -> NvmefsResult<u64> {
        check_command(self.geometry, ctx)?;
        if (dst.len() as u64) < ctx.nr_bytes {
            self.update_stats(|s| s.errors += 1);
            return Err(NvmefsError::DeviceIo {
                reason: "destination buffer too small".to_string(),
            });
        }

        let mut staging = self.staging(ctx)?;
        let result = self.read_staging(&mut staging, ctx);
        if result.is_err() {
            self.update_stats(|s| s.errors += 1);
        }
        result?;

        let off = ctx.in_block_offset as usize;
        let len = ctx.nr_bytes as usize;
        dst[..len].copy_from_slice(&staging.as_slice()[off..off + len]);

        self.update_stats(|s| {
            s.reads_completed += 1;
            s.bytes_read += ctx.nr_bytes;
        });
        Ok(ctx.nr_lbas)
    }

    fn write(&self, src: &[u8], ctx: &CmdContext) -> NvmefsResult<u64> {
        check_command(self.geometry, ctx)?;
        if (src.len() as u64) < ctx.nr_bytes {
            self.update_stats(|s| s.errors += 1);
            return Err(NvmefsError::DeviceIo {
                reason: "source buffer too small".to_string(),
            });
        }

        let mut staging = self.staging(ctx)?;
        let partial = ctx.in_block_offset > 0
            || ctx.nr_bytes < ctx.nr_lbas * self.geometry.lba_size;
        if partial {
            // Preserve the bytes around the payload in the edge LBAs.
            if let Err(err) = self.read_staging(&mut staging, ctx) {
                debug!(%err, "RMW pre-read beyond written extent, assuming zeroes");
            }
        }

        let off = ctx.in_block_offset as usize;
        let len = ctx.nr_bytes as usize;
        staging.as_mut_slice()[off..off + len].copy_from_slice(&src[..len]);

        debug!(
            device = %self.path,
            start_lba = ctx.start_lba,
            nr_lbas = ctx.nr_lbas,
            placement = ctx.placement.dword(),
            "block file device write"
        );

        let pos = ctx.start_lba * self.geometry.lba_size;
        let result = self.file.write_all_at(staging.as_slice(), pos);
        if result.is_err() {
            self.update_stats(|s| s.errors += 1);
        }
        result?;

        self.update_stats(|s| {
            s.writes_completed += 1;
            s.bytes_written += ctx.nr_bytes;
        });
        Ok(ctx.nr_lbas)
    }

    fn ruh_status(&self) -> NvmefsResult<Vec<u16>> {
        Ok((0..self.placement_handles).collect())
    }

    fn stats(&self) -> IoStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn name(&self) -> &str {
        "BlockFileDevice"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO: DeviceGeometry = DeviceGeometry {
        lba_size: 4096,
        lba_count: 1024,
    };

    fn ctx(start_lba: u64, nr_bytes: u64, in_block_offset: u64) -> CmdContext {
        CmdContext::for_transfer(1, GEO, start_lba, nr_bytes, in_block_offset, PlacementId(0))
    }

    #[test]
    fn test_lbas_for_rounds_up() {
        assert_eq!(GEO.lbas_for(1), 1);
        assert_eq!(GEO.lbas_for(4096), 1);
        assert_eq!(GEO.lbas_for(4097), 2);
        assert_eq!(GEO.lbas_for(0), 0);
    }

    #[test]
    fn test_memory_write_read_roundtrip() {
        let device = MemoryDevice::new(GEO);
        let data = vec![0xAB; 4096];

        device.write(&data, &ctx(10, 4096, 0)).unwrap();

        let mut out = vec![0u8; 4096];
        device.read(&mut out, &ctx(10, 4096, 0)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_memory_unwritten_reads_zeroes() {
        let device = MemoryDevice::new(GEO);
        let mut out = vec![0xFF; 8192];
        device.read(&mut out, &ctx(0, 8192, 0)).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_memory_sub_block_rmw() {
        let device = MemoryDevice::new(GEO);
        let base = vec![0x11; 4096];
        device.write(&base, &ctx(5, 4096, 0)).unwrap();

        device.write(b"hello", &ctx(5, 5, 16)).unwrap();

        let mut out = vec![0u8; 4096];
        device.read(&mut out, &ctx(5, 4096, 0)).unwrap();
        assert_eq!(&out[16..21], b"hello");
        assert_eq!(out[15], 0x11);
        assert_eq!(out[21], 0x11);
    }

    #[test]
    fn test_memory_partial_write_preserves_tail() {
        let device = MemoryDevice::new(GEO);
        let base = vec![0x22; 4096];
        device.write(&base, &ctx(3, 4096, 0)).unwrap();

        device.write(b"abc", &ctx(3, 3, 0)).unwrap();

        let mut out = vec![0u8; 4096];
        device.read(&mut out, &ctx(3, 4096, 0)).unwrap();
        assert_eq!(&out[..3], b"abc");
        assert!(out[3..].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_memory_out_of_bounds_command_fails() {
        let device = MemoryDevice::new(GEO);
        let data = vec![0u8; 4096];
        let result = device.write(&data, &ctx(GEO.lba_count, 4096, 0));
        assert!(matches!(result, Err(NvmefsError::DeviceIo { .. })));

        let result = device.write(&data, &ctx(GEO.lba_count - 1, 8192, 0));
        assert!(matches!(result, Err(NvmefsError::DeviceIo { .. })));
    }

    #[test]
    fn test_memory_multi_lba_sub_block_rejected() {
        let device = MemoryDevice::new(GEO);
        let data = vec![0u8; 8192];
        let bad = CmdContext {
            nsid: 1,
            start_lba: 0,
            nr_lbas: 2,
            nr_bytes: 8000,
            in_block_offset: 96,
            placement: PlacementId(0),
        };
        assert!(matches!(
            device.write(&data, &bad),
            Err(NvmefsError::DeviceIo { .. })
        ));
    }

    #[test]
    fn test_memory_stats_tracking() {
        let device = MemoryDevice::new(GEO);
        let data = vec![0u8; 4096];
        device.write(&data, &ctx(0, 4096, 0)).unwrap();
        let mut out = vec![0u8; 13];
        device.read(&mut out, &ctx(0, 13, 0)).unwrap();

        let stats = device.stats();
        assert_eq!(stats.writes_completed, 1);
        assert_eq!(stats.reads_completed, 1);
        assert_eq!(stats.bytes_written, 4096);
        assert_eq!(stats.bytes_read, 13);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_memory_ruh_status() {
        let device = MemoryDevice::new(GEO).with_placement_handles(3);
        assert_eq!(device.ruh_status().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dma_buffer_zeroed_and_aligned() {
        let buf = DmaBuffer::alloc(8192, 4096).unwrap();
        assert_eq!(buf.as_slice().len(), 8192);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buf.as_slice().as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn test_block_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns.img");
        let device = BlockFileDevice::open(
            &path,
            1,
            BlockFileOptions {
                lba_size: 4096,
                lba_count: 128,
                direct_io: false,
                placement_handles: 8,
            },
        )
        .unwrap();

        assert_eq!(device.geometry().lba_count, 128);

        let data = vec![0x5A; 4096];
        device.write(&data, &ctx(7, 4096, 0)).unwrap();

        let mut out = vec![0u8; 4096];
        device.read(&mut out, &ctx(7, 4096, 0)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_block_file_rmw_preserves_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns.img");
        let device = BlockFileDevice::open(
            &path,
            1,
            BlockFileOptions {
                lba_size: 4096,
                lba_count: 16,
                direct_io: false,
                placement_handles: 8,
            },
        )
        .unwrap();

        let base = vec![0x33; 4096];
        device.write(&base, &ctx(2, 4096, 0)).unwrap();
        device.write(b"xyz", &ctx(2, 3, 100)).unwrap();

        let mut out = vec![0u8; 4096];
        device.read(&mut out, &ctx(2, 4096, 0)).unwrap();
        assert_eq!(&out[100..103], b"xyz");
        assert_eq!(out[99], 0x33);
        assert_eq!(out[103], 0x33);
    }

    #[test]
    fn test_block_file_probes_existing_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns.img");
        std::fs::write(&path, vec![0u8; 4096 * 32]).unwrap();

        let device = BlockFileDevice::open(
            &path,
            1,
            BlockFileOptions {
                lba_size: 4096,
                lba_count: 0,
                direct_io: false,
                placement_handles: 8,
            },
        )
        .unwrap();
        assert_eq!(device.geometry().lba_count, 32);
    }
}
