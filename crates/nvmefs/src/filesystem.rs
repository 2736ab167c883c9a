//! Region router and filesystem facade.
//!
//! `NvmeFileSystem` is the engine-facing API: it classifies paths into the
//! database, WAL and temporary regions, translates byte offsets to LBAs,
//! enforces region range checks, advances write frontiers and owns the
//! device handle plus the in-memory superblock for its whole lifetime.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info, warn};

use crate::config::NvmeConfig;
use crate::device::{BlockFileDevice, BlockFileOptions, CmdContext, Device, DeviceGeometry, IoStats};
use crate::error::{NvmefsError, NvmefsResult};
use crate::handle::{
    FileClass, NvmeFileHandle, OpenFlags, GLOBAL_METADATA_PATH, NVMEFS_PATH_PREFIX, TEMP_DIR_PATH,
};
use crate::placement::{PlacementId, PlacementTable};
use crate::superblock::{Superblock, SUPERBLOCK_BYTES, SUPERBLOCK_LBA};
use crate::temp_meta::TempFileManager;

/// State established when a database is attached: region bounds, live
/// frontiers and the temporary file table.
struct Attached {
    /// Attached database path with the URI scheme stripped.
    db_path: String,
    db_start: u64,
    wal_start: u64,
    tmp_start: u64,
    /// Database write frontier, advanced by lock-free monotonic CAS.
    db_location: AtomicU64,
    /// WAL write frontier, advanced by lock-free monotonic CAS.
    wal_location: AtomicU64,
    temp: TempFileManager,
}

/// Filesystem facade over a single NVMe namespace.
///
/// The facade is the process-wide owner of the device handle and of the
/// in-memory superblock; both live from construction to drop. It is safe to
/// share across database worker threads.
pub struct NvmeFileSystem {
    config: NvmeConfig,
    device: Arc<dyn Device>,
    placement: PlacementTable,
    /// Reclaim Unit Handle ids snapshotted at device open.
    ruhs: Vec<u16>,
    attach_lock: Mutex<()>,
    attached: OnceLock<Attached>,
}

impl NvmeFileSystem {
    /// Creates a facade over an already-open device.
    pub fn new(config: NvmeConfig, device: Arc<dyn Device>) -> NvmefsResult<Self> {
        let geometry = device.geometry();
        if (geometry.lba_size as usize) < SUPERBLOCK_BYTES {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "LBA size {} cannot hold the {SUPERBLOCK_BYTES}-byte superblock",
                    geometry.lba_size
                ),
            });
        }
        let ruhs = device.ruh_status()?;
        info!(
            device = device.name(),
            lba_size = geometry.lba_size,
            lba_count = geometry.lba_count,
            ruh_count = ruhs.len(),
            "nvme filesystem created"
        );
        Ok(Self {
            config,
            device,
            placement: PlacementTable::with_defaults(),
            ruhs,
            attach_lock: Mutex::new(()),
            attached: OnceLock::new(),
        })
    }

    /// Opens the configured device path and builds a facade over it.
    pub fn from_config(config: NvmeConfig) -> NvmefsResult<Self> {
        let device = BlockFileDevice::open(
            Path::new(&config.device_path),
            config.namespace_id,
            BlockFileOptions {
                lba_size: 4096,
                lba_count: 0,
                direct_io: config.direct_io,
                placement_handles: config.placement_handles as u16,
            },
        )?;
        Self::new(config, Arc::new(device))
    }

    /// Filesystem name, as reported to the engine's registry.
    pub fn name(&self) -> &str {
        "NvmeFileSystem"
    }

    /// Whether this filesystem is responsible for `path`.
    pub fn can_handle(&self, path: &str) -> bool {
        path.starts_with(NVMEFS_PATH_PREFIX)
    }

    /// The device backing this filesystem.
    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    /// Namespace geometry.
    pub fn geometry(&self) -> DeviceGeometry {
        self.device.geometry()
    }

    /// Device I/O counters.
    pub fn io_stats(&self) -> IoStats {
        self.device.stats()
    }

    /// Opens a path, attaching (or initialising) the database layout when
    /// needed.
    ///
    /// The reserved metadata path yields a raw LBA-addressed handle and
    /// never touches the superblock. Any other path requires a superblock:
    /// one is created when the path is a database file and the namespace is
    /// unformatted, otherwise the open fails with `NoDatabaseAttached`.
    pub fn open(&self, path: &str, flags: OpenFlags) -> NvmefsResult<NvmeFileHandle> {
        if !self.can_handle(path) {
            return Err(NvmefsError::InvalidPath {
                path: path.to_string(),
                reason: format!("missing {NVMEFS_PATH_PREFIX} scheme"),
            });
        }
        let class = FileClass::classify(path)?;
        if class == FileClass::Metadata {
            return Ok(NvmeFileHandle::new(path.to_string(), class, flags));
        }

        let attached = self.attach_for_open(path, class)?;
        match class {
            FileClass::Database => {
                if strip_scheme(path) != attached.db_path {
                    return Err(NvmefsError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("database {} is already attached", attached.db_path),
                    });
                }
            }
            FileClass::Wal => {
                if !strip_scheme(path).starts_with(attached.db_path.as_str()) {
                    return Err(NvmefsError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("WAL does not belong to database {}", attached.db_path),
                    });
                }
            }
            FileClass::Temporary => {
                if flags.create {
                    attached.temp.create(path)?;
                }
            }
            FileClass::Metadata => unreachable!("handled above"),
        }

        Ok(NvmeFileHandle::new(path.to_string(), class, flags))
    }

    /// Reads `buffer.len()` bytes at `location` (plus the handle cursor).
    /// Returns the number of bytes read.
    pub fn read(
        &self,
        handle: &NvmeFileHandle,
        buffer: &mut [u8],
        location: u64,
    ) -> NvmefsResult<u64> {
        let nr_bytes = buffer.len() as u64;
        if nr_bytes == 0 {
            return Ok(0);
        }
        let offset = handle.cursor_offset() + location;
        let ctx = self.build_ctx(handle, offset, nr_bytes, false)?;
        self.device.read(buffer, &ctx)?;
        Ok(nr_bytes)
    }

    /// Reads from the cursor position.
    pub fn read_from_cursor(
        &self,
        handle: &NvmeFileHandle,
        buffer: &mut [u8],
    ) -> NvmefsResult<u64> {
        self.read(handle, buffer, 0)
    }

    /// Writes `buffer.len()` bytes at `location` (plus the handle cursor),
    /// then advances the region frontier. Returns the number of bytes
    /// written.
    pub fn write(
        &self,
        handle: &NvmeFileHandle,
        buffer: &[u8],
        location: u64,
    ) -> NvmefsResult<u64> {
        let nr_bytes = buffer.len() as u64;
        if nr_bytes == 0 {
            return Ok(0);
        }
        let offset = handle.cursor_offset() + location;
        let ctx = self.build_ctx(handle, offset, nr_bytes, true)?;
        self.device.write(buffer, &ctx)?;

        // The frontier only moves once the device acknowledged the write.
        let end = ctx.start_lba + ctx.nr_lbas;
        match handle.class() {
            FileClass::Database => {
                let attached = self.attached_or_err(handle.path())?;
                attached.db_location.fetch_max(end, Ordering::AcqRel);
            }
            FileClass::Wal => {
                let attached = self.attached_or_err(handle.path())?;
                attached.wal_location.fetch_max(end, Ordering::AcqRel);
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(handle.path())?;
                attached.temp.infer_block_size(handle.path(), nr_bytes)?;
                attached.temp.move_lba_location(handle.path(), end)?;
            }
            FileClass::Metadata => {}
        }
        Ok(nr_bytes)
    }

    /// Writes at the cursor position.
    pub fn write_from_cursor(&self, handle: &NvmeFileHandle, buffer: &[u8]) -> NvmefsResult<u64> {
        self.write(handle, buffer, 0)
    }

    /// Current size of the file behind `handle`, derived from the region
    /// frontier (database, WAL) or the temporary file table.
    pub fn get_file_size(&self, handle: &NvmeFileHandle) -> NvmefsResult<u64> {
        let geometry = self.device.geometry();
        match handle.class() {
            FileClass::Database => {
                let attached = self.attached_or_err(handle.path())?;
                let frontier = attached.db_location.load(Ordering::Acquire);
                Ok((frontier - attached.db_start) * geometry.lba_size)
            }
            FileClass::Wal => {
                let attached = self.attached_or_err(handle.path())?;
                let frontier = attached.wal_location.load(Ordering::Acquire);
                Ok((frontier - attached.wal_start) * geometry.lba_size)
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(handle.path())?;
                if !attached.temp.file_exists(handle.path()) {
                    return Ok(0);
                }
                Ok(attached.temp.file_size_lbas(handle.path())? * geometry.lba_size)
            }
            FileClass::Metadata => Ok(geometry.lba_size),
        }
    }

    /// Positions the handle cursor. The location must be LBA-aligned and
    /// strictly below the file's bound: the region capacity for database and
    /// WAL files, the live size for temporary files.
    pub fn seek(&self, handle: &mut NvmeFileHandle, location: u64) -> NvmefsResult<()> {
        let geometry = self.device.geometry();
        if location % geometry.lba_size != 0 {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "seek to {location} is not aligned to the {}-byte LBA size",
                    geometry.lba_size
                ),
            });
        }

        let (region_start, bound_bytes) = match handle.class() {
            FileClass::Metadata => (0, geometry.capacity_bytes()),
            FileClass::Database => {
                let attached = self.attached_or_err(handle.path())?;
                (
                    attached.db_start,
                    (attached.wal_start - attached.db_start) * geometry.lba_size,
                )
            }
            FileClass::Wal => {
                let attached = self.attached_or_err(handle.path())?;
                (
                    attached.wal_start,
                    (attached.tmp_start - attached.wal_start) * geometry.lba_size,
                )
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(handle.path())?;
                (0, attached.temp.seek_bound(handle.path())?)
            }
        };

        if location != 0 && location >= bound_bytes {
            return Err(NvmefsError::OutOfRange {
                start_lba: region_start + location / geometry.lba_size,
                nr_lbas: 1,
                region_start,
                region_end: region_start + bound_bytes.div_ceil(geometry.lba_size),
            });
        }

        handle.set_cursor(location);
        Ok(())
    }

    /// Current cursor position of the handle.
    pub fn seek_position(&self, handle: &NvmeFileHandle) -> u64 {
        handle.cursor_offset()
    }

    /// Shrinks the file to `new_size` bytes. Growing fails with
    /// `InvalidArgument`. Database and WAL frontiers move down by CAS; a
    /// temporary file keeps its extent.
    pub fn truncate(&self, handle: &NvmeFileHandle, new_size: u64) -> NvmefsResult<()> {
        let geometry = self.device.geometry();
        match handle.class() {
            FileClass::Database => {
                let attached = self.attached_or_err(handle.path())?;
                truncate_frontier(&attached.db_location, attached.db_start, new_size, geometry)
            }
            FileClass::Wal => {
                let attached = self.attached_or_err(handle.path())?;
                truncate_frontier(&attached.wal_location, attached.wal_start, new_size, geometry)
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(handle.path())?;
                attached.temp.truncate(handle.path(), new_size)
            }
            FileClass::Metadata => Err(NvmefsError::Unsupported {
                operation: "truncate of the metadata handle".to_string(),
            }),
        }
    }

    /// Deallocates `[offset, offset + len)` by writing zeroes.
    pub fn trim(&self, handle: &NvmeFileHandle, offset: u64, len: u64) -> NvmefsResult<()> {
        if len == 0 {
            return Ok(());
        }
        let zeroes = vec![0u8; len as usize];
        self.write(handle, &zeroes, offset)?;
        Ok(())
    }

    /// Persists the superblock. Data writes are already durable on the
    /// device; only the layout record needs refreshing.
    pub fn file_sync(&self, _handle: &NvmeFileHandle) -> NvmefsResult<()> {
        if let Some(attached) = self.attached.get() {
            let superblock = self.snapshot_superblock(attached);
            self.persist_superblock(&superblock)?;
        }
        Ok(())
    }

    /// Whether the handle refers to on-device storage. Always true here.
    pub fn on_disk_file(&self, _handle: &NvmeFileHandle) -> bool {
        true
    }

    /// Whether `path` refers to an existing file.
    ///
    /// A database file exists once data has been written to it; the WAL
    /// exists whenever a database is attached; temporary files exist while
    /// their metadata entry is live. Addressing a second database is an
    /// error.
    pub fn file_exists(&self, path: &str) -> NvmefsResult<bool> {
        let class = FileClass::classify(path)?;
        let Some(attached) = self.try_attach_existing()? else {
            return Ok(false);
        };
        match class {
            FileClass::Database => {
                if strip_scheme(path) != attached.db_path {
                    return Err(NvmefsError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("database {} is already attached", attached.db_path),
                    });
                }
                Ok(attached.db_location.load(Ordering::Acquire) > attached.db_start)
            }
            FileClass::Wal => Ok(true),
            FileClass::Temporary => Ok(attached.temp.file_exists(path)),
            FileClass::Metadata => Ok(true),
        }
    }

    /// Whether `directory` exists: only the `/tmp` pseudo-directory does,
    /// and only once a database is attached.
    pub fn directory_exists(&self, directory: &str) -> NvmefsResult<bool> {
        if self.try_attach_existing()?.is_none() {
            return Ok(false);
        }
        Ok(is_temp_dir(directory))
    }

    /// Creates a directory. The flat namespace only accepts `/tmp`, which
    /// already exists, so this is a validated no-op.
    pub fn create_directory(&self, directory: &str) -> NvmefsResult<()> {
        self.attached_or_err(directory)?;
        if is_temp_dir(directory) {
            Ok(())
        } else {
            Err(NvmefsError::Unsupported {
                operation: format!("create_directory {directory}"),
            })
        }
    }

    /// Removes `/tmp`, deleting every temporary file. Other directories are
    /// unsupported.
    pub fn remove_directory(&self, directory: &str) -> NvmefsResult<()> {
        if !is_temp_dir(directory) {
            return Err(NvmefsError::Unsupported {
                operation: format!("remove_directory {directory}"),
            });
        }
        let attached = self.attached_or_err(directory)?;
        attached.temp.clear();
        info!(directory, "temporary directory cleared");
        Ok(())
    }

    /// Removes a file. The WAL is reset to its region start, temporary
    /// files are deleted, a database file is left in place.
    pub fn remove_file(&self, path: &str) -> NvmefsResult<()> {
        let class = FileClass::classify(path)?;
        match class {
            FileClass::Wal => {
                let attached = self.attached_or_err(path)?;
                attached
                    .wal_location
                    .store(attached.wal_start, Ordering::Release);
                info!(path, wal_start = attached.wal_start, "WAL reset");
                Ok(())
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(path)?;
                attached.temp.delete(path)
            }
            FileClass::Database => {
                debug!(path, "remove_file on the database path is a no-op");
                Ok(())
            }
            FileClass::Metadata => Err(NvmefsError::Unsupported {
                operation: "remove_file of the metadata handle".to_string(),
            }),
        }
    }

    /// Invokes `callback` for every file in `directory` (only `/tmp` is
    /// listable).
    pub fn list_files<F>(&self, directory: &str, callback: F) -> NvmefsResult<()>
    where
        F: FnMut(&str, bool),
    {
        if !is_temp_dir(directory) {
            return Err(NvmefsError::Unsupported {
                operation: format!("list_files {directory}"),
            });
        }
        let attached = self.attached_or_err(directory)?;
        attached.temp.list_files(directory, callback);
        Ok(())
    }

    /// Bytes still available to temporary files.
    pub fn get_available_disk_space(&self) -> NvmefsResult<u64> {
        let attached = self.attached_or_err(TEMP_DIR_PATH)?;
        let geometry = self.device.geometry();
        Ok(attached
            .temp
            .available_space(geometry.lba_count, attached.tmp_start))
    }

    /// Translates a byte offset to an LBA for the handle's class and builds
    /// the command context, enforcing the region range check and the
    /// single-LBA rule for sub-block access.
    fn build_ctx(
        &self,
        handle: &NvmeFileHandle,
        offset: u64,
        nr_bytes: u64,
        create_temp: bool,
    ) -> NvmefsResult<CmdContext> {
        let geometry = self.device.geometry();
        let in_block_offset = offset % geometry.lba_size;
        if in_block_offset != 0 && in_block_offset + nr_bytes > geometry.lba_size {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "{nr_bytes} bytes at in-block offset {in_block_offset} straddle an LBA boundary"
                ),
            });
        }
        let nr_lbas = geometry.lbas_for(nr_bytes);

        let start_lba = match handle.class() {
            FileClass::Metadata => {
                let lba = offset / geometry.lba_size;
                if lba + nr_lbas > geometry.lba_count {
                    return Err(NvmefsError::OutOfRange {
                        start_lba: lba,
                        nr_lbas,
                        region_start: 0,
                        region_end: geometry.lba_count - 1,
                    });
                }
                lba
            }
            FileClass::Database | FileClass::Wal => {
                let attached = self.attached_or_err(handle.path())?;
                let (region_start, region_end) = match handle.class() {
                    FileClass::Database => (attached.db_start, attached.wal_start - 1),
                    _ => (attached.wal_start, attached.tmp_start - 1),
                };
                let lba = region_start + offset / geometry.lba_size;
                if lba + nr_lbas - 1 > region_end {
                    return Err(NvmefsError::OutOfRange {
                        start_lba: lba,
                        nr_lbas,
                        region_start,
                        region_end,
                    });
                }
                lba
            }
            FileClass::Temporary => {
                let attached = self.attached_or_err(handle.path())?;
                if create_temp && !attached.temp.file_exists(handle.path()) {
                    attached.temp.create(handle.path())?;
                }
                attached.temp.get_lba(handle.path(), offset, nr_lbas)?
            }
        };

        Ok(CmdContext {
            nsid: self.device.namespace_id(),
            start_lba,
            nr_lbas,
            nr_bytes,
            in_block_offset,
            placement: self.placement_for(handle.path()),
        })
    }

    fn placement_for(&self, path: &str) -> PlacementId {
        let index = self.placement.handle_index(path);
        PlacementId(self.ruhs.get(index).copied().unwrap_or(0))
    }

    /// Returns the attached state, loading the superblock from the device
    /// if a previous session formatted it.
    fn try_attach_existing(&self) -> NvmefsResult<Option<&Attached>> {
        if let Some(attached) = self.attached.get() {
            return Ok(Some(attached));
        }
        let _guard = self.attach_lock.lock().expect("attach lock poisoned");
        if let Some(attached) = self.attached.get() {
            return Ok(Some(attached));
        }
        match self.read_superblock()? {
            Some(superblock) => {
                superblock.validate(self.device.geometry())?;
                info!(
                    db_path = %superblock.db_path,
                    wal_start = superblock.wal_start,
                    tmp_start = superblock.tmp_start,
                    "superblock loaded"
                );
                let _ = self.attached.set(self.build_attached(superblock));
                Ok(self.attached.get())
            }
            None => Ok(None),
        }
    }

    /// Like [`try_attach_existing`], but initialises a fresh layout when the
    /// namespace is unformatted and the open targets a database file.
    fn attach_for_open(&self, path: &str, class: FileClass) -> NvmefsResult<&Attached> {
        if let Some(attached) = self.try_attach_existing()? {
            return Ok(attached);
        }
        if class != FileClass::Database {
            return Err(NvmefsError::NoDatabaseAttached {
                path: path.to_string(),
            });
        }

        let _guard = self.attach_lock.lock().expect("attach lock poisoned");
        if let Some(attached) = self.attached.get() {
            return Ok(attached);
        }

        let db_path = strip_scheme(path);
        let superblock = Superblock::initial(self.device.geometry(), &self.config, db_path)?;
        self.persist_superblock(&superblock)?;
        info!(
            db_path,
            wal_start = superblock.wal_start,
            tmp_start = superblock.tmp_start,
            "database attached, superblock initialised"
        );
        let _ = self.attached.set(self.build_attached(superblock));
        Ok(self.attached.get().expect("attached state just set"))
    }

    fn attached_or_err(&self, path: &str) -> NvmefsResult<&Attached> {
        self.try_attach_existing()?
            .ok_or_else(|| NvmefsError::NoDatabaseAttached {
                path: path.to_string(),
            })
    }

    fn build_attached(&self, superblock: Superblock) -> Attached {
        let geometry = self.device.geometry();
        Attached {
            db_path: superblock.db_path,
            db_start: superblock.db_start,
            wal_start: superblock.wal_start,
            tmp_start: superblock.tmp_start,
            db_location: AtomicU64::new(superblock.db_location),
            wal_location: AtomicU64::new(superblock.wal_location),
            temp: TempFileManager::new(
                superblock.tmp_start,
                geometry.lba_count,
                geometry.lba_size,
            ),
        }
    }

    fn snapshot_superblock(&self, attached: &Attached) -> Superblock {
        Superblock {
            db_start: attached.db_start,
            wal_start: attached.wal_start,
            tmp_start: attached.tmp_start,
            db_location: attached.db_location.load(Ordering::Acquire),
            wal_location: attached.wal_location.load(Ordering::Acquire),
            db_path: attached.db_path.clone(),
        }
    }

    fn read_superblock(&self) -> NvmefsResult<Option<Superblock>> {
        let geometry = self.device.geometry();
        let mut buffer = vec![0u8; geometry.lba_size as usize];
        let ctx = CmdContext::for_transfer(
            self.device.namespace_id(),
            geometry,
            SUPERBLOCK_LBA,
            geometry.lba_size,
            0,
            self.placement_for(GLOBAL_METADATA_PATH),
        );
        self.device.read(&mut buffer, &ctx)?;
        Superblock::from_bytes(&buffer)
    }

    fn persist_superblock(&self, superblock: &Superblock) -> NvmefsResult<()> {
        let geometry = self.device.geometry();
        let record = superblock.to_bytes()?;
        let mut buffer = vec![0u8; geometry.lba_size as usize];
        buffer[..SUPERBLOCK_BYTES].copy_from_slice(&record);
        let ctx = CmdContext::for_transfer(
            self.device.namespace_id(),
            geometry,
            SUPERBLOCK_LBA,
            geometry.lba_size,
            0,
            self.placement_for(GLOBAL_METADATA_PATH),
        );
        self.device.write(&buffer, &ctx)?;
        debug!(
            db_location = superblock.db_location,
            wal_location = superblock.wal_location,
            "superblock persisted"
        );
        Ok(())
    }
}

impl Drop for NvmeFileSystem {
    fn drop(&mut self) {
        if let Some(attached) = self.attached.get() {
            let superblock = self.snapshot_superblock(attached);
            if let Err(err) = self.persist_superblock(&superblock) {
                warn!(%err, "failed to persist superblock on shutdown");
            }
        }
    }
}

/// Monotonic downward frontier update for truncate.
fn truncate_frontier(
    frontier: &AtomicU64,
    region_start: u64,
    new_size: u64,
    geometry: DeviceGeometry,
) -> NvmefsResult<()> {
    let target = region_start + geometry.lbas_for(new_size);
    let mut current = frontier.load(Ordering::Acquire);
    loop {
        if target > current {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "truncate to {new_size} bytes grows a file of {} LBAs",
                    current - region_start
                ),
            });
        }
        if target == current {
            return Ok(());
        }
        match frontier.compare_exchange_weak(current, target, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return Ok(()),
            Err(observed) => current = observed,
        }
    }
}

fn strip_scheme(path: &str) -> &str {
    path.strip_prefix(NVMEFS_PATH_PREFIX).unwrap_or(path)
}

fn is_temp_dir(directory: &str) -> bool {
    directory == TEMP_DIR_PATH || directory.contains("/tmp")
}
