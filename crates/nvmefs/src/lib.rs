#![warn(missing_docs)]

//! NVMeFS: a user-space filesystem over a raw NVMe namespace.
//!
//! This crate projects a small, fixed set of logical files — one database
//! file, its write-ahead log and a flat `/tmp` pseudo-directory — onto
//! Logical Block Addresses of a single NVMe namespace, bypassing the kernel
//! page cache. Writes carry FDP (Flexible Data Placement) tags so the device
//! co-locates data with similar lifetimes. It serves as the storage backend
//! for an embedded analytical database engine.
//!
//! The namespace is partitioned into three disjoint regions described by a
//! superblock at LBA 0: database, WAL and temporary. Database and WAL writes
//! advance lock-free monotonic frontiers; temporary files are carved out of
//! their region as contiguous extents by a first-fit allocator.

pub mod config;
pub mod device;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod placement;
pub mod superblock;
pub mod temp_block;
pub mod temp_meta;

pub use config::NvmeConfig;
pub use device::{
    BlockFileDevice, BlockFileOptions, CmdContext, Device, DeviceGeometry, DmaBuffer, IoStats,
    MemoryDevice,
};
pub use error::{NvmefsError, NvmefsResult};
pub use filesystem::NvmeFileSystem;
pub use handle::{
    FileClass, NvmeFileHandle, OpenFlags, GLOBAL_METADATA_PATH, NVMEFS_PATH_PREFIX, TEMP_DIR_PATH,
};
pub use placement::{PlacementId, PlacementTable};
pub use superblock::{Superblock, MAX_DB_PATH_LEN, SUPERBLOCK_BYTES, SUPERBLOCK_LBA, SUPERBLOCK_MAGIC};
pub use temp_block::{TemporaryBlock, TemporaryBlockManager};
pub use temp_meta::{TempFileManager, TempFileMetadata, DEFAULT_TEMP_FILE_BLOCKS};
