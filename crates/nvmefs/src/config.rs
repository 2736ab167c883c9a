//! Filesystem configuration.
//!
//! Configuration values arrive from the embedding database engine (secrets,
//! settings or CLI); this module only defines the record they land in and the
//! defaults that mirror a production single-drive setup.

use serde::{Deserialize, Serialize};

/// Configuration for an [`NvmeFileSystem`](crate::NvmeFileSystem) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvmeConfig {
    /// Path to the NVMe namespace character/block device (e.g. "/dev/ng0n1").
    pub device_path: String,
    /// NVMe namespace identifier carried in every command.
    pub namespace_id: u32,
    /// Number of FDP placement handles available on the namespace.
    pub placement_handles: u64,
    /// Capacity cap of the temporary region in bytes.
    pub max_temp_size: u64,
    /// Capacity cap of the write-ahead-log region in bytes.
    pub max_wal_size: u64,
    /// Whether to open the device with `O_DIRECT`, bypassing the page cache.
    pub direct_io: bool,
}

impl Default for NvmeConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/nvme0n1".to_string(),
            namespace_id: 1,
            placement_handles: 8,
            max_temp_size: 200 << 30,
            max_wal_size: 1 << 25,
            direct_io: true,
        }
    }
}
