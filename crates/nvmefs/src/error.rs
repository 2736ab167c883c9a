//! Error types for the NVMe filesystem layer.

use thiserror::Error;

/// Result type alias for filesystem operations.
pub type NvmefsResult<T> = Result<T, NvmefsError>;

/// Error variants for filesystem operations.
///
/// No variant is recovered internally; every error bubbles out of the
/// facade operation that triggered it. Region frontiers are never advanced
/// on the error path.
#[derive(Debug, Error)]
pub enum NvmefsError {
    /// The device driver reported a failure. Fatal for the current
    /// operation; the target bytes are undefined.
    #[error("device I/O error: {reason}")]
    DeviceIo {
        /// Description of the driver failure.
        reason: String,
    },

    /// An LBA range crosses a region boundary, or a seek went past the
    /// region cap.
    #[error(
        "LBA range [{start_lba}, {start_lba}+{nr_lbas}) outside region [{region_start}, {region_end}]"
    )]
    OutOfRange {
        /// First LBA of the offending range.
        start_lba: u64,
        /// Number of LBAs in the offending range.
        nr_lbas: u64,
        /// First LBA of the region the range was checked against.
        region_start: u64,
        /// Last LBA (inclusive) of the region the range was checked against.
        region_end: u64,
    },

    /// The temporary block manager has no single free extent large enough.
    #[error("out of space: no free extent of {requested_lbas} LBAs in the temporary region")]
    OutOfSpace {
        /// Number of LBAs that could not be allocated.
        requested_lbas: u64,
    },

    /// Operation on a non-database path while no superblock exists on the
    /// device.
    #[error("no database attached: cannot resolve {path}")]
    NoDatabaseAttached {
        /// The path whose resolution required an attached database.
        path: String,
    },

    /// The path does not classify as database, WAL or temporary, or a
    /// second database was addressed.
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A caller-supplied argument violates an alignment or size constraint.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the violated constraint.
        reason: String,
    },

    /// The operation is not supported by this filesystem.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: String,
    },
}

impl From<std::io::Error> for NvmefsError {
    fn from(err: std::io::Error) -> Self {
        NvmefsError::DeviceIo {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NvmefsError::OutOfRange {
            start_lba: 100,
            nr_lbas: 4,
            region_start: 1,
            region_end: 99,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("[1, 99]"));

        let err = NvmefsError::OutOfSpace { requested_lbas: 8 };
        assert!(err.to_string().contains("8 LBAs"));
    }

    #[test]
    fn test_io_error_maps_to_device_io() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "short read");
        let err: NvmefsError = io.into();
        assert!(matches!(err, NvmefsError::DeviceIo { .. }));
        assert!(err.to_string().contains("short read"));
    }
}
