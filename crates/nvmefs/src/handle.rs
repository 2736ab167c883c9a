//! File handles and path classification.

use serde::{Deserialize, Serialize};

use crate::error::{NvmefsError, NvmefsResult};

/// URI scheme prefix handled by this filesystem.
pub const NVMEFS_PATH_PREFIX: &str = "nvmefs://";

/// The single flat pseudo-directory holding temporary files.
pub const TEMP_DIR_PATH: &str = "nvmefs:///tmp";

/// Reserved path whose handle bypasses region routing and addresses raw
/// LBAs, used for superblock I/O.
pub const GLOBAL_METADATA_PATH: &str = "nvmefs:///metadata";

/// Region a path resolves to, derived purely from the path text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileClass {
    /// The attached database file.
    Database,
    /// The database's write-ahead log.
    Wal,
    /// A file under the `/tmp` pseudo-directory.
    Temporary,
    /// The raw metadata handle (LBA-addressed, no region translation).
    Metadata,
}

impl FileClass {
    /// Classifies a path. The match order is significant: a WAL marker wins
    /// over everything, the temp directory wins over a `.db` infix (DuckDB
    /// temp paths can live under `<db>/tmp/`).
    pub fn classify(path: &str) -> NvmefsResult<FileClass> {
        if path == GLOBAL_METADATA_PATH {
            Ok(FileClass::Metadata)
        } else if path.contains(".wal") {
            Ok(FileClass::Wal)
        } else if path.contains("/tmp") {
            Ok(FileClass::Temporary)
        } else if path.contains(".db") {
            Ok(FileClass::Database)
        } else {
            Err(NvmefsError::InvalidPath {
                path: path.to_string(),
                reason: "no database, WAL or temporary marker".to_string(),
            })
        }
    }
}

/// Open flags carried by a file handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it does not exist (temporary files only).
    pub create: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub const READ: OpenFlags = OpenFlags {
        read: true,
        write: false,
        create: false,
    };

    /// Read-write access.
    pub const READ_WRITE: OpenFlags = OpenFlags {
        read: true,
        write: true,
        create: false,
    };

    /// Adds the create flag.
    pub fn with_create(mut self) -> Self {
        self.create = true;
        self
    }
}

/// A per-open handle: path, classification and a seek cursor.
///
/// Handles own no device resources. The cursor starts at zero and moves only
/// through [`NvmeFileSystem::seek`](crate::NvmeFileSystem::seek); it is added
/// to the offset of every read and write issued through the handle.
#[derive(Debug, Clone)]
pub struct NvmeFileHandle {
    path: String,
    class: FileClass,
    flags: OpenFlags,
    cursor_offset: u64,
}

impl NvmeFileHandle {
    pub(crate) fn new(path: String, class: FileClass, flags: OpenFlags) -> Self {
        Self {
            path,
            class,
            flags,
            cursor_offset: 0,
        }
    }

    /// The path this handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The region class the path resolved to at open.
    pub fn class(&self) -> FileClass {
        self.class
    }

    /// The flags this handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current cursor position in bytes.
    pub fn cursor_offset(&self) -> u64 {
        self.cursor_offset
    }

    pub(crate) fn set_cursor(&mut self, offset: u64) {
        self.cursor_offset = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_database() {
        assert_eq!(
            FileClass::classify("nvmefs://app.db").unwrap(),
            FileClass::Database
        );
    }

    #[test]
    fn test_classify_wal_wins_over_db() {
        assert_eq!(
            FileClass::classify("nvmefs://app.db.wal").unwrap(),
            FileClass::Wal
        );
    }

    #[test]
    fn test_classify_tmp_wins_over_db() {
        assert_eq!(
            FileClass::classify("nvmefs://app.db/tmp/spill-0.tmp").unwrap(),
            FileClass::Temporary
        );
        assert_eq!(
            FileClass::classify("nvmefs:///tmp/file").unwrap(),
            FileClass::Temporary
        );
    }

    #[test]
    fn test_classify_metadata() {
        assert_eq!(
            FileClass::classify(GLOBAL_METADATA_PATH).unwrap(),
            FileClass::Metadata
        );
    }

    #[test]
    fn test_classify_unknown_fails() {
        let err = FileClass::classify("nvmefs://test").unwrap_err();
        assert!(matches!(err, NvmefsError::InvalidPath { .. }));
    }

    #[test]
    fn test_handle_cursor_starts_at_zero() {
        let handle = NvmeFileHandle::new(
            "nvmefs://app.db".to_string(),
            FileClass::Database,
            OpenFlags::READ_WRITE,
        );
        assert_eq!(handle.cursor_offset(), 0);
        assert_eq!(handle.path(), "nvmefs://app.db");
        assert!(handle.flags().write);
    }
}
