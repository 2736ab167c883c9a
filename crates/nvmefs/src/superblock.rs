//! On-device superblock: the persistent layout descriptor at LBA 0.
//!
//! The record is a fixed-offset little-endian packing, independent of host
//! struct layout. It is rewritten on `file_sync` and on orderly shutdown;
//! the persisted write frontiers conservatively under-report in-memory
//! progress between syncs.

use tracing::debug;

use crate::config::NvmeConfig;
use crate::device::DeviceGeometry;
use crate::error::{NvmefsError, NvmefsResult};

/// Magic bytes identifying a formatted namespace.
pub const SUPERBLOCK_MAGIC: &[u8; 6] = b"NVMEFS";
/// LBA holding the superblock.
pub const SUPERBLOCK_LBA: u64 = 0;
/// Maximum length of the attached database path, in bytes.
pub const MAX_DB_PATH_LEN: usize = 100;

/// Size of the NUL-terminated path field.
const DB_PATH_FIELD: usize = MAX_DB_PATH_LEN + 1;
/// Serialized size: magic, six u64 fields, path field.
pub const SUPERBLOCK_BYTES: usize = 6 + 6 * 8 + DB_PATH_FIELD;

/// The on-device layout descriptor.
///
/// Region invariants: `1 = db_start < wal_start <= tmp_start < lba_count`,
/// `db_start <= db_location <= wal_start` and
/// `wal_start <= wal_location <= tmp_start`. The three regions are disjoint
/// and cover `[1, lba_count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// First LBA of the database region; always 1.
    pub db_start: u64,
    /// First LBA of the write-ahead-log region.
    pub wal_start: u64,
    /// First LBA of the temporary region.
    pub tmp_start: u64,
    /// Database write frontier: next LBA to write.
    pub db_location: u64,
    /// WAL write frontier: next LBA to write.
    pub wal_location: u64,
    /// Path of the single attached database (without the URI scheme).
    pub db_path: String,
}

impl Superblock {
    /// Computes the first-attach layout for a device and configuration.
    ///
    /// The temporary region is carved from the top of the namespace, the WAL
    /// region directly below it, and the database takes the remainder above
    /// LBA 0.
    pub fn initial(
        geometry: DeviceGeometry,
        config: &NvmeConfig,
        db_path: &str,
    ) -> NvmefsResult<Superblock> {
        if db_path.len() > MAX_DB_PATH_LEN {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "database path of {} bytes exceeds the {MAX_DB_PATH_LEN}-byte limit",
                    db_path.len()
                ),
            });
        }

        let tmp_lbas = config.max_temp_size / geometry.lba_size;
        let wal_lbas = config.max_wal_size / geometry.lba_size;
        let tmp_start = geometry
            .lba_count
            .checked_sub(tmp_lbas)
            .ok_or_else(|| too_small(geometry, config))?;
        let wal_start = tmp_start
            .checked_sub(wal_lbas)
            .ok_or_else(|| too_small(geometry, config))?;
        if wal_start <= 1 {
            return Err(too_small(geometry, config));
        }

        debug!(
            db_path,
            wal_start, tmp_start, "initial superblock layout computed"
        );

        Ok(Superblock {
            db_start: 1,
            wal_start,
            tmp_start,
            db_location: 1,
            wal_location: wal_start,
            db_path: db_path.to_string(),
        })
    }

    /// Checks the region invariants against the device geometry.
    pub fn validate(&self, geometry: DeviceGeometry) -> NvmefsResult<()> {
        let ordered = self.db_start == 1
            && self.db_start < self.wal_start
            && self.wal_start <= self.tmp_start
            && self.tmp_start < geometry.lba_count;
        let frontiers = self.db_start <= self.db_location
            && self.db_location <= self.wal_start
            && self.wal_start <= self.wal_location
            && self.wal_location <= self.tmp_start;
        if !ordered || !frontiers {
            return Err(NvmefsError::DeviceIo {
                reason: format!(
                    "superblock layout inconsistent: db={} wal={} tmp={} db_loc={} wal_loc={} lbas={}",
                    self.db_start,
                    self.wal_start,
                    self.tmp_start,
                    self.db_location,
                    self.wal_location,
                    geometry.lba_count
                ),
            });
        }
        Ok(())
    }

    /// Serializes the record into its fixed little-endian layout.
    pub fn to_bytes(&self) -> NvmefsResult<[u8; SUPERBLOCK_BYTES]> {
        if self.db_path.len() > MAX_DB_PATH_LEN {
            return Err(NvmefsError::InvalidArgument {
                reason: format!(
                    "database path of {} bytes exceeds the {MAX_DB_PATH_LEN}-byte limit",
                    self.db_path.len()
                ),
            });
        }

        let mut out = [0u8; SUPERBLOCK_BYTES];
        out[0..6].copy_from_slice(SUPERBLOCK_MAGIC);
        out[6..14].copy_from_slice(&self.db_start.to_le_bytes());
        out[14..22].copy_from_slice(&self.wal_start.to_le_bytes());
        out[22..30].copy_from_slice(&self.tmp_start.to_le_bytes());
        out[30..38].copy_from_slice(&self.db_location.to_le_bytes());
        out[38..46].copy_from_slice(&self.wal_location.to_le_bytes());
        out[46..54].copy_from_slice(&(self.db_path.len() as u64).to_le_bytes());
        out[54..54 + self.db_path.len()].copy_from_slice(self.db_path.as_bytes());
        // Path field is already NUL padded.
        Ok(out)
    }

    /// Deserializes a record. Returns `None` when the magic does not match
    /// (i.e. the namespace is unformatted), an error when the record is
    /// malformed despite a valid magic.
    pub fn from_bytes(data: &[u8]) -> NvmefsResult<Option<Superblock>> {
        if data.len() < SUPERBLOCK_BYTES {
            return Err(NvmefsError::DeviceIo {
                reason: format!(
                    "superblock buffer of {} bytes, need {SUPERBLOCK_BYTES}",
                    data.len()
                ),
            });
        }
        if &data[0..6] != SUPERBLOCK_MAGIC {
            return Ok(None);
        }

        let read_u64 = |offset: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&data[offset..offset + 8]);
            u64::from_le_bytes(raw)
        };

        let db_path_size = read_u64(46) as usize;
        if db_path_size > MAX_DB_PATH_LEN {
            return Err(NvmefsError::DeviceIo {
                reason: format!("superblock path length {db_path_size} out of bounds"),
            });
        }
        let db_path = std::str::from_utf8(&data[54..54 + db_path_size])
            .map_err(|_| NvmefsError::DeviceIo {
                reason: "superblock path is not valid UTF-8".to_string(),
            })?
            .to_string();

        Ok(Some(Superblock {
            db_start: read_u64(6),
            wal_start: read_u64(14),
            tmp_start: read_u64(22),
            db_location: read_u64(30),
            wal_location: read_u64(38),
            db_path,
        }))
    }
}

fn too_small(geometry: DeviceGeometry, config: &NvmeConfig) -> NvmefsError {
    NvmefsError::InvalidArgument {
        reason: format!(
            "namespace of {} LBAs cannot hold temp={} and WAL={} bytes plus a database region",
            geometry.lba_count, config.max_temp_size, config.max_wal_size
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEO: DeviceGeometry = DeviceGeometry {
        lba_size: 4096,
        lba_count: 262144,
    };

    fn test_config() -> NvmeConfig {
        NvmeConfig {
            max_temp_size: 40 << 20,
            max_wal_size: 32 << 20,
            ..NvmeConfig::default()
        }
    }

    #[test]
    fn test_initial_layout() {
        let sb = Superblock::initial(GEO, &test_config(), "app.db").unwrap();

        assert_eq!(sb.db_start, 1);
        assert_eq!(sb.tmp_start, 262144 - 10240);
        assert_eq!(sb.wal_start, 251904 - 8192);
        assert_eq!(sb.db_location, 1);
        assert_eq!(sb.wal_location, sb.wal_start);
        assert_eq!(sb.db_path, "app.db");
        sb.validate(GEO).unwrap();
    }

    #[test]
    fn test_initial_rejects_long_path() {
        let ok = "x".repeat(100);
        assert!(Superblock::initial(GEO, &test_config(), &ok).is_ok());

        let long = "x".repeat(101);
        let err = Superblock::initial(GEO, &test_config(), &long).unwrap_err();
        assert!(matches!(err, NvmefsError::InvalidArgument { .. }));
    }

    #[test]
    fn test_initial_rejects_tiny_device() {
        let tiny = DeviceGeometry {
            lba_size: 4096,
            lba_count: 64,
        };
        let err = Superblock::initial(tiny, &test_config(), "app.db").unwrap_err();
        assert!(matches!(err, NvmefsError::InvalidArgument { .. }));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let sb = Superblock {
            db_start: 1,
            wal_start: 243712,
            tmp_start: 251904,
            db_location: 17,
            wal_location: 243800,
            db_path: "app.db".to_string(),
        };

        let bytes = sb.to_bytes().unwrap();
        assert_eq!(bytes.len(), SUPERBLOCK_BYTES);
        assert_eq!(&bytes[0..6], SUPERBLOCK_MAGIC);

        let sb2 = Superblock::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(sb, sb2);
    }

    #[test]
    fn test_field_offsets_are_fixed() {
        let sb = Superblock {
            db_start: 0x0102030405060708,
            wal_start: 2,
            tmp_start: 3,
            db_location: 4,
            wal_location: 5,
            db_path: "a".to_string(),
        };
        let bytes = sb.to_bytes().unwrap();

        assert_eq!(bytes[6], 0x08);
        assert_eq!(bytes[13], 0x01);
        assert_eq!(bytes[14], 2);
        assert_eq!(bytes[22], 3);
        assert_eq!(bytes[30], 4);
        assert_eq!(bytes[38], 5);
        assert_eq!(bytes[46], 1);
        assert_eq!(bytes[54], b'a');
        assert_eq!(bytes[55], 0);
    }

    #[test]
    fn test_bad_magic_reads_as_unformatted() {
        let zeroes = vec![0u8; SUPERBLOCK_BYTES];
        assert!(Superblock::from_bytes(&zeroes).unwrap().is_none());

        let mut garbage = vec![0u8; SUPERBLOCK_BYTES];
        garbage[0..6].copy_from_slice(b"NOTAFS");
        assert!(Superblock::from_bytes(&garbage).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_path_length_fails() {
        let sb = Superblock::initial(GEO, &test_config(), "app.db").unwrap();
        let mut bytes = sb.to_bytes().unwrap();
        bytes[46..54].copy_from_slice(&1000u64.to_le_bytes());
        assert!(Superblock::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_validate_rejects_regressed_frontier() {
        let mut sb = Superblock::initial(GEO, &test_config(), "app.db").unwrap();
        sb.wal_location = sb.wal_start - 1;
        assert!(sb.validate(GEO).is_err());
    }
}
