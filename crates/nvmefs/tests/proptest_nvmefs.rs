//! Property-based tests for the NVMe filesystem layer.
//!
//! These verify the region-isolation, allocator and frontier invariants
//! under randomised workloads that unit tests do not reach.

use std::collections::HashMap;
use std::sync::Arc;

use nvmefs::{
    DeviceGeometry, MemoryDevice, NvmeConfig, NvmeFileSystem, OpenFlags, Superblock,
    TemporaryBlock, TemporaryBlockManager,
};
use proptest::prelude::*;

const LBA_SIZE: u64 = 4096;
const LBA_COUNT: u64 = 65536;

fn small_fs() -> NvmeFileSystem {
    let config = NvmeConfig {
        max_temp_size: 8 << 20,
        max_wal_size: 4 << 20,
        ..NvmeConfig::default()
    };
    let device = Arc::new(MemoryDevice::new(DeviceGeometry {
        lba_size: LBA_SIZE,
        lba_count: LBA_COUNT,
    }));
    NvmeFileSystem::new(config, device).unwrap()
}

/// Aligned offset within the first `blocks` LBAs.
fn aligned_offset(blocks: u64) -> impl Strategy<Value = u64> {
    (0..blocks).prop_map(|lba| lba * LBA_SIZE)
}

fn payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=3 * LBA_SIZE as usize)
}

proptest! {
    /// A successful write followed by a read of the same range returns the
    /// written bytes.
    #[test]
    fn prop_write_read_roundtrip(offset in aligned_offset(256), data in payload()) {
        let fs = small_fs();
        let db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();

        fs.write(&db, &data, offset).unwrap();

        let mut out = vec![0u8; data.len()];
        fs.read(&db, &mut out, offset).unwrap();
        prop_assert_eq!(out, data);
    }

    /// Interleaved writes to the three regions never corrupt each other.
    #[test]
    fn prop_region_isolation(
        db_data in payload(),
        wal_data in payload(),
        tmp_data in payload(),
        order in proptest::sample::select(vec![
            [0usize, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0],
        ]),
    ) {
        let fs = small_fs();
        let db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();
        let wal = fs.open("nvmefs://app.db.wal", OpenFlags::READ_WRITE).unwrap();
        let tmp = fs
            .open("nvmefs:///tmp/t0", OpenFlags::READ_WRITE.with_create())
            .unwrap();

        for target in order {
            match target {
                0 => { fs.write(&db, &db_data, 0).unwrap(); }
                1 => { fs.write(&wal, &wal_data, 0).unwrap(); }
                _ => { fs.write(&tmp, &tmp_data, 0).unwrap(); }
            }
        }

        let mut out = vec![0u8; db_data.len()];
        fs.read(&db, &mut out, 0).unwrap();
        prop_assert_eq!(&out, &db_data);

        let mut out = vec![0u8; wal_data.len()];
        fs.read(&wal, &mut out, 0).unwrap();
        prop_assert_eq!(&out, &wal_data);

        let mut out = vec![0u8; tmp_data.len()];
        fs.read(&tmp, &mut out, 0).unwrap();
        prop_assert_eq!(&out, &tmp_data);
    }

    /// After any sequence of allocate/release, live extents stay pairwise
    /// disjoint and the accounted LBAs cover the whole region.
    #[test]
    fn prop_extents_disjoint_and_accounted(ops in proptest::collection::vec((1u64..=64, any::<bool>()), 1..64)) {
        let region = 4096u64;
        let mut mgr = TemporaryBlockManager::new(0, region);
        let mut live: Vec<TemporaryBlock> = Vec::new();

        for (lbas, release_oldest) in ops {
            if release_oldest && !live.is_empty() {
                let block = live.remove(0);
                mgr.release(block);
            } else if let Ok(block) = mgr.allocate(lbas) {
                live.push(block);
            }

            let live_total: u64 = live.iter().map(|b| b.lba_count()).sum();
            prop_assert_eq!(live_total + mgr.available_lbas(), region);

            let mut ranges: Vec<(u64, u64)> =
                live.iter().map(|b| (b.start_lba(), b.end_lba())).collect();
            ranges.sort();
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0, "extents overlap: {:?}", pair);
            }
        }
    }

    /// The frontier-derived file size never decreases across a write
    /// sequence, and equals the high-water mark of completed writes.
    #[test]
    fn prop_frontier_monotonic(offsets in proptest::collection::vec(0u64..512, 1..32)) {
        let fs = small_fs();
        let db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();
        let block = vec![0x11u8; LBA_SIZE as usize];

        let mut high_water = 0u64;
        let mut last_size = 0u64;
        for lba_index in offsets {
            fs.write(&db, &block, lba_index * LBA_SIZE).unwrap();
            high_water = high_water.max((lba_index + 1) * LBA_SIZE);

            let size = fs.get_file_size(&db).unwrap();
            prop_assert!(size >= last_size);
            prop_assert_eq!(size, high_water);
            last_size = size;
        }
    }

    /// For sequential appends from empty, the file size is the end of the
    /// last write rounded up to an LBA.
    #[test]
    fn prop_append_size_law(lengths in proptest::collection::vec(1u64..=2 * LBA_SIZE, 1..16)) {
        let fs = small_fs();
        let db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();

        let mut offset = 0u64;
        for len in lengths {
            // Keep appends LBA-aligned, as the engine's pager does.
            let data = vec![0x5Au8; len as usize];
            fs.write(&db, &data, offset).unwrap();
            let end = offset + len;
            let expected = end.div_ceil(LBA_SIZE) * LBA_SIZE;
            prop_assert_eq!(fs.get_file_size(&db).unwrap(), expected);
            offset = expected;
        }
    }

    /// Superblock serialisation round-trips through its on-device layout.
    #[test]
    fn prop_superblock_roundtrip(
        wal_start in 2u64..1000,
        tmp_extra in 0u64..1000,
        db_loc in 0u64..500,
        wal_loc in 0u64..500,
        name in "[a-z]{1,20}",
    ) {
        let tmp_start = wal_start + tmp_extra;
        let sb = Superblock {
            db_start: 1,
            wal_start,
            tmp_start,
            db_location: 1 + db_loc,
            wal_location: wal_start + wal_loc.min(tmp_extra),
            db_path: format!("{name}.db"),
        };

        let bytes = sb.to_bytes().unwrap();
        let decoded = Superblock::from_bytes(&bytes).unwrap().unwrap();
        prop_assert_eq!(sb, decoded);
    }

    /// Every successful temporary write shrinks the available disk space by
    /// exactly its rounded-up LBA cost.
    #[test]
    fn prop_temp_write_cost(lengths in proptest::collection::vec(1u64..=2 * LBA_SIZE, 1..12)) {
        let fs = small_fs();
        let _db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();
        let tmp = fs
            .open("nvmefs:///tmp/spill", OpenFlags::READ_WRITE.with_create())
            .unwrap();

        let mut offset = 0u64;
        for len in lengths {
            let before = fs.get_available_disk_space().unwrap();
            let data = vec![0xA5u8; len as usize];
            fs.write(&tmp, &data, offset).unwrap();
            let after = fs.get_available_disk_space().unwrap();

            let cost = len.div_ceil(LBA_SIZE) * LBA_SIZE;
            prop_assert_eq!(before - after, cost);
            offset += cost;
        }
    }

    /// Reads of never-written database ranges return zeroes regardless of
    /// surrounding writes.
    #[test]
    fn prop_unwritten_gaps_read_zero(written in proptest::collection::btree_set(0u64..64, 1..16)) {
        let fs = small_fs();
        let db = fs.open("nvmefs://app.db", OpenFlags::READ_WRITE).unwrap();
        let mut contents: HashMap<u64, u8> = HashMap::new();

        for (i, lba_index) in written.iter().enumerate() {
            let byte = (i + 1) as u8;
            let block = vec![byte; LBA_SIZE as usize];
            fs.write(&db, &block, lba_index * LBA_SIZE).unwrap();
            contents.insert(*lba_index, byte);
        }

        for lba_index in 0u64..64 {
            let mut out = vec![0xFFu8; LBA_SIZE as usize];
            fs.read(&db, &mut out, lba_index * LBA_SIZE).unwrap();
            let expected = contents.get(&lba_index).copied().unwrap_or(0);
            prop_assert!(out.iter().all(|&b| b == expected));
        }
    }
}
