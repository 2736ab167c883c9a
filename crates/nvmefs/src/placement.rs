//! FDP (Flexible Data Placement) tag resolution.
//!
//! FDP lets the host tag each write with a placement identifier so the SSD
//! groups data with similar lifetimes into the same reclaim unit, reducing
//! write amplification. Paths are mapped to a placement-handle index through
//! an ordered prefix table; the index selects a Reclaim Unit Handle id from
//! the snapshot taken at device open.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// An NVMe FDP Reclaim Unit Handle id, as reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementId(pub u16);

impl PlacementId {
    /// Encodes the id into the command-specific dword reserved for
    /// placement identifiers: 16 bits of handle id in bits 16..32.
    pub fn dword(self) -> u32 {
        (self.0 as u32) << 16
    }
}

/// Ordered path-prefix table mapping paths to placement-handle indexes.
///
/// Resolution is by longest matching prefix; paths that match no prefix fall
/// back to index 0 (the database handle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementTable {
    prefixes: Vec<(String, usize)>,
}

impl PlacementTable {
    /// Creates an empty table: every path resolves to index 0.
    pub fn new() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    /// Creates the default layout: temporary files on handle 1, everything
    /// else (database and WAL) on handle 0.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.assign(crate::handle::TEMP_DIR_PATH, 1);
        table
    }

    /// Assigns a placement-handle index to a path prefix.
    pub fn assign(&mut self, prefix: &str, handle_index: usize) {
        debug!(prefix, handle_index, "placement prefix assigned");
        self.prefixes.push((prefix.to_string(), handle_index));
    }

    /// Resolves a path to a placement-handle index by longest-prefix match.
    pub fn handle_index(&self, path: &str) -> usize {
        let mut best: Option<(usize, usize)> = None;
        for (prefix, index) in &self.prefixes {
            if path.starts_with(prefix.as_str()) {
                match best {
                    Some((len, _)) if len >= prefix.len() => {}
                    _ => best = Some((prefix.len(), *index)),
                }
            }
        }
        best.map(|(_, index)| index).unwrap_or(0)
    }
}

impl Default for PlacementTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
