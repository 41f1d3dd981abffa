//! The in-memory, lock-protected zone table.

use super::zone::{Zone, ZoneModel};

/// Sentinel value for `zone_size_log2` when `zone_size` is not a power of two.
pub const ZONE_SIZE_LOG2_INVALID: u32 = u32::MAX;

/// Per-device table of zones, plus one sentinel past the end.
///
/// Sharing: several generators pointing at the same device path can share
/// one table and the last release tears it down. In Rust, `Arc<ZoneTable>`
/// *is* that refcount — `Job::open_device` hands out clones of the same
/// `Arc` for a repeated device path, and the table's data never needs a
/// table-wide mutex because nothing about it mutates after construction
/// (only per-zone fields do, guarded by each `Zone`'s own mutex).
#[derive(Debug)]
pub struct ZoneTable {
    pub zone_size: u64,
    /// `log2(zone_size_bytes)` if `zone_size_bytes` is a power of two,
    /// else [`ZONE_SIZE_LOG2_INVALID`].
    pub zone_size_log2: u32,
    pub nr_zones: u64,
    pub model: ZoneModel,
    /// `zones[0..nr_zones]` are real zones; `zones[nr_zones]` is the
    /// sentinel, whose `start` is the exclusive upper sector bound of the
    /// device's zoned range.
    zones: Vec<Zone>,
}

impl ZoneTable {
    /// Construct a table from already-built zone records plus the sentinel's
    /// start sector. `zones.len()` becomes `nr_zones`.
    pub fn from_zones(zone_size: u64, model: ZoneModel, mut zones: Vec<Zone>, sentinel_start: u64) -> Self {
        let nr_zones = zones.len() as u64;
        zones.push(Zone::new(
            sentinel_start,
            super::zone::ZoneType::Conventional,
            super::zone::ZoneCondition::NotWp,
            sentinel_start,
        ));

        let zone_size_bytes = zone_size << 9;
        let zone_size_log2 = if zone_size_bytes > 0 && zone_size_bytes.is_power_of_two() {
            zone_size_bytes.trailing_zeros()
        } else {
            ZONE_SIZE_LOG2_INVALID
        };

        ZoneTable {
            zone_size,
            zone_size_log2,
            nr_zones,
            model,
            zones,
        }
    }

    /// Real zones only (excludes the sentinel).
    pub fn zones(&self) -> &[Zone] {
        &self.zones[..self.nr_zones as usize]
    }

    /// The sentinel zone: `start == nr_zones * zone_size`.
    pub fn sentinel(&self) -> &Zone {
        &self.zones[self.nr_zones as usize]
    }

    /// `zones[i]` for `0 <= i <= nr_zones` (the sentinel is index `nr_zones`).
    pub fn zone(&self, index: u64) -> &Zone {
        &self.zones[index as usize]
    }

    /// `zones[i+1]`, using the sentinel's `start` when `i == nr_zones - 1`.
    /// Never dereferences past the sentinel.
    pub fn next_zone(&self, index: u64) -> &Zone {
        self.zone((index + 1).min(self.nr_zones))
    }

    /// `min(offset_sectors / zone_size, nr_zones)` — clamps to the sentinel
    /// rather than ever indexing out of bounds.
    pub fn zone_index_of(&self, offset_bytes: u64) -> u64 {
        let offset_sectors = offset_bytes >> 9;
        let idx = if self.zone_size_log2 != ZONE_SIZE_LOG2_INVALID {
            // zone_size_log2 is computed from the *byte* zone size; shifting
            // the sector offset right by (log2 - 9) sectors is equivalent to
            // dividing the byte offset by the byte zone size.
            offset_sectors >> (self.zone_size_log2 - 9)
        } else {
            offset_sectors / self.zone_size
        };
        idx.min(self.nr_zones)
    }

    /// Total device sector range covered by the real (non-sentinel) zones.
    pub fn zoned_range_end_sectors(&self) -> u64 {
        self.sentinel().start
    }

    pub fn verify_invariants(&self) -> Result<(), String> {
        for i in 0..self.nr_zones {
            let this_start = self.zone(i).start;
            let next_start = self.zone(i + 1).start;
            if this_start + self.zone_size != next_start {
                return Err(format!(
                    "zone {} start {} + zone_size {} != zone {} start {}",
                    i,
                    this_start,
                    self.zone_size,
                    i + 1,
                    next_start
                ));
            }
        }
        Ok(())
    }
}
