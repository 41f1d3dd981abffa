//! Configuration Validator: runs once per job, after every
//! file's `ZoneTable` exists and before any I/O is issued.

use crate::zbd::error::Error;
use crate::zbd::table::ZoneTable;
use crate::zbd::zone::ZoneModel;

/// Per-direction block size bounds a job has configured.
#[derive(Debug, Clone, Copy)]
pub struct BlockSizeRange {
    pub read: u64,
    pub write: u64,
    pub trim: u64,
}

/// Job-wide configuration recognized by this core.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub zone_mode_enabled: bool,
    /// `zone_size` in bytes; required for non-zoned devices, optional
    /// (and cross-checked) otherwise.
    pub zone_size: Option<u64>,
    pub verify: bool,
    pub read_beyond_wp: bool,
    pub odirect: bool,
    pub block_sizes: BlockSizeRange,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            zone_mode_enabled: true,
            zone_size: None,
            verify: false,
            read_beyond_wp: false,
            odirect: false,
            block_sizes: BlockSizeRange {
                read: 4096,
                write: 4096,
                trim: 4096,
            },
        }
    }
}

/// If any writer targets a `HOST_MANAGED` device, every writer on that
/// device must use direct I/O.
pub fn validate_direct_io(table: &ZoneTable, config: &JobConfig, is_writer: bool) -> Result<(), Error> {
    if is_writer && table.model == ZoneModel::HostManaged && !config.odirect {
        return Err(Error::Config(
            "writers targeting a host-managed device must use direct I/O (odirect)".into(),
        ));
    }
    Ok(())
}

/// Round `[file_offset, file_offset + io_size)` to zone boundaries. Only
/// applies when the range covers at least one `SEQWRITE_REQ` zone;
/// conventional-only ranges pass through unchanged.
pub fn validate_and_round_range(table: &ZoneTable, file_offset: u64, io_size: u64) -> Result<(u64, u64), Error> {
    let covers_sequential = table
        .zones()
        .iter()
        .any(|z| z.is_sequential() && zone_overlaps(z.start, table.zone_size, file_offset, io_size));
    if !covers_sequential {
        return Ok((file_offset, io_size));
    }

    let zone_size_bytes = table.zone_size << 9;

    let rounded_offset = if file_offset % zone_size_bytes != 0 {
        let idx = table.zone_index_of(file_offset);
        let next_zone_start_bytes = table.next_zone(idx).start << 9;
        next_zone_start_bytes
    } else {
        file_offset
    };

    if rounded_offset >= file_offset + io_size {
        return Err(Error::Config("range too small: rounds to empty after offset alignment".into()));
    }
    let remaining = file_offset + io_size - rounded_offset;

    let end = rounded_offset + remaining;
    let rounded_end = if end % zone_size_bytes != 0 {
        (end / zone_size_bytes) * zone_size_bytes
    } else {
        end
    };

    if rounded_end <= rounded_offset {
        return Err(Error::Config("range too small: rounds to empty after size truncation".into()));
    }

    Ok((rounded_offset, rounded_end - rounded_offset))
}

/// When verification is enabled, every configured block size must divide
/// the zone size exactly.
pub fn validate_block_sizes(table: &ZoneTable, config: &JobConfig) -> Result<(), Error> {
    if !config.verify {
        return Ok(());
    }
    let zone_size_bytes = table.zone_size << 9;
    for (name, bs) in [
        ("read", config.block_sizes.read),
        ("write", config.block_sizes.write),
        ("trim", config.block_sizes.trim),
    ] {
        if zone_size_bytes % bs != 0 {
            return Err(Error::Config(format!(
                "{} block size {} does not divide zone size {} bytes",
                name, bs, zone_size_bytes
            )));
        }
    }
    Ok(())
}

fn zone_overlaps(zone_start_sectors: u64, zone_size_sectors: u64, offset_bytes: u64, size_bytes: u64) -> bool {
    let zone_start = zone_start_sectors << 9;
    let zone_end = (zone_start_sectors + zone_size_sectors) << 9;
    offset_bytes < zone_end && offset_bytes + size_bytes > zone_start
}
