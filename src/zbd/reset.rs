//! Reset Engine: reset contiguous runs of sequential zones, both up-front
//! at file-start and on demand from the Adjuster's write path.

use crate::zbd::backend::ZoneIoctlBackend;
use crate::zbd::error::Error;
use crate::zbd::table::ZoneTable;
use tracing::debug;

/// Reset every zone fully contained in `[start_sector, start_sector + nr_sectors)`.
/// Issues the device-level reset ioctl only for zoned devices; regardless of
/// device kind, every covered zone's in-memory state is cleared.
pub fn reset_range(
    table: &ZoneTable,
    backend: &dyn ZoneIoctlBackend,
    start_sector: u64,
    nr_sectors: u64,
) -> Result<(), Error> {
    if table.model.is_zoned() {
        backend.reset_zones(start_sector, nr_sectors)?;
    }

    let end_sector = start_sector + nr_sectors;
    let start_idx = table.zone_index_of(start_sector << 9);
    let end_idx = table.zone_index_of(end_sector << 9);
    for idx in start_idx..end_idx {
        let zone = table.zone(idx);
        let mut state = zone.lock();
        state.wp = zone.start;
        state.verify_block = 0;
    }
    debug!(start_sector, nr_sectors, "reset range");
    Ok(())
}

/// Whether `min_bs_sectors` divides `wp` (wp is a whole number of minimum
/// write blocks into the zone).
fn wp_aligned(wp: u64, start: u64, min_bs_sectors: u64) -> bool {
    min_bs_sectors == 0 || (wp - start) % min_bs_sectors == 0
}

/// Walk `[zb, ze)`, coalescing contiguous runs of zones that need resetting
/// into as few device-level reset calls as possible. Every zone in the
/// walked range is locked as it is examined and all are released only once
/// the entire walk (including any reset calls) completes, so no other
/// context can mutate `wp` during the decision window. Because the locks are
/// already held here, the actual reset (ioctl + state clear) is applied
/// in-line rather than by calling `reset_range`, which would try to
/// re-acquire them.
pub fn reset_zones(
    table: &ZoneTable,
    backend: &dyn ZoneIoctlBackend,
    zb: u64,
    ze: u64,
    all_zones: bool,
    writes_enabled: bool,
    min_bs_sectors: u64,
) -> Result<(), Error> {
    let mut guards: Vec<_> = (zb..ze).map(|idx| (idx, table.zone(idx).lock())).collect();

    let mut run_start: Option<usize> = None;
    let mut result = Ok(());

    let positions: Vec<usize> = (0..guards.len()).collect();
    for &pos in &positions {
        let (idx, guard) = &guards[pos];
        let zone = table.zone(*idx);
        let is_sequential = guard.zone_type.is_sequential();
        let needs_reset = if !is_sequential {
            false
        } else if all_zones {
            guard.wp != zone.start
        } else {
            writes_enabled && !wp_aligned(guard.wp, zone.start, min_bs_sectors)
        };

        if needs_reset {
            if run_start.is_none() {
                run_start = Some(pos);
            }
        } else if let Some(rs) = run_start.take() {
            if let Err(e) = apply_run(table, backend, &mut guards, rs, pos) {
                result = Err(e);
            }
        }
    }
    if let Some(rs) = run_start.take() {
        let end = guards.len();
        if let Err(e) = apply_run(table, backend, &mut guards, rs, end) {
            result = Err(e);
        }
    }

    result
}

/// Reset the contiguous run `guards[run_start..run_end]`: issue one
/// device-level reset ioctl for zoned devices, then clear every zone's
/// in-memory `wp`/`verify_block`. On ioctl failure, leaves `wp` untouched
/// for the zones in this run (they remain candidates for reset on a future
/// attempt). See DESIGN.md, Open Question resolutions.
fn apply_run(
    table: &ZoneTable,
    backend: &dyn ZoneIoctlBackend,
    guards: &mut [(u64, std::sync::MutexGuard<'_, crate::zbd::zone::ZoneState>)],
    run_start: usize,
    run_end: usize,
) -> Result<(), Error> {
    let start_sector = table.zone(guards[run_start].0).start;
    let end_sector_idx = guards[run_end - 1].0 + 1;
    let end_sector = table.zone(end_sector_idx).start;

    if table.model.is_zoned() {
        backend.reset_zones(start_sector, end_sector - start_sector)?;
    }

    for (idx, guard) in &mut guards[run_start..run_end] {
        guard.wp = table.zone(*idx).start;
        guard.verify_block = 0;
    }
    Ok(())
}

/// On starting a file, compute `[zb, ze)` covering its I/O range and invoke
/// `reset_zones` with `all_zones := verify_enabled && writing && !verifying_now`.
pub fn file_reset(
    table: &ZoneTable,
    backend: &dyn ZoneIoctlBackend,
    io_range: (u64, u64),
    verify_enabled: bool,
    writing: bool,
    verifying_now: bool,
    min_bs_sectors: u64,
) -> Result<(), Error> {
    let (offset_bytes, size_bytes) = io_range;
    let zb = table.zone_index_of(offset_bytes);
    let ze = table.zone_index_of(offset_bytes + size_bytes);
    let all_zones = verify_enabled && writing && !verifying_now;
    reset_zones(table, backend, zb, ze, all_zones, writing, min_bs_sectors)
}
