//! Completion hook and the Adjuster-to-Completion lock handoff across
//! asynchronous I/O boundaries.
//!
//! The lock transfer is expressed as a typed capability rather than a raw
//! guard passed around by convention: [`ZoneReservation`] owns the mutex
//! guard for a sequential zone that `adjust_block` accepted, and only its
//! `complete` method can release it. This mirrors [`crate::io::PooledBuffer`],
//! which owns a buffer-pool slot and returns it exactly once, on `Drop`,
//! rather than trusting call sites to remember to give it back.

use crate::zbd::io_unit::Direction;
use crate::zbd::table::ZoneTable;
use crate::zbd::zone::{Zone, ZoneState};
use std::sync::MutexGuard;
use tracing::warn;

/// Ownership of a sequential zone's mutex, handed from the Adjuster to
/// whichever context eventually completes the I/O. Exactly one `complete`
/// call consumes it; if it is ever dropped without completing (a bug in the
/// caller, since every accepted request must complete), the mutex is still
/// released safely by `MutexGuard`'s own `Drop` — but the write pointer is
/// left stale, which is why call sites must not skip `complete`.
pub struct ZoneReservation<'t> {
    guard: MutexGuard<'t, ZoneState>,
    zone_start: u64,
    next_zone_start: u64,
}

impl<'t> ZoneReservation<'t> {
    pub(crate) fn new(guard: MutexGuard<'t, ZoneState>, zone_start: u64, next_zone_start: u64) -> Self {
        ZoneReservation {
            guard,
            zone_start,
            next_zone_start,
        }
    }

    /// Run the Completion Hook and release the zone. `offset`/`buflen` are
    /// in bytes; `success` reflects whether the underlying I/O completed.
    pub fn complete(mut self, direction: Direction, offset: u64, buflen: u64, success: bool) {
        if !self.guard.zone_type.is_sequential() {
            // Defensive: attached hooks should only ever target sequential
            // zones. Nothing to update; the guard drops and releases below.
            return;
        }
        if success {
            match direction {
                Direction::Write => {
                    let advanced = (offset + buflen) >> 9;
                    self.guard.wp = advanced.min(self.next_zone_start);
                }
                Direction::Trim => {
                    if self.guard.wp != self.zone_start {
                        warn!(zone_start = self.zone_start, wp = self.guard.wp, "trim completed but wp != start");
                    }
                }
                Direction::Read => {}
            }
        }
        // Guard drops here, releasing the mutex — the unique release point
        // for a zone reserved by `adjust_block`.
    }
}

/// Recover the zone a completion targets and run its hook, given only the
/// offset (the caller does not otherwise retain a reference to the zone
/// once adjustment returns `ACCEPT` for a sequential zone — in this crate
/// the reservation itself carries that reference, so this free function
/// exists for callers that only have a raw offset and must re-look-up the
/// zone, e.g. a completion delivered out of order by the I/O engine).
pub fn complete_by_offset(table: &ZoneTable, direction: Direction, offset: u64, buflen: u64, success: bool) {
    let idx = table.zone_index_of(offset);
    if idx >= table.nr_zones {
        return;
    }
    let zone: &Zone = table.zone(idx);
    if !zone.is_sequential() {
        return;
    }
    let mut guard = zone.lock();
    if success {
        match direction {
            Direction::Write => {
                let next_start = table.next_zone(idx).start;
                guard.wp = ((offset + buflen) >> 9).min(next_start);
            }
            Direction::Trim => {
                if guard.wp != zone.start {
                    warn!(zone_start = zone.start, wp = guard.wp, "trim completed but wp != start");
                }
            }
            Direction::Read => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zbd::zone::{ZoneCondition, ZoneType};

    #[test]
    fn reservation_advances_wp_on_successful_write() {
        let zone = Zone::new(0, ZoneType::SeqwriteReq, ZoneCondition::Empty, 0);
        let reservation = ZoneReservation::new(zone.lock(), 0, 2048);
        reservation.complete(Direction::Write, 0, 1_048_576, true);
        assert_eq!(zone.lock().wp, 2048);
    }

    #[test]
    fn reservation_caps_wp_at_next_zone_start() {
        let zone = Zone::new(0, ZoneType::SeqwriteReq, ZoneCondition::Empty, 2000);
        let reservation = ZoneReservation::new(zone.lock(), 0, 2048);
        // buflen would push past next_zone_start; caller misbehavior, clamp.
        reservation.complete(Direction::Write, 2000 << 9, 10_000_000, true);
        assert_eq!(zone.lock().wp, 2048);
    }

    #[test]
    fn reservation_leaves_wp_unchanged_on_failure() {
        let zone = Zone::new(0, ZoneType::SeqwriteReq, ZoneCondition::Empty, 0);
        let reservation = ZoneReservation::new(zone.lock(), 0, 2048);
        reservation.complete(Direction::Write, 0, 4096, false);
        assert_eq!(zone.lock().wp, 0);
    }

    #[test]
    fn complete_by_offset_looks_up_zone_and_updates_wp() {
        let zones = vec![Zone::new(0, ZoneType::SeqwriteReq, ZoneCondition::Empty, 0)];
        let table = ZoneTable::from_zones(1024, crate::zbd::zone::ZoneModel::HostManaged, zones, 1024);
        complete_by_offset(&table, Direction::Write, 0, 4096, true);
        assert_eq!(table.zone(0).lock().wp, 8);
    }
}
