//! Per-zone state.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Type of a zone, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneType {
    /// Arbitrary I/O permitted, like a traditional device.
    Conventional,
    /// Writes accepted only at the write pointer.
    SeqwriteReq,
}

impl ZoneType {
    pub fn is_sequential(self) -> bool {
        matches!(self, ZoneType::SeqwriteReq)
    }
}

/// Operational condition of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneCondition {
    Empty,
    ImpOpen,
    ExpOpen,
    Closed,
    Full,
    Readonly,
    Offline,
    /// Zone has no write pointer (conventional zones are reported this way).
    NotWp,
}

/// One device zone.
///
/// `mutex` guards nothing by itself — callers take `Zone::lock()` to get a
/// guard that protects `wp`, `cond`, `reset_zone`, and `verify_block` for the
/// duration the guard is held. The mutex is non-recursive: expressing the
/// lock handoff as an explicit [`crate::zbd::completion::ZoneReservation`]
/// capability removes the need for recursion — nothing in this crate ever
/// re-locks a zone it is already holding.
#[derive(Debug)]
pub struct Zone {
    /// Starting sector (512-byte units).
    pub start: u64,
    state: Mutex<ZoneState>,
}

/// The mutable part of a zone's state, protected by `Zone::mutex`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneState {
    pub wp: u64,
    pub zone_type: ZoneType,
    pub cond: ZoneCondition,
    /// Deferred-reset flag raised by external logic, consumed by the Adjuster.
    pub reset_zone: bool,
    /// Counter used during verification replay to regenerate the write sequence.
    pub verify_block: u64,
}

impl Zone {
    pub fn new(start: u64, zone_type: ZoneType, cond: ZoneCondition, wp: u64) -> Self {
        Zone {
            start,
            state: Mutex::new(ZoneState {
                wp,
                zone_type,
                cond,
                reset_zone: false,
                verify_block: 0,
            }),
        }
    }

    pub fn zone_type(&self) -> ZoneType {
        self.lock().zone_type
    }

    pub fn is_sequential(&self) -> bool {
        self.zone_type().is_sequential()
    }

    /// Lock this zone's state for the duration of the returned guard.
    ///
    /// Lock ordering: callers must acquire zones in ascending
    /// index order when holding more than one at a time. This type cannot
    /// enforce that itself (it has no notion of its own index) — see
    /// `ZoneTable::lock_zone` and `zbd::adjuster::find_zone`, which are the
    /// only call sites that ever hold two zone locks at once and which
    /// always release the lower-priority one before taking another.
    pub fn lock(&self) -> MutexGuard<'_, ZoneState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Device zoning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneModel {
    HostAware,
    HostManaged,
    /// Regular block device simulating ZBD semantics.
    None,
}

impl ZoneModel {
    pub fn is_zoned(self) -> bool {
        matches!(self, ZoneModel::HostAware | ZoneModel::HostManaged)
    }

    /// Parse the literal string reported by the device's `queue/zoned`
    /// sysfs attribute.
    pub fn from_sysfs_str(s: &str) -> Self {
        match s.trim() {
            "host-aware" => ZoneModel::HostAware,
            "host-managed" => ZoneModel::HostManaged,
            _ => ZoneModel::None,
        }
    }
}
