//! Device-facing backend: sysfs model discovery and the zone-report/reset
//! ioctls. Real devices go through [`LinuxZoneBackend`]; tests
//! and the `bench` demo use [`FakeZoneBackend`], which needs no privileges
//! and no real block device.

use crate::zbd::error::Error;
use crate::zbd::zone::{ZoneCondition, ZoneModel, ZoneType};
use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Mutex;

/// One zone record as reported by the device's zone-report ioctl.
#[derive(Debug, Clone, Copy)]
pub struct ReportedZone {
    pub start: u64,
    pub len: u64,
    pub wp: u64,
    pub zone_type: ZoneType,
    pub cond: ZoneCondition,
}

/// Abstraction over "however this process talks to the device" so the table
/// builder (and tests) don't depend on a real Linux kernel. `#[automock]`
/// generates `MockZoneIoctlBackend` for tests that need to assert exact call
/// sequences, as a complement to [`FakeZoneBackend`]'s in-memory state.
#[cfg_attr(test, mockall::automock)]
pub trait ZoneIoctlBackend: Send + Sync {
    /// Read the `queue/zoned` sysfs attribute (or equivalent).
    fn query_model(&self) -> Result<ZoneModel, Error>;

    /// Device size in 512-byte sectors.
    fn device_size_sectors(&self) -> Result<u64, Error>;

    /// Report zones starting at `start_sector`, appending up to `max_zones`
    /// records to `out`. Returns the number of records appended.
    fn report_zones(&self, start_sector: u64, max_zones: u32, out: &mut Vec<ReportedZone>) -> Result<usize, Error>;

    /// Reset every zone fully contained in `[start_sector, start_sector + nr_sectors)`.
    fn reset_zones(&self, start_sector: u64, nr_sectors: u64) -> Result<(), Error>;
}

// ===================== Linux ioctl backend =====================

#[cfg(target_os = "linux")]
mod linux_ffi {
    use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

    /// `struct blk_zone` (linux/blkzoned.h), one report record.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct BlkZone {
        pub start: u64,
        pub len: u64,
        pub wp: u64,
        pub type_: u8,
        pub cond: u8,
        pub non_seq: u8,
        pub reset: u8,
        pub resv: [u8; 4],
        pub capacity: u64,
        pub reserved: [u8; 24],
    }

    pub const MAX_REPORT_ZONES: usize = 64;

    /// `struct blk_zone_report` with an inline array, sized generously
    /// enough for one report call; a real device may return fewer.
    #[repr(C)]
    pub struct BlkZoneReport {
        pub sector: u64,
        pub nr_zones: u32,
        pub reserved: u32,
        pub zones: [BlkZone; MAX_REPORT_ZONES],
    }

    #[repr(C)]
    pub struct BlkZoneRange {
        pub sector: u64,
        pub nr_sectors: u64,
    }

    ioctl_readwrite!(blkreportzone, 0x12, 130, BlkZoneReport);
    ioctl_write_ptr!(blkresetzone, 0x12, 131, BlkZoneRange);
    ioctl_read!(blkgetsize64, 0x12, 114, u64);
}

#[cfg(target_os = "linux")]
pub struct LinuxZoneBackend {
    fd: RawFd,
    major_minor: (u32, u32),
}

#[cfg(target_os = "linux")]
impl LinuxZoneBackend {
    pub fn new(fd: RawFd, path: &str) -> Result<Self, Error> {
        let major_minor = stat_major_minor(path)?;
        Ok(LinuxZoneBackend { fd, major_minor })
    }

    fn sysfs_zoned_path(&self) -> String {
        format!("/sys/dev/block/{}:{}/queue/zoned", self.major_minor.0, self.major_minor.1)
    }
}

#[cfg(target_os = "linux")]
fn stat_major_minor(path: &str) -> Result<(u32, u32), Error> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(path)?;
    let rdev = meta.rdev();
    // Linux's encoding of major/minor within dev_t (see makedev(3)).
    let major = ((rdev >> 8) & 0xfff) as u32 | ((rdev >> 32) & !0xfff) as u32;
    let minor = (rdev & 0xff) as u32 | ((rdev >> 12) & !0xff) as u32;
    Ok((major, minor))
}

#[cfg(target_os = "linux")]
impl ZoneIoctlBackend for LinuxZoneBackend {
    fn query_model(&self) -> Result<ZoneModel, Error> {
        match fs::read_to_string(self.sysfs_zoned_path()) {
            Ok(s) => Ok(ZoneModel::from_sysfs_str(&s)),
            // Devices without a `queue/zoned` attribute at all (e.g. plain
            // files used in tests) are simply not zoned.
            Err(_) => Ok(ZoneModel::None),
        }
    }

    fn device_size_sectors(&self) -> Result<u64, Error> {
        let mut size: u64 = 0;
        unsafe { linux_ffi::blkgetsize64(self.fd, &mut size as *mut u64) }?;
        Ok(size >> 9)
    }

    fn report_zones(&self, start_sector: u64, max_zones: u32, out: &mut Vec<ReportedZone>) -> Result<usize, Error> {
        let count = max_zones.min(linux_ffi::MAX_REPORT_ZONES as u32);
        let mut report = linux_ffi::BlkZoneReport {
            sector: start_sector,
            nr_zones: count,
            reserved: 0,
            zones: [linux_ffi::BlkZone::default(); linux_ffi::MAX_REPORT_ZONES],
        };
        unsafe { linux_ffi::blkreportzone(self.fd, &mut report as *mut _) }?;

        let n = report.nr_zones as usize;
        for z in report.zones.iter().take(n) {
            out.push(ReportedZone {
                start: z.start,
                len: z.len,
                wp: z.wp,
                zone_type: decode_zone_type(z.type_),
                cond: decode_zone_cond(z.cond),
            });
        }
        Ok(n)
    }

    fn reset_zones(&self, start_sector: u64, nr_sectors: u64) -> Result<(), Error> {
        let range = linux_ffi::BlkZoneRange {
            sector: start_sector,
            nr_sectors,
        };
        unsafe { linux_ffi::blkresetzone(self.fd, &range as *const _) }?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn decode_zone_type(raw: u8) -> ZoneType {
    // linux/blkzoned.h: BLK_ZONE_TYPE_SEQWRITE_REQ == 2
    match raw {
        2 => ZoneType::SeqwriteReq,
        _ => ZoneType::Conventional,
    }
}

#[cfg(target_os = "linux")]
fn decode_zone_cond(raw: u8) -> ZoneCondition {
    // linux/blkzoned.h BLK_ZONE_COND_*
    match raw {
        1 => ZoneCondition::Empty,
        2 => ZoneCondition::ImpOpen,
        3 => ZoneCondition::ExpOpen,
        4 => ZoneCondition::Closed,
        0xd => ZoneCondition::Readonly,
        0xe => ZoneCondition::Full,
        0xf => ZoneCondition::Offline,
        _ => ZoneCondition::NotWp,
    }
}

// ===================== Fake backend, for tests and the demo binary =====================

/// An in-memory device model for tests and the `bench` demo. Holds the
/// zones it would report, plus an optional fault-injection knob so reset
/// failures can be exercised without a real device.
pub struct FakeZoneBackend {
    model: ZoneModel,
    size_sectors: u64,
    zones: Mutex<Vec<ReportedZone>>,
    fail_reset_at_or_after: Mutex<Option<u64>>,
}

impl FakeZoneBackend {
    pub fn new_zoned(zone_size_sectors: u64, nr_zones: u64) -> Self {
        let zones = (0..nr_zones)
            .map(|i| ReportedZone {
                start: i * zone_size_sectors,
                len: zone_size_sectors,
                wp: i * zone_size_sectors,
                zone_type: ZoneType::SeqwriteReq,
                cond: ZoneCondition::Empty,
            })
            .collect();
        FakeZoneBackend {
            model: ZoneModel::HostManaged,
            size_sectors: zone_size_sectors * nr_zones,
            zones: Mutex::new(zones),
            fail_reset_at_or_after: Mutex::new(None),
        }
    }

    pub fn new_conventional(size_sectors: u64) -> Self {
        FakeZoneBackend {
            model: ZoneModel::None,
            size_sectors,
            zones: Mutex::new(Vec::new()),
            fail_reset_at_or_after: Mutex::new(None),
        }
    }

    /// Make `reset_zones` fail once the span it is asked to reset begins at
    /// or after `sector`, for exercising partial-failure cleanup paths.
    pub fn inject_reset_failure_at(&self, sector: u64) {
        *self.fail_reset_at_or_after.lock().unwrap() = Some(sector);
    }
}

impl ZoneIoctlBackend for FakeZoneBackend {
    fn query_model(&self) -> Result<ZoneModel, Error> {
        Ok(self.model)
    }

    fn device_size_sectors(&self) -> Result<u64, Error> {
        Ok(self.size_sectors)
    }

    fn report_zones(&self, start_sector: u64, max_zones: u32, out: &mut Vec<ReportedZone>) -> Result<usize, Error> {
        let zones = self.zones.lock().unwrap();
        let mut n = 0;
        for z in zones.iter() {
            if z.start < start_sector {
                continue;
            }
            if n >= max_zones {
                break;
            }
            out.push(*z);
            n += 1;
        }
        Ok(n as usize)
    }

    fn reset_zones(&self, start_sector: u64, nr_sectors: u64) -> Result<(), Error> {
        if let Some(fail_at) = *self.fail_reset_at_or_after.lock().unwrap() {
            if start_sector >= fail_at {
                return Err(Error::Ioctl(format!("injected reset failure at sector {}", start_sector)));
            }
        }
        let mut zones = self.zones.lock().unwrap();
        let end = start_sector + nr_sectors;
        for z in zones.iter_mut() {
            if z.start >= start_sector && z.start + z.len <= end {
                z.wp = z.start;
                z.cond = ZoneCondition::Empty;
            }
        }
        Ok(())
    }
}

/// Query the zoning model for a path without a full backend, used by the
/// demo binary's `inspect` subcommand. Falls back to `None` on any platform
/// that cannot answer (non-Linux, or the path has no sysfs entry).
pub fn probe_model(_path: &Path) -> ZoneModel {
    ZoneModel::None
}
