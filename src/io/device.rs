//! A thin handle over an open device/file, used by the demo binary's
//! synthetic workload driver and by [`crate::zbd::backend`] when it needs a
//! raw fd to issue ioctls against.

use super::{get_platform_io, IOResult, PlatformIO};
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};

pub struct DeviceHandle {
    file: File,
    platform_io: Box<dyn PlatformIO>,
    path: String,
}

impl DeviceHandle {
    pub fn open(path: &str, direct_io: bool) -> IOResult<Self> {
        let platform_io = get_platform_io();
        let file = platform_io.open_optimized(path, direct_io)?;
        Ok(Self {
            file,
            platform_io,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn read_at(&self, buffer: &mut [u8], offset: u64) -> IOResult<usize> {
        self.platform_io.read_optimized(&self.file, buffer, offset)
    }

    pub fn write_at(&self, data: &[u8], offset: u64) -> IOResult<usize> {
        self.platform_io.write_optimized(&self.file, data, offset)
    }

    pub fn sync(&self) -> IOResult<()> {
        self.platform_io.sync_data(&self.file)
    }
}

/// Convenience free function mirroring `DeviceHandle::open`.
pub fn open_device(path: &str, direct_io: bool) -> IOResult<DeviceHandle> {
    DeviceHandle::open(path, direct_io)
}
