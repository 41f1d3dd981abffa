//! Error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Job/file configuration is invalid before any device is touched.
    #[error("configuration error: {0}")]
    Config(String),

    /// Zones returned by the device violate the uniform-layout invariant.
    /// Fatal for the affected file.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Zone report or reset ioctl failure. The associated write request
    /// becomes EOF; a reset is retried on the next write attempt only if
    /// the caller resubmits.
    #[error("ioctl error: {0}")]
    Ioctl(String),

    /// Allocation failure during table construction. Fatal for the
    /// affected file.
    #[error("resource error: {0}")]
    Resource(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Ioctl(e.to_string())
    }
}

#[cfg(target_os = "linux")]
impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Ioctl(e.to_string())
    }
}

/// Whether `errno` (as reported by a failed write) indicates an unaligned
/// write that the Adjuster should treat as a substitute-zone trigger rather
/// than a hard failure. Device/kernel-defined; kept as a predicate so a
/// caller can swap it for another device family's error codes.
pub fn unaligned_write(errno: i32) -> bool {
    errno == libc::EIO || errno == libc::EREMOTEIO
}
