pub mod buffer_pool;
pub mod device;
pub mod platform_specific;

// Re-exports
pub use buffer_pool::{AlignedBuffer, BufferPool, PooledBuffer};
pub use device::{open_device, DeviceHandle};
pub use platform_specific::{get_platform_io, PlatformIO};

/// I/O operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOMode {
    /// Standard buffered I/O (slower, but compatible)
    Buffered,
    /// Direct I/O bypassing OS cache (faster)
    Direct,
}

/// Result type for I/O operations
pub type IOResult<T> = Result<T, IOError>;

/// I/O specific errors
#[derive(Debug, thiserror::Error)]
pub enum IOError {
    #[error("I/O operation failed: {0}")]
    OperationFailed(String),

    #[error("alignment error: {0}")]
    AlignmentError(String),

    #[error("buffer allocation failed: {0}")]
    AllocationFailed(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
