//! Error types for the binding layer

use thiserror::Error;

use crate::native::{NativePixelFormat, Status};

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the managed side of the native boundary
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a released or zero handle
    #[error("native handle is invalid or has already been released")]
    InvalidHandle,

    /// Native pixel format has no frame buffer mapping
    #[error("pixel format {0} cannot be copied into a frame buffer")]
    UnsupportedFormat(NativePixelFormat),

    /// Native entry point reported a non-success status
    #[error("native call failed with status {status}")]
    NativeCallFailed { status: Status },

    /// Frame buffer reallocation could not obtain memory
    #[error("failed to allocate {bytes} bytes for the frame buffer")]
    AllocationFailed { bytes: usize },

    /// Configuration could not be loaded or deserialized
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
