use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::format::FramePixelFormat;
use crate::native::{NativePixelFormat, SensorType};

/// Frame copied out of a frame buffer, safe to keep and share
#[derive(Clone)]
pub struct Frame {
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Grab timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: FramePixelFormat,
    /// Encoding before conversion; tells the two depth units apart
    pub native_format: NativePixelFormat,
    pub frame_index: i32,
    pub sensor_type: SensorType,
    pub device_timestamp: Duration,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}
