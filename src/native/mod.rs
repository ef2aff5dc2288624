//! The native calling surface
//!
//! Every entry point of the NiWrapper C library that this crate calls is a
//! method on [`NativeApi`]. Wrappers never call the C symbols directly, which
//! lets the same lifetime and caching code run against the real library
//! (feature `openni`) or against the in-process [`SyntheticSensor`].

#[cfg(feature = "openni")]
pub mod ffi;
pub mod synthetic;

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capture::format::CopyOptions;
use crate::convert::{ColorPixel, DepthPixel, DepthPoint, WorldPoint};
use crate::error::{Error, Result};

#[cfg(feature = "openni")]
pub use ffi::NiWrapper;
pub use synthetic::{NativeCall, SyntheticSensor};

/// Opaque reference to an object owned by the native layer.
///
/// Zero is never a valid handle, so a released wrapper stores
/// `Option<NativeHandle>` and uses `None` as its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NativeHandle(NonZeroUsize);

impl NativeHandle {
    /// Wrap a raw handle value, rejecting zero
    pub fn new(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn from_ptr(ptr: *mut libc::c_void) -> Option<Self> {
        Self::new(ptr as usize)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }

    pub fn as_ptr(self) -> *mut libc::c_void {
        self.0.get() as *mut libc::c_void
    }
}

/// Status code returned by native entry points.
///
/// Unknown values are kept verbatim so they can be reported unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Self = Self(0);
    pub const ERROR: Self = Self(1);
    pub const NOT_IMPLEMENTED: Self = Self(2);
    pub const NOT_SUPPORTED: Self = Self(3);
    pub const BAD_PARAMETER: Self = Self(4);
    pub const OUT_OF_FLOW: Self = Self(5);
    pub const NO_DEVICE: Self = Self(6);
    pub const TIME_OUT: Self = Self(102);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Turn a non-success status into [`Error::NativeCallFailed`]
    pub fn check(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::NativeCallFailed { status: self })
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::OK => "ok",
            Self::ERROR => "error",
            Self::NOT_IMPLEMENTED => "not implemented",
            Self::NOT_SUPPORTED => "not supported",
            Self::BAD_PARAMETER => "bad parameter",
            Self::OUT_OF_FLOW => "out of flow",
            Self::NO_DEVICE => "no device",
            Self::TIME_OUT => "time out",
            Self(code) => return write!(f, "unknown ({code})"),
        };
        write!(f, "{name} ({})", self.0)
    }
}

/// Pixel encoding as reported by the native video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[repr(transparent)]
pub struct NativePixelFormat(pub i32);

impl NativePixelFormat {
    pub const DEPTH_1_MM: Self = Self(100);
    pub const DEPTH_100_UM: Self = Self(101);
    pub const SHIFT_9_2: Self = Self(102);
    pub const SHIFT_9_3: Self = Self(103);
    pub const RGB888: Self = Self(200);
    pub const YUV422: Self = Self(201);
    pub const GRAY8: Self = Self(202);
    pub const GRAY16: Self = Self(203);
    pub const JPEG: Self = Self(204);
    pub const YUYV: Self = Self(205);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::DEPTH_1_MM, "depth_1_mm"),
        (Self::DEPTH_100_UM, "depth_100_um"),
        (Self::SHIFT_9_2, "shift_9_2"),
        (Self::SHIFT_9_3, "shift_9_3"),
        (Self::RGB888, "rgb888"),
        (Self::YUV422, "yuv422"),
        (Self::GRAY8, "gray8"),
        (Self::GRAY16, "gray16"),
        (Self::JPEG, "jpeg"),
        (Self::YUYV, "yuyv"),
    ];

    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(format, _)| *format == self)
            .map(|(_, name)| *name)
    }

    /// Bytes per pixel of the native encoding (packed formats count 2)
    pub fn native_bytes_per_pixel(self) -> usize {
        match self {
            Self::RGB888 => 3,
            Self::GRAY8 | Self::JPEG => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for NativePixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown ({})", self.0),
        }
    }
}

impl FromStr for NativePixelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(format, _)| *format)
            .ok_or_else(|| format!("unknown pixel format '{s}'"))
    }
}

impl TryFrom<String> for NativePixelFormat {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NativePixelFormat> for String {
    fn from(format: NativePixelFormat) -> Self {
        format.to_string()
    }
}

/// Sensor that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SensorType(pub i32);

impl SensorType {
    pub const IR: Self = Self(1);
    pub const COLOR: Self = Self(2);
    pub const DEPTH: Self = Self(3);
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::IR => f.write_str("ir"),
            Self::COLOR => f.write_str("color"),
            Self::DEPTH => f.write_str("depth"),
            Self(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// Video mode descriptor attached to a native frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VideoMode {
    pub pixel_format: NativePixelFormat,
    pub resolution_x: i32,
    pub resolution_y: i32,
    pub fps: i32,
}

/// Frame dimensions in pixels, as reported natively
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

/// Top-left corner of the cropping window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CroppingOrigin {
    pub x: i32,
    pub y: i32,
}

/// Entry points of the native sensor layer.
///
/// Frame getters are infallible at the C level: they return whatever the
/// native object holds. Only the copy, conversion and stream calls report a
/// [`Status`]. Implementations never see a zero handle; the wrappers reject
/// those before calling in.
///
/// # Safety
///
/// Every method is a raw native call. The caller guarantees that each handle
/// names a live object of this API of the kind the parameter names (frame or
/// stream), and that a frame handle is not used after `frame_release`.
/// [`VideoFrameRef`](crate::VideoFrameRef) and
/// [`CoordinateConverter`](crate::CoordinateConverter) uphold this for their
/// callers.
pub trait NativeApi: Send + Sync {
    /// Copy the frame's pixels into `dst`, converted to the format implied by
    /// `options`. Reports `BAD_PARAMETER` when `dst` is shorter than
    /// `dst_stride` bytes for every row of the frame.
    unsafe fn frame_copy_data_to(
        &self,
        frame: NativeHandle,
        dst: &mut [u8],
        dst_stride: usize,
        options: CopyOptions,
    ) -> Status;

    /// Cropping origin, or `None` when cropping is disabled
    unsafe fn frame_cropping_origin(&self, frame: NativeHandle) -> Option<CroppingOrigin>;

    /// Address of the frame's own pixel data, valid until release
    unsafe fn frame_data(&self, frame: NativeHandle) -> *const u8;

    unsafe fn frame_data_size(&self, frame: NativeHandle) -> i32;

    unsafe fn frame_stride_in_bytes(&self, frame: NativeHandle) -> i32;

    unsafe fn frame_index(&self, frame: NativeHandle) -> i32;

    unsafe fn frame_sensor_type(&self, frame: NativeHandle) -> SensorType;

    unsafe fn frame_timestamp(&self, frame: NativeHandle) -> u64;

    unsafe fn frame_size(&self, frame: NativeHandle) -> FrameSize;

    unsafe fn frame_video_mode(&self, frame: NativeHandle) -> VideoMode;

    /// Release the native frame. The handle must not be used afterwards.
    unsafe fn frame_release(&self, frame: NativeHandle);

    /// Read the next frame of a started stream. A non-zero frame handle
    /// returned with `OK` is owned by the caller.
    unsafe fn stream_read_frame(&self, stream: NativeHandle) -> (Status, usize);

    unsafe fn convert_depth_to_color(
        &self,
        depth_stream: NativeHandle,
        color_stream: NativeHandle,
        x: i32,
        y: i32,
        z: u16,
    ) -> (Status, ColorPixel);

    unsafe fn convert_depth_to_world(
        &self,
        depth_stream: NativeHandle,
        x: i32,
        y: i32,
        z: u16,
    ) -> (Status, WorldPoint);

    unsafe fn convert_depth_to_world_f32(
        &self,
        depth_stream: NativeHandle,
        x: f32,
        y: f32,
        z: f32,
    ) -> (Status, WorldPoint);

    unsafe fn convert_world_to_depth(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPixel);

    unsafe fn convert_world_to_depth_f32(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPoint);
}

/// Whether a copy destination of `len` bytes holds `size.height` rows of
/// `stride` bytes, each wide enough for `size.width` pixels of `bpp` bytes
pub(crate) fn destination_fits(size: FrameSize, bpp: usize, stride: usize, len: usize) -> bool {
    let width = size.width.max(0) as usize;
    let height = size.height.max(0) as usize;
    let row_fits = width.checked_mul(bpp).is_some_and(|row| row <= stride);
    let total_fits = stride.checked_mul(height).is_some_and(|total| total <= len);
    row_fits && total_fits
}
