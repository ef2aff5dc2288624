//! In-process sensor implementing the native entry points
//!
//! Produces deterministic frames for one stream, counts every entry point
//! call, and can be told to fail a call with a chosen status. The CLI uses it
//! when no device library is linked; the tests use it as the native stub.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use tracing::{trace, warn};

use super::{
    destination_fits, CroppingOrigin, FrameSize, NativeApi, NativeHandle, NativePixelFormat,
    SensorType, Status, VideoMode,
};
use crate::capture::format::{map_format, CopyOptions, FramePixelFormat};
use crate::capture::grabber::FrameGrabber;
use crate::capture::video_frame::VideoFrameRef;
use crate::convert::{ColorPixel, DepthPixel, DepthPoint, WorldPoint};

/// Focal length in pixels used for depth/world conversion
const FOCAL_LENGTH: f32 = 575.8;

/// First handle value handed out for frames
const FIRST_FRAME_HANDLE: usize = 0x1000;

/// Entry points tracked by the call counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeCall {
    CopyDataTo,
    CroppingOrigin,
    Data,
    DataSize,
    StrideInBytes,
    FrameIndex,
    SensorType,
    Timestamp,
    Size,
    VideoMode,
    Release,
    ReadFrame,
    DepthToColor,
    /// Integer and float pixel variants
    DepthToWorld,
    /// Integer and float output variants
    WorldToDepth,
}

impl NativeCall {
    const COUNT: usize = 15;
}

struct CallStats {
    counts: [AtomicUsize; NativeCall::COUNT],
}

impl Default for CallStats {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicUsize::new(0)),
        }
    }
}

struct SyntheticFrame {
    mode: VideoMode,
    index: i32,
    timestamp: u64,
    cropping: Option<CroppingOrigin>,
    data: Box<[u8]>,
}

impl SyntheticFrame {
    fn dims(&self) -> (usize, usize) {
        dims(&self.mode)
    }
}

/// Software stand-in for a depth sensor with a single started stream
pub struct SyntheticSensor {
    stream: NativeHandle,
    mode: Mutex<VideoMode>,
    cropping: Mutex<Option<CroppingOrigin>>,
    frames: Mutex<HashMap<usize, SyntheticFrame>>,
    failures: Mutex<HashMap<NativeCall, Status>>,
    next_handle: AtomicUsize,
    next_index: AtomicI32,
    stats: CachePadded<CallStats>,
}

impl SyntheticSensor {
    pub fn new(mode: VideoMode) -> Self {
        Self {
            stream: NativeHandle(NonZeroUsize::MIN),
            mode: Mutex::new(mode),
            cropping: Mutex::new(None),
            frames: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            next_handle: AtomicUsize::new(FIRST_FRAME_HANDLE),
            next_index: AtomicI32::new(0),
            stats: CachePadded::new(CallStats::default()),
        }
    }

    /// Handle of the sensor's stream
    pub fn stream(&self) -> NativeHandle {
        self.stream
    }

    /// Produce a new frame in the current video mode, owned by the returned
    /// wrapper
    pub fn open_frame(self: &Arc<Self>) -> VideoFrameRef<Self> {
        VideoFrameRef::adopt(self.clone(), self.open_native())
    }

    /// Grabber over the sensor's own stream
    pub fn grabber(self: &Arc<Self>, options: CopyOptions) -> FrameGrabber<Self> {
        // SAFETY: the stream lives as long as the sensor, which the grabber
        // keeps alive through its `Arc`
        unsafe { FrameGrabber::new(self.clone(), self.stream, options) }
    }

    /// Produce a new frame and return its bare handle
    pub(crate) fn open_native(&self) -> NativeHandle {
        let mode = *lock(&self.mode);
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let timestamp = match mode.fps {
            fps if fps > 0 => index as u64 * 1_000_000 / fps as u64,
            _ => 0,
        };
        let frame = SyntheticFrame {
            mode,
            index,
            timestamp,
            cropping: *lock(&self.cropping),
            data: render_native(&mode, index).unwrap_or_else(|| {
                warn!(?mode, "synthetic frame too large to render, left empty");
                Box::default()
            }),
        };

        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock(&self.frames).insert(raw, frame);
        trace!(handle = raw, index, "synthetic frame opened");
        NativeHandle(NonZeroUsize::new(raw).unwrap_or(NonZeroUsize::MIN))
    }

    /// Video mode used for frames opened from now on
    pub fn set_video_mode(&self, mode: VideoMode) {
        *lock(&self.mode) = mode;
    }

    pub fn set_cropping_origin(&self, origin: Option<CroppingOrigin>) {
        *lock(&self.cropping) = origin;
    }

    /// Make `call` report `status` until cleared
    pub fn fail(&self, call: NativeCall, status: Status) {
        lock(&self.failures).insert(call, status);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Number of times `call` has been invoked
    pub fn calls(&self, call: NativeCall) -> usize {
        self.stats.counts[call as usize].load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> usize {
        self.stats
            .counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    /// Frames opened and not yet released
    pub fn live_frames(&self) -> usize {
        lock(&self.frames).len()
    }

    fn record(&self, call: NativeCall) -> Status {
        self.stats.counts[call as usize].fetch_add(1, Ordering::Relaxed);
        lock(&self.failures).get(&call).copied().unwrap_or(Status::OK)
    }

    fn with_frame<T>(&self, frame: NativeHandle, f: impl FnOnce(&SyntheticFrame) -> T) -> Option<T> {
        lock(&self.frames).get(&frame.as_raw()).map(f)
    }

    fn principal_point(&self) -> (f32, f32) {
        let mode = lock(&self.mode);
        (mode.resolution_x as f32 / 2.0, mode.resolution_y as f32 / 2.0)
    }

    fn depth_to_world(&self, x: f32, y: f32, z: f32) -> WorldPoint {
        let (cx, cy) = self.principal_point();
        WorldPoint {
            x: (x - cx) * z / FOCAL_LENGTH,
            y: (cy - y) * z / FOCAL_LENGTH,
            z,
        }
    }

    fn world_to_depth(&self, world: WorldPoint) -> Option<DepthPoint> {
        if world.z <= 0.0 {
            return None;
        }
        let (cx, cy) = self.principal_point();
        Some(DepthPoint {
            x: world.x * FOCAL_LENGTH / world.z + cx,
            y: cy - world.y * FOCAL_LENGTH / world.z,
            z: world.z,
        })
    }

    fn check_stream(&self, stream: NativeHandle, status: Status) -> Status {
        match status {
            Status::OK if stream != self.stream => Status::BAD_PARAMETER,
            other => other,
        }
    }
}

impl NativeApi for SyntheticSensor {
    unsafe fn frame_copy_data_to(
        &self,
        frame: NativeHandle,
        dst: &mut [u8],
        dst_stride: usize,
        options: CopyOptions,
    ) -> Status {
        let status = self.record(NativeCall::CopyDataTo);
        if !status.is_ok() {
            return status;
        }
        self.with_frame(frame, |frame| copy_to(frame, dst, dst_stride, options))
            .unwrap_or(Status::BAD_PARAMETER)
    }

    unsafe fn frame_cropping_origin(&self, frame: NativeHandle) -> Option<CroppingOrigin> {
        self.record(NativeCall::CroppingOrigin);
        self.with_frame(frame, |frame| frame.cropping).flatten()
    }

    unsafe fn frame_data(&self, frame: NativeHandle) -> *const u8 {
        self.record(NativeCall::Data);
        self.with_frame(frame, |frame| frame.data.as_ptr())
            .unwrap_or(ptr::null())
    }

    unsafe fn frame_data_size(&self, frame: NativeHandle) -> i32 {
        self.record(NativeCall::DataSize);
        self.with_frame(frame, |frame| i32::try_from(frame.data.len()).unwrap_or(i32::MAX))
            .unwrap_or_default()
    }

    unsafe fn frame_stride_in_bytes(&self, frame: NativeHandle) -> i32 {
        self.record(NativeCall::StrideInBytes);
        self.with_frame(frame, |frame| {
            let bpp = frame.mode.pixel_format.native_bytes_per_pixel() as i32;
            frame.mode.resolution_x.saturating_mul(bpp)
        })
        .unwrap_or_default()
    }

    unsafe fn frame_index(&self, frame: NativeHandle) -> i32 {
        self.record(NativeCall::FrameIndex);
        self.with_frame(frame, |frame| frame.index)
            .unwrap_or_default()
    }

    unsafe fn frame_sensor_type(&self, frame: NativeHandle) -> SensorType {
        self.record(NativeCall::SensorType);
        self.with_frame(frame, |frame| sensor_for(frame.mode.pixel_format))
            .unwrap_or(SensorType(0))
    }

    unsafe fn frame_timestamp(&self, frame: NativeHandle) -> u64 {
        self.record(NativeCall::Timestamp);
        self.with_frame(frame, |frame| frame.timestamp)
            .unwrap_or_default()
    }

    unsafe fn frame_size(&self, frame: NativeHandle) -> FrameSize {
        self.record(NativeCall::Size);
        self.with_frame(frame, |frame| FrameSize {
            width: frame.mode.resolution_x,
            height: frame.mode.resolution_y,
        })
        .unwrap_or_default()
    }

    unsafe fn frame_video_mode(&self, frame: NativeHandle) -> VideoMode {
        self.record(NativeCall::VideoMode);
        self.with_frame(frame, |frame| frame.mode)
            .unwrap_or(VideoMode {
                pixel_format: NativePixelFormat(0),
                resolution_x: 0,
                resolution_y: 0,
                fps: 0,
            })
    }

    unsafe fn frame_release(&self, frame: NativeHandle) {
        self.record(NativeCall::Release);
        if lock(&self.frames).remove(&frame.as_raw()).is_some() {
            trace!(handle = frame.as_raw(), "synthetic frame released");
        }
    }

    unsafe fn stream_read_frame(&self, stream: NativeHandle) -> (Status, usize) {
        let status = self.check_stream(stream, self.record(NativeCall::ReadFrame));
        if !status.is_ok() {
            return (status, 0);
        }
        (status, self.open_native().as_raw())
    }

    unsafe fn convert_depth_to_color(
        &self,
        depth_stream: NativeHandle,
        _color_stream: NativeHandle,
        x: i32,
        y: i32,
        _z: u16,
    ) -> (Status, ColorPixel) {
        let status = self.check_stream(depth_stream, self.record(NativeCall::DepthToColor));
        // Registered streams share one pixel grid
        (status, ColorPixel { x, y })
    }

    unsafe fn convert_depth_to_world(
        &self,
        depth_stream: NativeHandle,
        x: i32,
        y: i32,
        z: u16,
    ) -> (Status, WorldPoint) {
        let status = self.check_stream(depth_stream, self.record(NativeCall::DepthToWorld));
        (status, self.depth_to_world(x as f32, y as f32, z as f32))
    }

    unsafe fn convert_depth_to_world_f32(
        &self,
        depth_stream: NativeHandle,
        x: f32,
        y: f32,
        z: f32,
    ) -> (Status, WorldPoint) {
        let status = self.check_stream(depth_stream, self.record(NativeCall::DepthToWorld));
        (status, self.depth_to_world(x, y, z))
    }

    unsafe fn convert_world_to_depth(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPixel) {
        // SAFETY: forwards the caller's stream unchanged
        let (status, point) = unsafe { self.convert_world_to_depth_f32(depth_stream, world) };
        let pixel = DepthPixel {
            x: point.x.round() as i32,
            y: point.y.round() as i32,
            z: point.z.round().clamp(0.0, u16::MAX as f32) as u16,
        };
        (status, pixel)
    }

    unsafe fn convert_world_to_depth_f32(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPoint) {
        let status = self.check_stream(depth_stream, self.record(NativeCall::WorldToDepth));
        match self.world_to_depth(world) {
            Some(point) => (status, point),
            None => (Status::BAD_PARAMETER, DepthPoint::default()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dims(mode: &VideoMode) -> (usize, usize) {
    (
        mode.resolution_x.max(0) as usize,
        mode.resolution_y.max(0) as usize,
    )
}

fn sensor_for(format: NativePixelFormat) -> SensorType {
    match format {
        NativePixelFormat::DEPTH_1_MM
        | NativePixelFormat::DEPTH_100_UM
        | NativePixelFormat::SHIFT_9_2
        | NativePixelFormat::SHIFT_9_3 => SensorType::DEPTH,
        NativePixelFormat::GRAY8 | NativePixelFormat::GRAY16 => SensorType::IR,
        _ => SensorType::COLOR,
    }
}

fn depth_at(x: usize, y: usize, index: i32) -> u16 {
    (500 + (x * 7 + y * 3 + index.unsigned_abs() as usize * 11) % 4000) as u16
}

/// Pixel data in the frame's native encoding, tightly packed. `None` when the
/// mode is too large to hold in memory.
fn render_native(mode: &VideoMode, index: i32) -> Option<Box<[u8]>> {
    let (width, height) = dims(mode);
    let bpp = mode.pixel_format.native_bytes_per_pixel();
    let len = width.checked_mul(height)?.checked_mul(bpp)?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).ok()?;
    data.resize(len, 0);

    for y in 0..height {
        for x in 0..width {
            let px = &mut data[(y * width + x) * bpp..][..bpp];
            match mode.pixel_format {
                NativePixelFormat::RGB888 => px.copy_from_slice(&[x as u8, y as u8, index as u8]),
                NativePixelFormat::GRAY8 | NativePixelFormat::JPEG => {
                    px[0] = (x + y) as u8 ^ index as u8
                }
                _ => px.copy_from_slice(&depth_at(x, y, index).to_le_bytes()),
            }
        }
    }
    Some(data.into_boxed_slice())
}

/// One decoded source pixel
#[derive(Clone, Copy)]
enum Sample {
    Rgb([u8; 3]),
    Gray(u8),
    Depth(u16),
}

impl Sample {
    fn read(format: NativePixelFormat, src: &[u8], options: CopyOptions) -> Self {
        match format {
            NativePixelFormat::RGB888 => Self::Rgb([src[0], src[1], src[2]]),
            NativePixelFormat::GRAY8 => Self::Gray(src[0]),
            _ => {
                let value = u16::from_le_bytes([src[0], src[1]]);
                if options.contains(CopyOptions::DEPTH_INVERT) && value != 0 {
                    Self::Depth(u16::MAX - value)
                } else {
                    Self::Depth(value)
                }
            }
        }
    }

    fn gray8(self) -> u8 {
        match self {
            Self::Rgb([r, g, b]) => ((r as u16 + g as u16 + b as u16) / 3) as u8,
            Self::Gray(level) => level,
            Self::Depth(value) => (value >> 4).min(255) as u8,
        }
    }

    fn write(self, target: FramePixelFormat, out: &mut [u8]) {
        match (self, target) {
            (Self::Rgb(rgb), FramePixelFormat::Rgb888) => out.copy_from_slice(&rgb),
            (Self::Depth(value), FramePixelFormat::Gray16) => {
                out.copy_from_slice(&value.to_le_bytes())
            }
            (_, FramePixelFormat::Rgb888) => out.fill(self.gray8()),
            (_, FramePixelFormat::Gray8) => out[0] = self.gray8(),
            (_, FramePixelFormat::Gray16) => {
                out.copy_from_slice(&((self.gray8() as u16) << 8).to_le_bytes())
            }
        }
    }
}

/// Convert a frame into `dst`, the way the native copy does
fn copy_to(frame: &SyntheticFrame, dst: &mut [u8], dst_stride: usize, options: CopyOptions) -> Status {
    let source = frame.mode.pixel_format;
    let Ok(target) = map_format(source, options) else {
        return Status::NOT_SUPPORTED;
    };
    if !matches!(
        source,
        NativePixelFormat::RGB888
            | NativePixelFormat::GRAY8
            | NativePixelFormat::GRAY16
            | NativePixelFormat::DEPTH_1_MM
            | NativePixelFormat::DEPTH_100_UM
    ) {
        return Status::NOT_SUPPORTED;
    }

    let (width, height) = frame.dims();
    let in_bpp = source.native_bytes_per_pixel();
    let out_bpp = target.bytes_per_pixel();
    let size = FrameSize {
        width: frame.mode.resolution_x,
        height: frame.mode.resolution_y,
    };
    if !destination_fits(size, out_bpp, dst_stride, dst.len()) {
        return Status::BAD_PARAMETER;
    }
    // Frames too large to render carry no pixels
    let rendered = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(in_bpp));
    if rendered.map_or(true, |len| frame.data.len() < len) {
        return Status::ERROR;
    }

    for y in 0..height {
        for x in 0..width {
            let src = &frame.data[(y * width + x) * in_bpp..][..in_bpp];
            let out = &mut dst[y * dst_stride + x * out_bpp..][..out_bpp];
            Sample::read(source, src, options).write(target, out);
        }
    }
    Status::OK
}
