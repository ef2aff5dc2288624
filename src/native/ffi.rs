//! Bindings to the NiWrapper C library
//!
//! # Ownership
//!
//! - Frame handles come from `VideoStream_readFrame` and are owned by the
//!   caller until `VideoFrameRef_release`
//! - The video mode returned by `VideoFrameRef_getVideoMode` belongs to the
//!   frame; it is read field by field and never freed here
//! - `VideoFrameRef_getData` points into the frame and dies with it
//!
//! # Safety
//!
//! Every method relies on the [`NativeApi`] contract for handle liveness.
//! The copy destination is checked against the frame's own size before the
//! native copy runs.

use std::ptr;

use libc::{c_int, c_void};

use super::{
    destination_fits, CroppingOrigin, FrameSize, NativeApi, NativeHandle, NativePixelFormat,
    SensorType, Status, VideoMode,
};
use crate::capture::format::{map_format, CopyOptions};
use crate::convert::{ColorPixel, DepthPixel, DepthPoint, WorldPoint};

#[link(name = "NiWrapper")]
extern "C" {
    fn VideoFrameRef_copyDataTo(
        object: *mut c_void,
        dst_data: *mut c_void,
        dst_stride: c_int,
        options: c_int,
    );
    fn VideoFrameRef_getCroppingOrigin(
        object: *mut c_void,
        origin_x: *mut c_int,
        origin_y: *mut c_int,
    ) -> bool;
    fn VideoFrameRef_getData(object: *mut c_void) -> *const c_void;
    fn VideoFrameRef_getDataSize(object: *mut c_void) -> c_int;
    fn VideoFrameRef_getFrameIndex(object: *mut c_void) -> c_int;
    fn VideoFrameRef_getSensorType(object: *mut c_void) -> c_int;
    fn VideoFrameRef_getSize(object: *mut c_void, w: *mut c_int, h: *mut c_int);
    fn VideoFrameRef_getStrideInBytes(object: *mut c_void) -> c_int;
    fn VideoFrameRef_getTimestamp(object: *mut c_void) -> u64;
    fn VideoFrameRef_getVideoMode(object: *mut c_void) -> *mut c_void;
    fn VideoFrameRef_release(object: *mut c_void);

    fn VideoMode_getPixelFormat(object: *mut c_void) -> c_int;
    fn VideoMode_getResolutionX(object: *mut c_void) -> c_int;
    fn VideoMode_getResolutionY(object: *mut c_void) -> c_int;
    fn VideoMode_getFps(object: *mut c_void) -> c_int;

    fn VideoStream_readFrame(object: *mut c_void, frame: *mut *mut c_void) -> c_int;

    fn CoordinateConverter_convertDepthToColor(
        depth_stream: *mut c_void,
        color_stream: *mut c_void,
        depth_x: c_int,
        depth_y: c_int,
        depth_z: u16,
        color_x: *mut c_int,
        color_y: *mut c_int,
    ) -> c_int;
    fn CoordinateConverter_convertDepthToWorld(
        depth_stream: *mut c_void,
        depth_x: c_int,
        depth_y: c_int,
        depth_z: u16,
        world_x: *mut f32,
        world_y: *mut f32,
        world_z: *mut f32,
    ) -> c_int;
    fn CoordinateConverter_convertDepthToWorld_Float(
        depth_stream: *mut c_void,
        depth_x: f32,
        depth_y: f32,
        depth_z: f32,
        world_x: *mut f32,
        world_y: *mut f32,
        world_z: *mut f32,
    ) -> c_int;
    fn CoordinateConverter_convertWorldToDepth(
        depth_stream: *mut c_void,
        world_x: f32,
        world_y: f32,
        world_z: f32,
        depth_x: *mut c_int,
        depth_y: *mut c_int,
        depth_z: *mut u16,
    ) -> c_int;
    fn CoordinateConverter_convertWorldToDepth_Float(
        depth_stream: *mut c_void,
        world_x: f32,
        world_y: f32,
        world_z: f32,
        depth_x: *mut f32,
        depth_y: *mut f32,
        depth_z: *mut f32,
    ) -> c_int;
}

/// The linked NiWrapper library
#[derive(Debug, Default, Clone, Copy)]
pub struct NiWrapper;

impl NativeApi for NiWrapper {
    unsafe fn frame_copy_data_to(
        &self,
        frame: NativeHandle,
        dst: &mut [u8],
        dst_stride: usize,
        options: CopyOptions,
    ) -> Status {
        let Ok(stride) = c_int::try_from(dst_stride) else {
            return Status::BAD_PARAMETER;
        };
        // SAFETY: `frame` is live per the trait contract
        let mode = unsafe { self.frame_video_mode(frame) };
        let Ok(target) = map_format(mode.pixel_format, options) else {
            return Status::NOT_SUPPORTED;
        };
        // SAFETY: `frame` is live per the trait contract
        let size = unsafe { self.frame_size(frame) };
        if !destination_fits(size, target.bytes_per_pixel(), dst_stride, dst.len()) {
            return Status::BAD_PARAMETER;
        }
        // SAFETY: `dst` covers `dst_stride` bytes for each of the frame's rows,
        // checked above; the native copy writes no further.
        unsafe {
            VideoFrameRef_copyDataTo(
                frame.as_ptr(),
                dst.as_mut_ptr().cast(),
                stride,
                options.bits() as c_int,
            )
        };
        // The native copy has no status; it always "succeeds"
        Status::OK
    }

    unsafe fn frame_cropping_origin(&self, frame: NativeHandle) -> Option<CroppingOrigin> {
        let (mut x, mut y) = (0, 0);
        // SAFETY: live frame; both out pointers are valid locals
        let enabled = unsafe { VideoFrameRef_getCroppingOrigin(frame.as_ptr(), &mut x, &mut y) };
        enabled.then_some(CroppingOrigin { x, y })
    }

    unsafe fn frame_data(&self, frame: NativeHandle) -> *const u8 {
        // SAFETY: live frame; the returned pointer is only dereferenced by the
        // wrapper while it still owns the frame
        unsafe { VideoFrameRef_getData(frame.as_ptr()) }.cast()
    }

    unsafe fn frame_data_size(&self, frame: NativeHandle) -> i32 {
        // SAFETY: live frame, scalar getter
        unsafe { VideoFrameRef_getDataSize(frame.as_ptr()) }
    }

    unsafe fn frame_stride_in_bytes(&self, frame: NativeHandle) -> i32 {
        // SAFETY: live frame, scalar getter
        unsafe { VideoFrameRef_getStrideInBytes(frame.as_ptr()) }
    }

    unsafe fn frame_index(&self, frame: NativeHandle) -> i32 {
        // SAFETY: live frame, scalar getter
        unsafe { VideoFrameRef_getFrameIndex(frame.as_ptr()) }
    }

    unsafe fn frame_sensor_type(&self, frame: NativeHandle) -> SensorType {
        // SAFETY: live frame, scalar getter
        SensorType(unsafe { VideoFrameRef_getSensorType(frame.as_ptr()) })
    }

    unsafe fn frame_timestamp(&self, frame: NativeHandle) -> u64 {
        // SAFETY: live frame, scalar getter
        unsafe { VideoFrameRef_getTimestamp(frame.as_ptr()) }
    }

    unsafe fn frame_size(&self, frame: NativeHandle) -> FrameSize {
        let (mut width, mut height) = (0, 0);
        // SAFETY: live frame; both out pointers are valid locals
        unsafe { VideoFrameRef_getSize(frame.as_ptr(), &mut width, &mut height) };
        FrameSize { width, height }
    }

    unsafe fn frame_video_mode(&self, frame: NativeHandle) -> VideoMode {
        // SAFETY: live frame; the mode is borrowed from it and not freed here
        let mode = unsafe { VideoFrameRef_getVideoMode(frame.as_ptr()) };
        if mode.is_null() {
            return VideoMode {
                pixel_format: NativePixelFormat(0),
                resolution_x: 0,
                resolution_y: 0,
                fps: 0,
            };
        }
        // SAFETY: `mode` is non-null and lives as long as the frame
        unsafe {
            VideoMode {
                pixel_format: NativePixelFormat(VideoMode_getPixelFormat(mode)),
                resolution_x: VideoMode_getResolutionX(mode),
                resolution_y: VideoMode_getResolutionY(mode),
                fps: VideoMode_getFps(mode),
            }
        }
    }

    unsafe fn frame_release(&self, frame: NativeHandle) {
        // SAFETY: live frame, released once by its owner
        unsafe { VideoFrameRef_release(frame.as_ptr()) }
    }

    unsafe fn stream_read_frame(&self, stream: NativeHandle) -> (Status, usize) {
        let mut frame: *mut c_void = ptr::null_mut();
        // SAFETY: live stream; the out pointer is a valid local
        let status = Status(unsafe { VideoStream_readFrame(stream.as_ptr(), &mut frame) });
        (status, frame as usize)
    }

    unsafe fn convert_depth_to_color(
        &self,
        depth_stream: NativeHandle,
        color_stream: NativeHandle,
        x: i32,
        y: i32,
        z: u16,
    ) -> (Status, ColorPixel) {
        let mut out = ColorPixel::default();
        // SAFETY: both streams live; out pointers are fields of a local
        let status = unsafe {
            CoordinateConverter_convertDepthToColor(
                depth_stream.as_ptr(),
                color_stream.as_ptr(),
                x,
                y,
                z,
                &mut out.x,
                &mut out.y,
            )
        };
        (Status(status), out)
    }

    unsafe fn convert_depth_to_world(
        &self,
        depth_stream: NativeHandle,
        x: i32,
        y: i32,
        z: u16,
    ) -> (Status, WorldPoint) {
        let mut out = WorldPoint::default();
        // SAFETY: live stream; out pointers are fields of a local
        let status = unsafe {
            CoordinateConverter_convertDepthToWorld(
                depth_stream.as_ptr(),
                x,
                y,
                z,
                &mut out.x,
                &mut out.y,
                &mut out.z,
            )
        };
        (Status(status), out)
    }

    unsafe fn convert_depth_to_world_f32(
        &self,
        depth_stream: NativeHandle,
        x: f32,
        y: f32,
        z: f32,
    ) -> (Status, WorldPoint) {
        let mut out = WorldPoint::default();
        // SAFETY: live stream; out pointers are fields of a local
        let status = unsafe {
            CoordinateConverter_convertDepthToWorld_Float(
                depth_stream.as_ptr(),
                x,
                y,
                z,
                &mut out.x,
                &mut out.y,
                &mut out.z,
            )
        };
        (Status(status), out)
    }

    unsafe fn convert_world_to_depth(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPixel) {
        let mut out = DepthPixel::default();
        // SAFETY: live stream; out pointers are fields of a local
        let status = unsafe {
            CoordinateConverter_convertWorldToDepth(
                depth_stream.as_ptr(),
                world.x,
                world.y,
                world.z,
                &mut out.x,
                &mut out.y,
                &mut out.z,
            )
        };
        (Status(status), out)
    }

    unsafe fn convert_world_to_depth_f32(
        &self,
        depth_stream: NativeHandle,
        world: WorldPoint,
    ) -> (Status, DepthPoint) {
        let mut out = DepthPoint::default();
        // SAFETY: live stream; out pointers are fields of a local
        let status = unsafe {
            CoordinateConverter_convertWorldToDepth_Float(
                depth_stream.as_ptr(),
                world.x,
                world.y,
                world.z,
                &mut out.x,
                &mut out.y,
                &mut out.z,
            )
        };
        (Status(status), out)
    }
}
