//! Owning wrapper around a native frame handle

use std::fmt;
use std::slice;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::capture::buffer::{FrameBufferManager, FrameShape, FrameView};
use crate::capture::format::{map_format, CopyOptions};
use crate::capture::properties::FrameProperties;
use crate::error::{Error, Result};
use crate::native::{
    CroppingOrigin, FrameSize, NativeApi, NativeHandle, SensorType, VideoMode,
};

/// A frame owned by the native layer.
///
/// The wrapper owns exactly one native handle and releases it once, either
/// through [`dispose`](Self::dispose) or on drop. Properties are fetched
/// lazily and cached for the lifetime of the handle. Every accessor fails with
/// [`Error::InvalidHandle`] once the handle is gone.
///
/// Wrappers come from a source that hands out fresh frames
/// ([`FrameGrabber`](crate::FrameGrabber),
/// [`SyntheticSensor::open_frame`](crate::SyntheticSensor::open_frame)) or
/// from [`from_raw`](Self::from_raw), whose caller vouches for ownership.
/// The handle itself never leaves the wrapper except through
/// [`into_raw`](Self::into_raw), so no two wrappers can share one.
pub struct VideoFrameRef<A: NativeApi> {
    api: Arc<A>,
    handle: Option<NativeHandle>,
    properties: FrameProperties,
    buffer: FrameBufferManager,
}

/// Cached property read against a live frame
type PropertyRead<A, T> = unsafe fn(&FrameProperties, &A, NativeHandle) -> T;

impl<A: NativeApi> VideoFrameRef<A> {
    /// Take ownership of a frame handle handed out by `api` with no other owner
    pub(crate) fn adopt(api: Arc<A>, handle: NativeHandle) -> Self {
        trace!(handle = handle.as_raw(), "wrapping native frame");
        Self {
            api,
            handle: Some(handle),
            properties: FrameProperties::default(),
            buffer: FrameBufferManager::new(),
        }
    }

    /// Take ownership of a raw frame handle. A zero handle yields an invalid
    /// frame that never calls into `api`.
    ///
    /// # Safety
    ///
    /// A non-zero `raw` must be a live frame of `api` that the caller owns and
    /// hands over: nothing else may use or release it afterwards.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use niwrapper::native::{NativePixelFormat, VideoMode};
    /// use niwrapper::{SyntheticSensor, VideoFrameRef};
    ///
    /// let sensor = Arc::new(SyntheticSensor::new(VideoMode {
    ///     pixel_format: NativePixelFormat::GRAY8,
    ///     resolution_x: 4,
    ///     resolution_y: 4,
    ///     fps: 30,
    /// }));
    /// let raw = sensor.open_frame().into_raw().unwrap();
    /// // SAFETY: `raw` was given up by its only owner
    /// let frame = unsafe { VideoFrameRef::from_raw(sensor.clone(), raw) };
    /// assert!(frame.is_valid());
    /// ```
    ///
    /// Adopting a handle is never possible without `unsafe`:
    ///
    /// ```compile_fail
    /// use std::sync::Arc;
    /// use niwrapper::native::{NativePixelFormat, VideoMode};
    /// use niwrapper::{SyntheticSensor, VideoFrameRef};
    ///
    /// let sensor = Arc::new(SyntheticSensor::new(VideoMode {
    ///     pixel_format: NativePixelFormat::GRAY8,
    ///     resolution_x: 4,
    ///     resolution_y: 4,
    ///     fps: 30,
    /// }));
    /// let frame = sensor.open_frame();
    /// let twin = VideoFrameRef::from_raw(sensor.clone(), frame.handle().unwrap());
    /// ```
    pub unsafe fn from_raw(api: Arc<A>, raw: usize) -> Self {
        match NativeHandle::new(raw) {
            Some(handle) => Self::adopt(api, handle),
            None => {
                trace!("wrapping zero frame handle");
                Self {
                    api,
                    handle: None,
                    properties: FrameProperties::default(),
                    buffer: FrameBufferManager::new(),
                }
            }
        }
    }

    /// Give up ownership without releasing the native frame
    pub fn into_raw(mut self) -> Option<usize> {
        self.handle.take().map(NativeHandle::as_raw)
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    /// Raw value of the owned handle
    pub fn handle(&self) -> Result<usize> {
        self.native().map(NativeHandle::as_raw)
    }

    fn native(&self) -> Result<NativeHandle> {
        self.handle.ok_or(Error::InvalidHandle)
    }

    fn cached<T>(&self, read: PropertyRead<A, T>) -> Result<T> {
        let handle = self.native()?;
        // SAFETY: the wrapper owns `handle` and only `dispose` releases it
        Ok(unsafe { read(&self.properties, &*self.api, handle) })
    }

    pub fn frame_index(&self) -> Result<i32> {
        self.cached(FrameProperties::frame_index)
    }

    /// Native timestamp, microseconds
    pub fn timestamp(&self) -> Result<u64> {
        self.cached(FrameProperties::timestamp)
    }

    pub fn size(&self) -> Result<FrameSize> {
        self.cached(FrameProperties::size)
    }

    pub fn stride_in_bytes(&self) -> Result<i32> {
        self.cached(FrameProperties::stride_in_bytes)
    }

    pub fn data_size(&self) -> Result<usize> {
        Ok(self.cached(FrameProperties::data_size)?.max(0) as usize)
    }

    /// The frame's own pixel data in its native encoding
    pub fn data(&self) -> Result<&[u8]> {
        let len = self.data_size()?;
        let ptr = self.cached(FrameProperties::data)?;
        if ptr.is_null() || len == 0 {
            return Ok(&[]);
        }
        // SAFETY: the native frame keeps `data_size` bytes at this address
        // until it is released, and release needs `&mut self`.
        Ok(unsafe { slice::from_raw_parts(ptr, len) })
    }

    pub fn sensor_type(&self) -> Result<SensorType> {
        self.cached(FrameProperties::sensor_type)
    }

    /// Cropping window origin, `None` when cropping is disabled
    pub fn cropping_origin(&self) -> Result<Option<CroppingOrigin>> {
        self.cached(FrameProperties::cropping_origin)
    }

    pub fn video_mode(&self) -> Result<VideoMode> {
        self.cached(FrameProperties::video_mode)
    }

    /// Copy the frame into this wrapper's own buffer.
    ///
    /// The view borrows the wrapper; use a shared [`FrameBufferManager`] with
    /// [`FrameBufferManager::get_frame`] to reuse one buffer across frames.
    pub fn get_frame(&mut self, options: CopyOptions) -> Result<FrameView<'_>> {
        let (handle, shape) = self.target(options)?;
        let api = &self.api;
        self.buffer.fill(shape, |dst, stride| {
            // SAFETY: `handle` is owned by this wrapper and still live
            unsafe { api.frame_copy_data_to(handle, dst, stride, options) }
        })
    }

    pub(crate) fn copy_into<'b>(
        &self,
        buffer: &'b mut FrameBufferManager,
        options: CopyOptions,
    ) -> Result<FrameView<'b>> {
        let (handle, shape) = self.target(options)?;
        let api = &self.api;
        buffer.fill(shape, |dst, stride| {
            // SAFETY: `handle` is owned by this wrapper and still live
            unsafe { api.frame_copy_data_to(handle, dst, stride, options) }
        })
    }

    /// Resolve the handle and the output layout before any buffer work
    fn target(&self, options: CopyOptions) -> Result<(NativeHandle, FrameShape)> {
        let handle = self.native()?;
        let mode = self.video_mode()?;
        let format = map_format(mode.pixel_format, options)?;
        let size = self.size()?;
        let shape = FrameShape::new(
            size.width.max(0) as u32,
            size.height.max(0) as u32,
            format,
        );
        Ok((handle, shape))
    }

    /// Release the native frame and the frame's buffer. Safe to call again.
    pub fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: taken out of `self.handle`, so this is the only release
            unsafe { self.api.frame_release(handle) };
            metrics::counter!("native_frames_released").increment(1);
            debug!(handle = handle.as_raw(), "released native frame");
        }
        self.buffer.release();
    }
}

impl<A: NativeApi> Drop for VideoFrameRef<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<A: NativeApi> fmt::Debug for VideoFrameRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrameRef")
            .field("handle", &self.handle)
            .field("buffer", &self.buffer.shape())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format::FramePixelFormat;
    use crate::native::{NativeCall, NativePixelFormat, Status, SyntheticSensor};
    use pretty_assertions::assert_eq;

    fn depth_sensor() -> Arc<SyntheticSensor> {
        Arc::new(SyntheticSensor::new(VideoMode {
            pixel_format: NativePixelFormat::DEPTH_1_MM,
            resolution_x: 6,
            resolution_y: 4,
            fps: 30,
        }))
    }

    #[test]
    fn dispose_releases_once() {
        let sensor = depth_sensor();
        let mut frame = sensor.open_frame();

        frame.dispose();
        frame.dispose();
        drop(frame);

        assert_eq!(sensor.calls(NativeCall::Release), 1);
        assert_eq!(sensor.live_frames(), 0);
    }

    #[test]
    fn drop_releases_the_handle() {
        let sensor = depth_sensor();
        {
            let frame = sensor.open_frame();
            assert!(frame.is_valid());
        }
        assert_eq!(sensor.calls(NativeCall::Release), 1);
    }

    #[test]
    fn accessors_fail_after_dispose_even_when_cached() {
        let sensor = depth_sensor();
        let mut frame = sensor.open_frame();
        assert_eq!(frame.size().unwrap(), FrameSize { width: 6, height: 4 });

        frame.dispose();

        assert!(matches!(frame.size(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.timestamp(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.cropping_origin(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.handle(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.get_frame(CopyOptions::NONE), Err(Error::InvalidHandle)));
        assert_eq!(sensor.calls(NativeCall::Size), 1);
        assert_eq!(sensor.calls(NativeCall::CopyDataTo), 0);
    }

    #[test]
    fn zero_handle_never_reaches_the_native_layer() {
        let sensor = depth_sensor();
        // SAFETY: zero is never a live frame
        let mut frame = unsafe { VideoFrameRef::from_raw(sensor.clone(), 0) };

        assert!(!frame.is_valid());
        assert!(matches!(frame.frame_index(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.data(), Err(Error::InvalidHandle)));
        assert!(matches!(frame.get_frame(CopyOptions::NONE), Err(Error::InvalidHandle)));
        drop(frame);

        assert_eq!(sensor.total_calls(), 0);
    }

    #[test]
    fn into_raw_hands_ownership_back() {
        let sensor = depth_sensor();
        let frame = sensor.open_frame();
        let expected = frame.handle().unwrap();

        let raw = frame.into_raw().unwrap();
        assert_eq!(raw, expected);
        assert_eq!(sensor.calls(NativeCall::Release), 0);
        assert_eq!(sensor.live_frames(), 1);

        // SAFETY: `raw` was given up by its only owner above
        let frame = unsafe { VideoFrameRef::from_raw(sensor.clone(), raw) };
        assert_eq!(frame.size().unwrap(), FrameSize { width: 6, height: 4 });
        drop(frame);
        assert_eq!(sensor.calls(NativeCall::Release), 1);
        assert_eq!(sensor.live_frames(), 0);
    }

    #[test]
    fn get_frame_copies_depth_as_gray16() {
        let sensor = depth_sensor();
        let mut frame = sensor.open_frame();
        let native = frame.data().unwrap().to_vec();

        let view = frame.get_frame(CopyOptions::NONE).unwrap();
        assert_eq!((view.width, view.height), (6, 4));
        assert_eq!(view.format, FramePixelFormat::Gray16);
        assert_eq!(view.stride, 12);
        // Depth copies unchanged into a tightly packed buffer
        assert_eq!(view.data, &native[..]);
    }

    #[test]
    fn get_frame_reuses_its_buffer() {
        let sensor = depth_sensor();
        let mut frame = sensor.open_frame();

        let first = frame.get_frame(CopyOptions::NONE).unwrap().data.as_ptr();
        let second = frame.get_frame(CopyOptions::DEPTH_INVERT).unwrap().data.as_ptr();
        assert_eq!(first, second);

        let third = frame.get_frame(CopyOptions::FORCE_24BIT_RGB).unwrap();
        assert_eq!(third.format, FramePixelFormat::Rgb888);
        assert_eq!(third.data.len(), 6 * 4 * 3);

        assert_eq!(sensor.calls(NativeCall::VideoMode), 1);
        assert_eq!(sensor.calls(NativeCall::CopyDataTo), 3);
    }

    #[test]
    fn unsupported_format_fails_before_copying() {
        let sensor = Arc::new(SyntheticSensor::new(VideoMode {
            pixel_format: NativePixelFormat::YUYV,
            resolution_x: 4,
            resolution_y: 4,
            fps: 30,
        }));
        let mut frame = sensor.open_frame();

        let err = frame.get_frame(CopyOptions::NONE).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(NativePixelFormat::YUYV)));
        assert_eq!(sensor.calls(NativeCall::CopyDataTo), 0);
    }

    #[test]
    fn copy_failure_is_surfaced_verbatim() {
        let sensor = depth_sensor();
        sensor.fail(NativeCall::CopyDataTo, Status(42));
        let mut frame = sensor.open_frame();

        let err = frame.get_frame(CopyOptions::NONE).unwrap_err();
        assert!(matches!(err, Error::NativeCallFailed { status: Status(42) }));
    }
}
