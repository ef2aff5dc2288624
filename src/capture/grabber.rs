//! Capture loop over a started native stream

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::capture::buffer::FrameBufferManager;
use crate::capture::format::CopyOptions;
use crate::capture::frame::{Frame, FrameMetadata};
use crate::capture::video_frame::VideoFrameRef;
use crate::error::Result;
use crate::native::{NativeApi, NativeHandle};

/// Reads frames from one stream into a single long-lived buffer
pub struct FrameGrabber<A: NativeApi> {
    api: Arc<A>,
    stream: NativeHandle,
    options: CopyOptions,
    buffer: FrameBufferManager,
    sequence: u64,
}

impl<A: NativeApi> FrameGrabber<A> {
    /// Attach to `stream`. Every frame read from it is owned by the grabber
    /// until released at the end of [`grab`](Self::grab).
    ///
    /// # Safety
    ///
    /// `stream` must be a started stream of `api` that stays open for as long
    /// as the grabber is used.
    pub unsafe fn new(api: Arc<A>, stream: NativeHandle, options: CopyOptions) -> Self {
        info!(stream = stream.as_raw(), %options, "Frame grabber attached");
        Self {
            api,
            stream,
            options,
            buffer: FrameBufferManager::new(),
            sequence: 0,
        }
    }

    /// Read the next frame, copy it through the shared buffer and out.
    ///
    /// The native frame is released before returning.
    #[instrument(skip(self), fields(stream = self.stream.as_raw()))]
    pub fn grab(&mut self) -> Result<Frame> {
        let timestamp = Instant::now();

        // SAFETY: the stream stays open for the grabber's lifetime
        let (status, raw) = unsafe { self.api.stream_read_frame(self.stream) };
        status.check()?;
        // SAFETY: a successful read hands the caller sole ownership of `raw`
        let mut native = unsafe { VideoFrameRef::from_raw(self.api.clone(), raw) };

        let view = self.buffer.get_frame(&native, self.options)?;
        let data = view.to_bytes();
        let (width, height, stride, format) = (view.width, view.height, view.stride, view.format);

        self.sequence += 1;

        let meta = Arc::new(FrameMetadata {
            sequence: self.sequence,
            width,
            height,
            stride,
            format,
            native_format: native.video_mode()?.pixel_format,
            frame_index: native.frame_index()?,
            sensor_type: native.sensor_type()?,
            device_timestamp: Duration::from_micros(native.timestamp()?),
        });
        native.dispose();

        Ok(Frame {
            data,
            meta,
            timestamp,
        })
    }

    /// Buffer shared by every grab
    pub fn buffer(&self) -> &FrameBufferManager {
        &self.buffer
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_options(&mut self, options: CopyOptions) {
        self.options = options;
    }
}
