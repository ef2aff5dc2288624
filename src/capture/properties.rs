//! Per-frame property cache
//!
//! A native frame never changes after it is handed out, so each attribute is
//! fetched at most once per wrapper. Cells are single-threaded; a wrapper
//! holding this cache is `!Sync`.
//!
//! Every getter is `unsafe`: `frame` must be live on `api` for an uncached
//! read to be sound.

use once_cell::unsync::OnceCell;

use crate::native::{CroppingOrigin, FrameSize, NativeApi, NativeHandle, SensorType, VideoMode};

#[derive(Debug, Default)]
pub(crate) struct FrameProperties {
    frame_index: OnceCell<i32>,
    timestamp: OnceCell<u64>,
    size: OnceCell<FrameSize>,
    stride_in_bytes: OnceCell<i32>,
    data_size: OnceCell<i32>,
    data: OnceCell<usize>,
    sensor_type: OnceCell<SensorType>,
    /// `Some(None)` once cropping has been queried and found disabled
    cropping_origin: OnceCell<Option<CroppingOrigin>>,
    video_mode: OnceCell<VideoMode>,
}

impl FrameProperties {
    pub unsafe fn frame_index<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> i32 {
        *self.frame_index.get_or_init(|| unsafe { api.frame_index(frame) })
    }

    pub unsafe fn timestamp<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> u64 {
        *self.timestamp.get_or_init(|| unsafe { api.frame_timestamp(frame) })
    }

    pub unsafe fn size<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> FrameSize {
        *self.size.get_or_init(|| unsafe { api.frame_size(frame) })
    }

    pub unsafe fn stride_in_bytes<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> i32 {
        *self
            .stride_in_bytes
            .get_or_init(|| unsafe { api.frame_stride_in_bytes(frame) })
    }

    pub unsafe fn data_size<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> i32 {
        *self.data_size.get_or_init(|| unsafe { api.frame_data_size(frame) })
    }

    /// Address of the native pixel data
    pub unsafe fn data<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> *const u8 {
        *self.data.get_or_init(|| unsafe { api.frame_data(frame) } as usize) as *const u8
    }

    pub unsafe fn sensor_type<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> SensorType {
        *self.sensor_type.get_or_init(|| unsafe { api.frame_sensor_type(frame) })
    }

    pub unsafe fn cropping_origin<A: NativeApi>(
        &self,
        api: &A,
        frame: NativeHandle,
    ) -> Option<CroppingOrigin> {
        *self
            .cropping_origin
            .get_or_init(|| unsafe { api.frame_cropping_origin(frame) })
    }

    pub unsafe fn video_mode<A: NativeApi>(&self, api: &A, frame: NativeHandle) -> VideoMode {
        *self.video_mode.get_or_init(|| unsafe { api.frame_video_mode(frame) })
    }
}
