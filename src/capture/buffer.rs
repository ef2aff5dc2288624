//! Reusable destination buffer for native frame copies

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::capture::format::{CopyOptions, FramePixelFormat};
use crate::capture::video_frame::VideoFrameRef;
use crate::error::{Error, Result};
use crate::native::{NativeApi, Status};

/// Dimensions and layout of a filled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    /// Row length in bytes, no padding
    pub stride: usize,
    pub format: FramePixelFormat,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, format: FramePixelFormat) -> Self {
        Self {
            width,
            height,
            stride: (width as usize).saturating_mul(format.bytes_per_pixel()),
            format,
        }
    }

    /// Total buffer length, `None` if it does not fit in `usize`
    pub fn byte_len(&self) -> Option<usize> {
        self.stride.checked_mul(self.height as usize)
    }

    fn same_layout(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }
}

/// Pixels of the most recent copy, borrowed from the manager.
///
/// Valid until the next fill or release of the manager; copy out with
/// [`FrameView::to_bytes`] to keep it longer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: FramePixelFormat,
}

impl FrameView<'_> {
    pub fn shape(&self) -> FrameShape {
        FrameShape {
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
        }
    }

    /// Copy the pixels into an owned buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data)
    }
}

#[derive(Debug)]
struct HeldBuffer {
    // Boxed slice: never resized while held, so its address is stable
    data: Box<[u8]>,
    shape: FrameShape,
}

/// Owns one destination buffer and reuses it while the frame layout holds.
///
/// Allocation happens only when width, height or output format change.
/// Not shareable across threads while filling: every fill takes `&mut self`.
#[derive(Debug, Default)]
pub struct FrameBufferManager {
    held: Option<HeldBuffer>,
    stale: bool,
    allocations: u64,
}

impl FrameBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `frame` into the managed buffer, reallocating only on layout change
    pub fn get_frame<A: NativeApi>(
        &mut self,
        frame: &VideoFrameRef<A>,
        options: CopyOptions,
    ) -> Result<FrameView<'_>> {
        frame.copy_into(self, options)
    }

    /// Make sure a buffer of `shape` is held, then let `copy` write into it.
    ///
    /// `copy` receives the buffer and its stride and returns the native status.
    pub(crate) fn fill<F>(&mut self, shape: FrameShape, copy: F) -> Result<FrameView<'_>>
    where
        F: FnOnce(&mut [u8], usize) -> Status,
    {
        let held = match self.held.take() {
            Some(held) if held.shape.same_layout(&shape) => self.held.insert(held),
            old => {
                // Old buffer goes first so both never coexist
                if let Some(old) = old {
                    trace!(shape = ?old.shape, "dropping frame buffer");
                    drop(old);
                }
                let bytes = shape
                    .byte_len()
                    .ok_or(Error::AllocationFailed { bytes: usize::MAX })?;
                let data = allocate(bytes)?;
                self.allocations += 1;
                metrics::counter!("frame_buffer_allocations").increment(1);
                debug!(
                    width = shape.width,
                    height = shape.height,
                    format = ?shape.format,
                    bytes = data.len(),
                    "allocated frame buffer"
                );
                self.held.insert(HeldBuffer { data, shape })
            }
        };

        let copy_start = Instant::now();
        let status = copy(&mut held.data, held.shape.stride);
        metrics::histogram!("native_copy_time_us").record(copy_start.elapsed().as_micros() as f64);

        if let Err(e) = status.check() {
            warn!(%status, "native frame copy failed, buffer marked stale");
            self.stale = true;
            return Err(e);
        }
        self.stale = false;

        Ok(view(held))
    }

    /// Pixels of the last successful copy, `None` if nothing valid is held
    pub fn current(&self) -> Option<FrameView<'_>> {
        if self.stale {
            return None;
        }
        self.held.as_ref().map(view)
    }

    pub fn shape(&self) -> Option<FrameShape> {
        self.held.as_ref().map(|held| held.shape)
    }

    /// True after a failed copy until the next successful one
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Number of buffers allocated over the manager's lifetime
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Drop the held buffer, if any
    pub fn release(&mut self) {
        if self.held.take().is_some() {
            trace!("released frame buffer");
        }
        self.stale = false;
    }
}

fn view(held: &HeldBuffer) -> FrameView<'_> {
    FrameView {
        data: &held.data,
        width: held.shape.width,
        height: held.shape.height,
        stride: held.shape.stride,
        format: held.shape.format,
    }
}

fn allocate(bytes: usize) -> Result<Box<[u8]>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| Error::AllocationFailed { bytes })?;
    data.resize(bytes, 0);
    Ok(data.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gray(width: u32, height: u32) -> FrameShape {
        FrameShape::new(width, height, FramePixelFormat::Gray16)
    }

    #[test]
    fn shape_computes_stride_and_length() {
        let shape = FrameShape::new(640, 480, FramePixelFormat::Rgb888);
        assert_eq!(shape.stride, 1920);
        assert_eq!(shape.byte_len(), Some(1920 * 480));
    }

    #[test]
    fn identical_shape_reuses_the_allocation() {
        let mut manager = FrameBufferManager::new();

        let first = manager.fill(gray(4, 2), |_, _| Status::OK).unwrap().data.as_ptr();
        let second = manager.fill(gray(4, 2), |_, _| Status::OK).unwrap().data.as_ptr();

        assert_eq!(first, second);
        assert_eq!(manager.allocations(), 1);
    }

    #[test]
    fn changed_shape_reallocates() {
        let mut manager = FrameBufferManager::new();

        manager.fill(gray(4, 2), |_, _| Status::OK).unwrap();
        let view = manager
            .fill(FrameShape::new(4, 2, FramePixelFormat::Rgb888), |_, _| Status::OK)
            .unwrap();
        assert_eq!(view.data.len(), 24);
        assert_eq!(view.stride, 12);

        let view = manager.fill(gray(4, 3), |_, _| Status::OK).unwrap();
        assert_eq!(view.data.len(), 24);
        assert_eq!(manager.allocations(), 3);
    }

    #[test]
    fn copy_sees_buffer_and_stride() {
        let mut manager = FrameBufferManager::new();

        let view = manager
            .fill(gray(3, 2), |dst, stride| {
                assert_eq!(dst.len(), 12);
                assert_eq!(stride, 6);
                dst.fill(7);
                Status::OK
            })
            .unwrap();

        assert!(view.data.iter().all(|&b| b == 7));
        assert_eq!(view.to_bytes().len(), 12);
    }

    #[test]
    fn failed_copy_marks_buffer_stale_until_next_success() {
        let mut manager = FrameBufferManager::new();
        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();
        assert!(manager.current().is_some());

        let err = manager.fill(gray(2, 2), |_, _| Status::TIME_OUT).unwrap_err();
        assert!(matches!(err, Error::NativeCallFailed { status: Status::TIME_OUT }));
        assert!(manager.is_stale());
        assert!(manager.current().is_none());
        // Layout survives the failure
        assert_eq!(manager.shape(), Some(gray(2, 2)));

        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();
        assert!(!manager.is_stale());
        assert!(manager.current().is_some());
        assert_eq!(manager.allocations(), 1);
    }

    #[test]
    fn failed_reallocation_leaves_nothing_held() {
        let mut manager = FrameBufferManager::new();
        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();

        let huge = FrameShape::new(i32::MAX as u32, i32::MAX as u32, FramePixelFormat::Rgb888);
        let mut copied = false;
        let err = manager
            .fill(huge, |_, _| {
                copied = true;
                Status::OK
            })
            .unwrap_err();

        assert!(matches!(err, Error::AllocationFailed { .. }));
        assert!(!copied);
        assert_eq!(manager.shape(), None);
        assert!(manager.current().is_none());
        assert_eq!(manager.allocations(), 1);

        // Recovers on the next frame that fits
        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();
        assert_eq!(manager.allocations(), 2);
    }

    #[test]
    fn unrepresentable_length_is_an_allocation_failure() {
        let shape = FrameShape {
            width: u32::MAX,
            height: u32::MAX,
            stride: usize::MAX,
            format: FramePixelFormat::Rgb888,
        };
        assert_eq!(shape.byte_len(), None);

        let mut manager = FrameBufferManager::new();
        let err = manager.fill(shape, |_, _| Status::OK).unwrap_err();
        assert!(matches!(err, Error::AllocationFailed { bytes: usize::MAX }));
    }

    #[test]
    fn release_drops_the_buffer() {
        let mut manager = FrameBufferManager::new();
        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();

        manager.release();
        assert!(manager.shape().is_none());
        assert!(manager.current().is_none());

        manager.fill(gray(2, 2), |_, _| Status::OK).unwrap();
        assert_eq!(manager.allocations(), 2);
    }

    #[test]
    fn empty_frames_are_held_without_bytes() {
        let mut manager = FrameBufferManager::new();
        let view = manager.fill(gray(0, 0), |_, _| Status::OK).unwrap();
        assert!(view.data.is_empty());
    }
}
