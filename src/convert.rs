//! Coordinate conversion between depth, color and world space
//!
//! Thin validating wrappers over the native converter. Every call returns the
//! native [`Status`] next to the converted point; when the status is not
//! success the point is zeroed, so callers that skip the check read zeros
//! rather than whatever the native layer left behind.

use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::native::{NativeApi, NativeHandle, Status};

/// Pixel position in the color image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorPixel {
    pub x: i32,
    pub y: i32,
}

/// Position in world space, millimeters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorldPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Depth-image pixel with its raw depth value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthPixel {
    pub x: i32,
    pub y: i32,
    pub z: u16,
}

/// Sub-pixel depth-image position
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepthPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Outcome of a native conversion
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub struct Converted<T> {
    pub status: Status,
    pub point: T,
}

impl<T: Default> Converted<T> {
    fn from_native((status, point): (Status, T)) -> Self {
        if status.is_ok() {
            Self { status, point }
        } else {
            trace!(%status, "native conversion failed");
            Self {
                status,
                point: T::default(),
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn into_result(self) -> Result<T> {
        self.status.check().map(|()| self.point)
    }
}

/// Converts coordinates through a depth stream's calibration.
///
/// Streams are passed as raw handles. Zero is rejected with
/// [`Error::InvalidHandle`] before any native call; other values reach the
/// native layer unchecked.
pub struct CoordinateConverter<A: NativeApi> {
    api: Arc<A>,
}

impl<A: NativeApi> CoordinateConverter<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    /// Map a depth pixel onto the registered color image
    ///
    /// # Safety
    ///
    /// Non-zero streams must be started streams of this converter's API.
    pub unsafe fn convert_depth_to_color(
        &self,
        depth_stream: usize,
        color_stream: usize,
        x: i32,
        y: i32,
        z: u16,
    ) -> Result<Converted<ColorPixel>> {
        let depth = stream(depth_stream)?;
        let color = stream(color_stream)?;
        // SAFETY: non-zero streams are live per the caller's contract
        let native = unsafe { self.api.convert_depth_to_color(depth, color, x, y, z) };
        Ok(Converted::from_native(native))
    }

    /// # Safety
    ///
    /// Non-zero streams must be started streams of this converter's API.
    pub unsafe fn convert_depth_to_world(
        &self,
        depth_stream: usize,
        x: i32,
        y: i32,
        z: u16,
    ) -> Result<Converted<WorldPoint>> {
        let depth = stream(depth_stream)?;
        // SAFETY: non-zero streams are live per the caller's contract
        let native = unsafe { self.api.convert_depth_to_world(depth, x, y, z) };
        Ok(Converted::from_native(native))
    }

    /// # Safety
    ///
    /// Non-zero streams must be started streams of this converter's API.
    pub unsafe fn convert_depth_to_world_f32(
        &self,
        depth_stream: usize,
        x: f32,
        y: f32,
        z: f32,
    ) -> Result<Converted<WorldPoint>> {
        let depth = stream(depth_stream)?;
        // SAFETY: non-zero streams are live per the caller's contract
        let native = unsafe { self.api.convert_depth_to_world_f32(depth, x, y, z) };
        Ok(Converted::from_native(native))
    }

    /// # Safety
    ///
    /// Non-zero streams must be started streams of this converter's API.
    pub unsafe fn convert_world_to_depth(
        &self,
        depth_stream: usize,
        world: WorldPoint,
    ) -> Result<Converted<DepthPixel>> {
        let depth = stream(depth_stream)?;
        // SAFETY: non-zero streams are live per the caller's contract
        let native = unsafe { self.api.convert_world_to_depth(depth, world) };
        Ok(Converted::from_native(native))
    }

    /// # Safety
    ///
    /// Non-zero streams must be started streams of this converter's API.
    pub unsafe fn convert_world_to_depth_f32(
        &self,
        depth_stream: usize,
        world: WorldPoint,
    ) -> Result<Converted<DepthPoint>> {
        let depth = stream(depth_stream)?;
        // SAFETY: non-zero streams are live per the caller's contract
        let native = unsafe { self.api.convert_world_to_depth_f32(depth, world) };
        Ok(Converted::from_native(native))
    }
}

fn stream(raw: usize) -> Result<NativeHandle> {
    NativeHandle::new(raw).ok_or(Error::InvalidHandle)
}
