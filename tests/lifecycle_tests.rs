//! Handle lifetime, property caching and coordinate conversion

use std::sync::Arc;

use niwrapper::convert::{DepthPixel, DepthPoint, WorldPoint};
use niwrapper::native::{
    CroppingOrigin, FrameSize, NativeCall, NativePixelFormat, SensorType, VideoMode,
};
use niwrapper::{CoordinateConverter, CopyOptions, Error, Status, SyntheticSensor, VideoFrameRef};
use pretty_assertions::assert_eq;

fn sensor() -> Arc<SyntheticSensor> {
    Arc::new(SyntheticSensor::new(VideoMode {
        pixel_format: NativePixelFormat::DEPTH_1_MM,
        resolution_x: 320,
        resolution_y: 240,
        fps: 60,
    }))
}

#[test]
fn test_scalar_accessors_query_once() {
    let sensor = sensor();
    // Skip frame index 0
    drop(sensor.open_frame());
    let frame = sensor.open_frame();

    for _ in 0..10 {
        assert_eq!(frame.frame_index().unwrap(), 1);
        assert_eq!(frame.timestamp().unwrap(), 16_666);
        assert_eq!(frame.size().unwrap(), FrameSize { width: 320, height: 240 });
        assert_eq!(frame.stride_in_bytes().unwrap(), 640);
        assert_eq!(frame.sensor_type().unwrap(), SensorType::DEPTH);
        assert_eq!(frame.video_mode().unwrap().fps, 60);
        assert_eq!(frame.data_size().unwrap(), 320 * 240 * 2);
    }

    for call in [
        NativeCall::FrameIndex,
        NativeCall::Timestamp,
        NativeCall::Size,
        NativeCall::StrideInBytes,
        NativeCall::SensorType,
        NativeCall::VideoMode,
        NativeCall::DataSize,
    ] {
        assert_eq!(sensor.calls(call), 1, "{call:?}");
    }
}

#[test]
fn test_native_data_is_borrowed_from_the_frame() {
    let sensor = sensor();
    let frame = sensor.open_frame();

    let data = frame.data().unwrap();
    assert_eq!(data.len(), 320 * 240 * 2);
    assert_eq!(frame.data().unwrap().as_ptr(), data.as_ptr());
    assert_eq!(sensor.calls(NativeCall::Data), 1);
}

#[test]
fn test_cropping_absent_is_cached() {
    let sensor = sensor();
    let frame = sensor.open_frame();

    assert_eq!(frame.cropping_origin().unwrap(), None);
    assert_eq!(frame.cropping_origin().unwrap(), None);
    assert_eq!(sensor.calls(NativeCall::CroppingOrigin), 1);
}

#[test]
fn test_cropping_present_is_cached() {
    let sensor = sensor();
    sensor.set_cropping_origin(Some(CroppingOrigin { x: 16, y: 8 }));
    let frame = sensor.open_frame();

    assert_eq!(frame.cropping_origin().unwrap(), Some(CroppingOrigin { x: 16, y: 8 }));
    assert_eq!(frame.cropping_origin().unwrap(), Some(CroppingOrigin { x: 16, y: 8 }));
    assert_eq!(sensor.calls(NativeCall::CroppingOrigin), 1);
}

#[test]
fn test_dispose_twice_releases_once() {
    let sensor = sensor();
    let mut frame = sensor.open_frame();
    frame.get_frame(CopyOptions::NONE).unwrap();

    frame.dispose();
    frame.dispose();
    assert!(matches!(frame.frame_index(), Err(Error::InvalidHandle)));
    drop(frame);

    assert_eq!(sensor.calls(NativeCall::Release), 1);
    assert_eq!(sensor.live_frames(), 0);
}

#[test]
fn test_each_wrapper_owns_its_own_frame() {
    let sensor = sensor();
    let a = sensor.open_frame();
    let b = sensor.open_frame();
    assert_ne!(a.handle().unwrap(), b.handle().unwrap());

    drop(a);
    assert_eq!(sensor.live_frames(), 1);
    assert!(b.size().is_ok());
    drop(b);
    assert_eq!(sensor.live_frames(), 0);
}

#[test]
fn test_raw_handle_moves_between_wrappers() {
    let sensor = sensor();
    let frame = sensor.open_frame();
    assert_eq!(frame.size().unwrap(), FrameSize { width: 320, height: 240 });

    let raw = frame.into_raw().unwrap();
    assert_eq!(sensor.live_frames(), 1);
    assert_eq!(sensor.calls(NativeCall::Release), 0);

    // SAFETY: `into_raw` gave up the only owner of `raw`
    let mut adopted = unsafe { VideoFrameRef::from_raw(sensor.clone(), raw) };
    assert_eq!(adopted.handle().unwrap(), raw);
    assert_eq!(adopted.size().unwrap(), FrameSize { width: 320, height: 240 });
    adopted.dispose();
    drop(adopted);

    assert_eq!(sensor.calls(NativeCall::Release), 1);
    assert_eq!(sensor.live_frames(), 0);
}

// Conversions below run against the sensor's own stream, open while the
// sensor lives.

#[test]
fn test_world_to_depth_failure_zeroes_both_variants() {
    let sensor = sensor();
    let converter = CoordinateConverter::new(sensor.clone());
    let stream = sensor.stream().as_raw();
    let world = WorldPoint { x: 120.0, y: -40.0, z: 1800.0 };

    sensor.fail(NativeCall::WorldToDepth, Status::ERROR);

    let pixel = unsafe { converter.convert_world_to_depth(stream, world) }.unwrap();
    assert_eq!(pixel.status, Status::ERROR);
    assert_eq!(pixel.point, DepthPixel { x: 0, y: 0, z: 0 });

    let point = unsafe { converter.convert_world_to_depth_f32(stream, world) }.unwrap();
    assert_eq!(point.status, Status::ERROR);
    assert_eq!(point.point, DepthPoint { x: 0.0, y: 0.0, z: 0.0 });
}

#[test]
fn test_world_to_depth_behind_camera_is_rejected_natively() {
    let sensor = sensor();
    let converter = CoordinateConverter::new(sensor.clone());
    let stream = sensor.stream().as_raw();

    let behind = WorldPoint { x: 1.0, y: 1.0, z: -5.0 };

    let pixel = unsafe { converter.convert_world_to_depth(stream, behind) }.unwrap();
    assert_eq!(pixel.status, Status::BAD_PARAMETER);
    assert_eq!(pixel.point, DepthPixel::default());
    assert!(pixel.into_result().is_err());
}

#[test]
fn test_depth_to_world_float_pixel() {
    let sensor = sensor();
    let converter = CoordinateConverter::new(sensor.clone());

    let stream = sensor.stream().as_raw();

    let world = unsafe { converter.convert_depth_to_world_f32(stream, 160.0, 120.0, 1000.0) }
        .unwrap()
        .into_result()
        .unwrap();

    // Principal point maps onto the optical axis
    assert_eq!(world, WorldPoint { x: 0.0, y: 0.0, z: 1000.0 });
}
