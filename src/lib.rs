#![warn(unsafe_op_in_unsafe_fn)]

pub mod capture;
pub mod convert;
pub mod error;
pub mod native;

use std::path::Path;

use arc_swap::ArcSwap;
use native::{NativePixelFormat, VideoMode};
use serde::{Deserialize, Serialize};

pub use capture::{
    map_format, CopyOptions, Frame, FrameBufferManager, FrameGrabber, FramePixelFormat,
    FrameView, VideoFrameRef,
};
pub use convert::{CoordinateConverter, Converted};
pub use error::{Error, Result};
pub use native::{NativeApi, NativeHandle, Status, SyntheticSensor};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "NIWRAPPER";

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Grab tool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grab: GrabConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    pub frames: u32,
    pub options: CopyOptions,
}

/// Stream produced by the synthetic sensor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: NativePixelFormat,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            options: CopyOptions::NONE,
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            pixel_format: NativePixelFormat::DEPTH_1_MM,
        }
    }
}

impl SyntheticConfig {
    pub fn video_mode(&self) -> VideoMode {
        VideoMode {
            pixel_format: self.pixel_format,
            resolution_x: self.width.min(i32::MAX as u32) as i32,
            resolution_y: self.height.min(i32::MAX as u32) as i32,
            fps: self.fps.min(i32::MAX as u32) as i32,
        }
    }
}

impl Config {
    /// Load defaults, then an optional TOML file, then `NIWRAPPER__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("grab.options")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_describe_a_vga_depth_stream() {
        let config = Config::default();
        assert_eq!(config.grab.frames, 30);
        assert_eq!(config.synthetic.video_mode().resolution_x, 640);
        assert_eq!(config.synthetic.pixel_format, NativePixelFormat::DEPTH_1_MM);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[grab]
frames = 5
options = ["force_24bit_rgb", "depth_invert"]

[synthetic]
width = 320
pixel_format = "gray8"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.grab.frames, 5);
        assert_eq!(
            config.grab.options,
            CopyOptions::FORCE_24BIT_RGB | CopyOptions::DEPTH_INVERT
        );
        assert_eq!(config.synthetic.width, 320);
        assert_eq!(config.synthetic.height, 480);
        assert_eq!(config.synthetic.pixel_format, NativePixelFormat::GRAY8);
    }

    #[test]
    fn unknown_pixel_format_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[synthetic]\npixel_format = \"bayer\"").unwrap();

        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
