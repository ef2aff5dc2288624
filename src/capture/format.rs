//! Output pixel formats and copy options

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::native::NativePixelFormat;

/// Pixel formats a frame buffer can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FramePixelFormat {
    Rgb888,
    Gray8,
    Gray16,
}

impl FramePixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb888 => 3,
            Self::Gray8 => 1,
            Self::Gray16 => 2,
        }
    }
}

/// Bytes per pixel of an output format
pub fn bytes_per_pixel(format: FramePixelFormat) -> usize {
    format.bytes_per_pixel()
}

/// Resolve the output format for a native encoding and copy options.
///
/// Both depth resolutions collapse to `Gray16`; the depth unit is not carried
/// by the output format.
pub fn map_format(native: NativePixelFormat, options: CopyOptions) -> Result<FramePixelFormat> {
    if options.contains(CopyOptions::FORCE_24BIT_RGB) {
        return Ok(FramePixelFormat::Rgb888);
    }

    match native {
        NativePixelFormat::RGB888 => Ok(FramePixelFormat::Rgb888),
        NativePixelFormat::GRAY8 => Ok(FramePixelFormat::Gray8),
        NativePixelFormat::DEPTH_1_MM
        | NativePixelFormat::DEPTH_100_UM
        | NativePixelFormat::GRAY16 => Ok(FramePixelFormat::Gray16),
        other => Err(Error::UnsupportedFormat(other)),
    }
}

/// Post-processing requested from the native copy.
///
/// Bit values are fixed by the native ABI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
#[repr(transparent)]
pub struct CopyOptions(u32);

impl CopyOptions {
    pub const NONE: Self = Self(0);
    pub const FORCE_24BIT_RGB: Self = Self(1);
    pub const DEPTH_FILL_LEFT_BLACK: Self = Self(2);
    pub const DEPTH_FILL_RIGHT_BLACK: Self = Self(4);
    pub const DEPTH_HISTOGRAM_EQUALIZE: Self = Self(8);
    pub const DEPTH_INVERT: Self = Self(16);
    pub const DEPTH_FILL_SHADOW: Self = Self(32);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::FORCE_24BIT_RGB, "force_24bit_rgb"),
        (Self::DEPTH_FILL_LEFT_BLACK, "depth_fill_left_black"),
        (Self::DEPTH_FILL_RIGHT_BLACK, "depth_fill_right_black"),
        (Self::DEPTH_HISTOGRAM_EQUALIZE, "depth_histogram_equalize"),
        (Self::DEPTH_INVERT, "depth_invert"),
        (Self::DEPTH_FILL_SHADOW, "depth_fill_shadow"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for CopyOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CopyOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

impl TryFrom<Vec<String>> for CopyOptions {
    type Error = String;

    fn try_from(names: Vec<String>) -> std::result::Result<Self, Self::Error> {
        names.iter().try_fold(Self::NONE, |options, name| {
            Self::NAMES
                .iter()
                .find(|(_, known)| known.eq_ignore_ascii_case(name))
                .map(|(flag, _)| options | *flag)
                .ok_or_else(|| format!("unknown copy option '{name}'"))
        })
    }
}

impl From<CopyOptions> for Vec<String> {
    fn from(options: CopyOptions) -> Self {
        options.names().map(str::to_owned).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn native_formats_map_to_output_formats() {
        let cases = [
            (NativePixelFormat::RGB888, FramePixelFormat::Rgb888),
            (NativePixelFormat::GRAY8, FramePixelFormat::Gray8),
            (NativePixelFormat::DEPTH_1_MM, FramePixelFormat::Gray16),
            (NativePixelFormat::DEPTH_100_UM, FramePixelFormat::Gray16),
            (NativePixelFormat::GRAY16, FramePixelFormat::Gray16),
        ];
        for (native, expected) in cases {
            assert_eq!(map_format(native, CopyOptions::NONE).unwrap(), expected);
        }
    }

    #[test]
    fn force_24bit_overrides_every_native_format() {
        for native in [
            NativePixelFormat::GRAY16,
            NativePixelFormat::DEPTH_100_UM,
            NativePixelFormat::GRAY8,
            NativePixelFormat::YUYV,
            NativePixelFormat(-1),
        ] {
            let options = CopyOptions::FORCE_24BIT_RGB | CopyOptions::DEPTH_INVERT;
            assert_eq!(map_format(native, options).unwrap(), FramePixelFormat::Rgb888);
        }
    }

    #[test]
    fn unknown_native_format_is_unsupported() {
        let err = map_format(NativePixelFormat(-1), CopyOptions::NONE).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(NativePixelFormat(-1))));

        // Known to the SDK but not convertible
        let err = map_format(NativePixelFormat::YUV422, CopyOptions::DEPTH_INVERT).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(NativePixelFormat::YUV422)));
    }

    #[test]
    fn bytes_per_pixel_matches_layout() {
        assert_eq!(bytes_per_pixel(FramePixelFormat::Rgb888), 3);
        assert_eq!(bytes_per_pixel(FramePixelFormat::Gray8), 1);
        assert_eq!(bytes_per_pixel(FramePixelFormat::Gray16), 2);
    }

    #[test]
    fn copy_options_parse_from_config_names() {
        let options = CopyOptions::try_from(vec![
            "force_24bit_rgb".to_string(),
            "DEPTH_INVERT".to_string(),
        ])
        .unwrap();
        assert_eq!(options.bits(), 17);
        assert_eq!(options.to_string(), "force_24bit_rgb|depth_invert");
        assert!(CopyOptions::try_from(vec!["sharpen".to_string()]).is_err());
    }
}
