//! Four-character pixel format codes and output format resolution.

use crate::error::{Result, VirtualOutputError};
use crate::frame::PixelFormat;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// A four-character code packed little-endian, as used by libyuv and V4L2.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(
            (code[0] as u32)
                | ((code[1] as u32) << 8)
                | ((code[2] as u32) << 16)
                | ((code[3] as u32) << 24),
        )
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    // Canonical codes
    pub const RAW: FourCc = FourCc::new(b"raw ");
    pub const BGR24: FourCc = FourCc::new(b"24BG");
    pub const J400: FourCc = FourCc::new(b"J400");
    pub const I420: FourCc = FourCc::new(b"I420");
    pub const NV12: FourCc = FourCc::new(b"NV12");
    pub const YUY2: FourCc = FourCc::new(b"YUY2");
    pub const UYVY: FourCc = FourCc::new(b"UYVY");

    /// Normalizes aliases onto one canonical code. Unknown codes are
    /// returned unchanged.
    pub fn canonical(self) -> FourCc {
        const ALIASES: &[(FourCc, FourCc)] = &[
            (FourCc::new(b"IYUV"), FourCc::I420),
            (FourCc::new(b"YU12"), FourCc::I420),
            (FourCc::new(b"YUYV"), FourCc::YUY2),
            (FourCc::new(b"YUVS"), FourCc::YUY2),
            (FourCc::new(b"HDYC"), FourCc::UYVY),
            (FourCc::new(b"2VUY"), FourCc::UYVY),
            (FourCc::new(b"RGB3"), FourCc::RAW),
            (FourCc::new(b"CM24"), FourCc::RAW),
            (FourCc::new(b"BGR3"), FourCc::BGR24),
        ];
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == self)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl From<PixelFormat> for FourCc {
    fn from(format: PixelFormat) -> Self {
        format.fourcc()
    }
}

impl FromStr for FourCc {
    type Err = VirtualOutputError;

    /// Accepts a named pixel format (`rgb`, `bgr`, `gray`, `i420`, `nv12`,
    /// `yuyv`, `uyvy`) or a literal four-character code (`RGB3`, `raw `).
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(format) = s.parse::<PixelFormat>() {
            return Ok(format.fourcc());
        }
        match s.as_bytes() {
            &[a, b, c, d] => Ok(FourCc::new(&[a, b, c, d])),
            _ => Err(VirtualOutputError::UnknownFormat(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for FourCc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// V4L2 pixel formats written to the device
pub const V4L2_PIX_FMT_YUV420: u32 = FourCc::new(b"YU12").0;
pub const V4L2_PIX_FMT_GREY: u32 = FourCc::new(b"GREY").0;
pub const V4L2_PIX_FMT_NV12: u32 = FourCc::new(b"NV12").0;
pub const V4L2_PIX_FMT_YUYV: u32 = FourCc::new(b"YUYV").0;
pub const V4L2_PIX_FMT_UYVY: u32 = FourCc::new(b"UYVY").0;

/// Result of resolving a requested format for a given frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Format of the frames handed to `send`.
    pub input: PixelFormat,
    /// Format written to the device, after conversion if any.
    pub native: PixelFormat,
    /// V4L2 `pixelformat` passed to `VIDIOC_S_FMT`.
    pub v4l2_pixelformat: u32,
    /// Bytes in one frame handed to `send`.
    pub input_size: usize,
    /// Bytes written to each device per frame.
    pub output_size: usize,
}

impl OutputFormat {
    pub fn resolve(fourcc: FourCc, width: u32, height: u32) -> Result<Self> {
        let canonical = fourcc.canonical();
        let input = PixelFormat::from_fourcc(canonical)
            .ok_or(VirtualOutputError::UnsupportedFormat(fourcc))?;

        let (native, v4l2_pixelformat) = match input {
            PixelFormat::Rgb | PixelFormat::Bgr => (PixelFormat::I420, V4L2_PIX_FMT_YUV420),
            PixelFormat::Gray => (input, V4L2_PIX_FMT_GREY),
            PixelFormat::I420 => (input, V4L2_PIX_FMT_YUV420),
            PixelFormat::Nv12 => (input, V4L2_PIX_FMT_NV12),
            PixelFormat::Yuyv => (input, V4L2_PIX_FMT_YUYV),
            PixelFormat::Uyvy => (input, V4L2_PIX_FMT_UYVY),
        };

        Ok(Self {
            input,
            native,
            v4l2_pixelformat,
            input_size: input.frame_size(width, height),
            output_size: native.frame_size(width, height),
        })
    }

    pub fn needs_conversion(&self) -> bool {
        self.input != self.native
    }
}
