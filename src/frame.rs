//! Video frame types and pixel format conversions.

use crate::error::{Result, VirtualOutputError};
use crate::format::FourCc;
use std::str::FromStr;

/// Pixel formats accepted by a virtual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed RGB, 8 bits per channel, R first in memory
    Rgb,
    /// Packed BGR, 8 bits per channel, B first in memory
    Bgr,
    /// 8-bit grayscale
    Gray,
    /// Planar YUV 4:2:0 (Y plane, U plane, V plane)
    I420,
    /// NV12 semi-planar format (Y plane + interleaved UV)
    Nv12,
    /// YUV 4:2:2 packed format (Y0 U0 Y1 V0)
    Yuyv,
    /// YUV 4:2:2 packed format (U0 Y0 V0 Y1)
    Uyvy,
}

impl PixelFormat {
    /// Canonical four-character code of this format.
    pub fn fourcc(&self) -> FourCc {
        match self {
            PixelFormat::Rgb => FourCc::RAW,
            PixelFormat::Bgr => FourCc::BGR24,
            PixelFormat::Gray => FourCc::J400,
            PixelFormat::I420 => FourCc::I420,
            PixelFormat::Nv12 => FourCc::NV12,
            PixelFormat::Yuyv => FourCc::YUY2,
            PixelFormat::Uyvy => FourCc::UYVY,
        }
    }

    /// Looks up a format by canonical four-character code.
    pub fn from_fourcc(fourcc: FourCc) -> Option<Self> {
        [
            PixelFormat::Rgb,
            PixelFormat::Bgr,
            PixelFormat::Gray,
            PixelFormat::I420,
            PixelFormat::Nv12,
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
        ]
        .into_iter()
        .find(|f| f.fourcc() == fourcc)
    }

    /// Returns the size in bytes of one `width` x `height` frame.
    /// Chroma dimensions are rounded up for odd sizes.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let width = width as usize;
        let height = height as usize;
        let half_width = (width + 1) / 2;
        let half_height = (height + 1) / 2;
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => width * height * 3,
            PixelFormat::Gray => width * height,
            PixelFormat::I420 | PixelFormat::Nv12 => width * height + half_width * half_height * 2,
            PixelFormat::Yuyv | PixelFormat::Uyvy => half_width * 4 * height,
        }
    }
}

impl FromStr for PixelFormat {
    type Err = VirtualOutputError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(PixelFormat::Rgb),
            "bgr" => Ok(PixelFormat::Bgr),
            "gray" | "grey" => Ok(PixelFormat::Gray),
            "i420" => Ok(PixelFormat::I420),
            "nv12" => Ok(PixelFormat::Nv12),
            "yuyv" => Ok(PixelFormat::Yuyv),
            "uyvy" => Ok(PixelFormat::Uyvy),
            _ => Err(VirtualOutputError::UnknownFormat(s.to_string())),
        }
    }
}

/// A video frame containing image data.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a zeroed video frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; format.frame_size(width, height)],
        }
    }

    /// Fills every pixel of a packed RGB/BGR frame with one color, given in RGB order.
    pub fn fill_rgb(&mut self, [r, g, b]: [u8; 3]) {
        let pixel = match self.format {
            PixelFormat::Rgb => [r, g, b],
            PixelFormat::Bgr => [b, g, r],
            _ => return,
        };
        for chunk in self.data.chunks_exact_mut(3) {
            chunk.copy_from_slice(&pixel);
        }
    }
}

/// Converts a packed RGB or BGR frame into planar I420, writing into `dst`.
///
/// `src` and `dst` must already have the frame sizes of their formats for
/// `width` x `height`.
pub fn convert_to_i420(
    src: &[u8],
    src_format: PixelFormat,
    dst: &mut [u8],
    width: u32,
    height: u32,
) -> Result<()> {
    let src_pixel_format = match src_format {
        PixelFormat::Rgb => ezk_image::PixelFormat::RGB,
        PixelFormat::Bgr => ezk_image::PixelFormat::BGR,
        other => {
            return Err(VirtualOutputError::Conversion(format!(
                "no I420 conversion from {:?}",
                other
            )))
        }
    };

    let width = width as usize;
    let height = height as usize;

    let dst_color = ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
        transfer: ezk_image::ColorTransfer::Linear,
        primaries: ezk_image::ColorPrimaries::BT709,
        space: ezk_image::ColorSpace::BT709,
        full_range: false,
    });
    let src_color = ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
        transfer: ezk_image::ColorTransfer::Linear,
        primaries: ezk_image::ColorPrimaries::BT709,
    });

    let src_image = ezk_image::Image::from_buffer(src_pixel_format, src, None, width, height, src_color)
        .map_err(|e| VirtualOutputError::Conversion(format!("source buffer: {:?}", e)))?;
    let mut dst_image =
        ezk_image::Image::from_buffer(ezk_image::PixelFormat::I420, dst, None, width, height, dst_color)
            .map_err(|e| VirtualOutputError::Conversion(format!("I420 buffer: {:?}", e)))?;

    ezk_image::convert(&src_image, &mut dst_image)
        .map_err(|e| VirtualOutputError::Conversion(format!("{:?}", e)))
}

/// Reusable RGB/BGR to I420 converter for one frame geometry.
///
/// ezk-image only converts even dimensions. Odd frames are padded to the
/// next even size by repeating the last column and row, converted, and
/// the luma plane cropped back. The padded chroma planes already have the
/// rounded-up size an odd I420 frame uses, so they are copied as-is.
#[derive(Debug)]
pub struct I420Converter {
    source: PixelFormat,
    width: u32,
    height: u32,
    padded: Vec<u8>,
    even: Vec<u8>,
}

impl I420Converter {
    pub fn new(source: PixelFormat, width: u32, height: u32) -> Result<Self> {
        if !matches!(source, PixelFormat::Rgb | PixelFormat::Bgr) {
            return Err(VirtualOutputError::Conversion(format!(
                "no I420 conversion from {:?}",
                source
            )));
        }

        let (even_width, even_height) = (width + width % 2, height + height % 2);
        let (padded, even) = if (even_width, even_height) == (width, height) {
            (Vec::new(), Vec::new())
        } else {
            (
                vec![0; source.frame_size(even_width, even_height)],
                vec![0; PixelFormat::I420.frame_size(even_width, even_height)],
            )
        };

        Ok(Self {
            source,
            width,
            height,
            padded,
            even,
        })
    }

    /// Converts `src` (a full source frame) into `dst` (a full I420 frame).
    pub fn convert(&mut self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }
        if self.even.is_empty() {
            return convert_to_i420(src, self.source, dst, self.width, self.height);
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let even_width = width + width % 2;
        let even_height = height + height % 2;
        let row = width * 3;
        let even_row = even_width * 3;

        for y in 0..even_height {
            let src_row = &src[y.min(height - 1) * row..][..row];
            let dst_row = &mut self.padded[y * even_row..][..even_row];
            dst_row[..row].copy_from_slice(src_row);
            if even_width > width {
                dst_row[row..].copy_from_slice(&src_row[row - 3..]);
            }
        }

        convert_to_i420(
            &self.padded,
            self.source,
            &mut self.even,
            even_width as u32,
            even_height as u32,
        )?;

        for y in 0..height {
            dst[y * width..][..width].copy_from_slice(&self.even[y * even_width..][..width]);
        }
        let chroma = &self.even[even_width * even_height..];
        dst[width * height..][..chroma.len()].copy_from_slice(chroma);
        Ok(())
    }
}
