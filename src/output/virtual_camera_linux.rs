//! Linux virtual camera devices using v4l2loopback.
//!
//! Frames are written to v4l2loopback nodes with plain `write(2)`.
//! Requires the v4l2loopback kernel module to be loaded.

use super::device::{DeviceDriver, DeviceHandle};
use crate::error::{Result, VirtualOutputError};
use bytemuck::{Pod, Zeroable};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use tracing::debug;

/// Driver name reported by v4l2loopback in `VIDIOC_QUERYCAP`.
pub const LOOPBACK_DRIVER: &str = "v4l2 loopback";

// V4L2 Constants
const VIDIOC_QUERYCAP: u32 = 0x80685600; // _IOR('V', 0, struct v4l2_capability)
const VIDIOC_S_FMT: u32 = 0xC0D05605; // _IOWR('V', 5, struct v4l2_format)
const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
const V4L2_CAP_VIDEO_OUTPUT: u32 = 0x00000002;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct v4l2_capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
struct v4l2_format {
    type_: u32,
    fmt: v4l2_format_union,
}

#[repr(C)]
union v4l2_format_union {
    pix: v4l2_pix_format,
    raw_data: [u8; 200],
    _align: u64, // Force 8-byte alignment for the union
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct v4l2_pix_format {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

// SAFETY: every field is an integer or an integer array, for which all-zero
// bytes are a valid value.
unsafe impl Zeroable for v4l2_format {}
unsafe impl Zeroable for v4l2_format_union {}
unsafe impl Zeroable for v4l2_pix_format {}

/// Opens v4l2loopback devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Loopback;

impl V4l2Loopback {
    pub fn new() -> Self {
        Self
    }

    fn open_file(device: &str) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|e| match e.raw_os_error() {
                Some(libc::EACCES) => VirtualOutputError::PermissionDenied {
                    device: device.to_string(),
                },
                Some(libc::ENOENT) => VirtualOutputError::DeviceNotFound {
                    device: device.to_string(),
                },
                _ => VirtualOutputError::OpenFailed {
                    device: device.to_string(),
                    reason: e.to_string(),
                },
            })
    }

    /// Checks capabilities of an open device. The caller drops (and so
    /// closes) the file when this fails.
    fn validate(device: &str, file: &File) -> Result<()> {
        let mut cap = v4l2_capability::zeroed();
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_QUERYCAP as _, &mut cap) };
        if ret < 0 {
            debug!(
                "VIDIOC_QUERYCAP on {} failed: {}",
                device,
                io::Error::last_os_error()
            );
            return Err(VirtualOutputError::CapabilityQueryFailed {
                device: device.to_string(),
            });
        }
        if cap.capabilities & V4L2_CAP_VIDEO_OUTPUT == 0 {
            return Err(VirtualOutputError::NotOutputDevice {
                device: device.to_string(),
            });
        }
        let driver = driver_name(&cap.driver);
        if driver != LOOPBACK_DRIVER {
            return Err(VirtualOutputError::NotLoopbackDevice {
                device: device.to_string(),
                driver,
            });
        }
        Ok(())
    }
}

/// Reads a NUL-terminated driver name.
fn driver_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl DeviceDriver for V4l2Loopback {
    type Handle = LoopbackDevice;

    fn open(&self, device: &str) -> Result<LoopbackDevice> {
        let file = Self::open_file(device)?;
        Self::validate(device, &file)?;
        debug!("Opened v4l2loopback device: {}", device);
        Ok(LoopbackDevice { file })
    }
}

/// An open v4l2loopback node.
#[derive(Debug)]
pub struct LoopbackDevice {
    file: File,
}

impl DeviceHandle for LoopbackDevice {
    fn set_format(&mut self, width: u32, height: u32, pixelformat: u32) -> io::Result<()> {
        let mut fmt = v4l2_format::zeroed();
        fmt.type_ = V4L2_BUF_TYPE_VIDEO_OUTPUT;
        // v4l2loopback fills in bytesperline, sizeimage and colorspace itself
        fmt.fmt.pix = v4l2_pix_format {
            width,
            height,
            pixelformat,
            ..v4l2_pix_format::zeroed()
        };

        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), VIDIOC_S_FMT as _, &mut fmt) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn write_frame(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }
}
