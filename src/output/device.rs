//! Device driver seam and device selection.

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Display;
use std::io;

/// Prefix of conventionally numbered video device nodes.
pub const DEVICE_PREFIX: &str = "/dev/video";

/// Number of device indices scanned during auto-discovery (`0..MAX_DEVICES`).
pub const MAX_DEVICES: u32 = 100;

/// An open output device. Dropping the handle closes it.
pub trait DeviceHandle {
    /// Applies the output frame geometry and V4L2 pixel format.
    fn set_format(&mut self, width: u32, height: u32, pixelformat: u32) -> io::Result<()>;

    /// Writes one complete frame.
    fn write_frame(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Opens and validates virtual output devices.
pub trait DeviceDriver {
    type Handle: DeviceHandle;

    /// Opens `device` for output and validates that it is a loopback output
    /// device. The handle is closed again if validation fails.
    fn open(&self, device: &str) -> Result<Self::Handle>;

    /// Checks that `device` is usable without keeping it open.
    fn probe(&self, device: &str) -> bool {
        self.open(device).is_ok()
    }

    /// Device paths scanned during auto-discovery, in preference order.
    fn candidates(&self) -> Vec<String> {
        (0..MAX_DEVICES)
            .map(|i| format!("{}{}", DEVICE_PREFIX, i))
            .collect()
    }
}

/// Which devices an output should drive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "Option<OneOrMany>")]
pub enum DeviceSelection {
    /// Use the first free loopback device found.
    #[default]
    Auto,
    /// Use every listed device, failing if any cannot be acquired.
    Explicit(Vec<String>),
}

impl DeviceSelection {
    /// Selects a single device by anything displayable, e.g. a `&str` or
    /// `Path::display()`.
    pub fn single(device: impl Display) -> Self {
        DeviceSelection::Explicit(vec![device.to_string()])
    }

    /// Selects a list of devices.
    pub fn list<I>(devices: I) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        DeviceSelection::Explicit(devices.into_iter().map(|d| d.to_string()).collect())
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, DeviceSelection::Auto)
    }
}

impl From<&str> for DeviceSelection {
    fn from(device: &str) -> Self {
        DeviceSelection::single(device)
    }
}

impl From<String> for DeviceSelection {
    fn from(device: String) -> Self {
        DeviceSelection::Explicit(vec![device])
    }
}

impl From<Vec<String>> for DeviceSelection {
    fn from(devices: Vec<String>) -> Self {
        DeviceSelection::Explicit(devices)
    }
}

/// `device:` in a config file may be omitted, a string, or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<Option<OneOrMany>> for DeviceSelection {
    fn from(value: Option<OneOrMany>) -> Self {
        match value {
            None => DeviceSelection::Auto,
            Some(OneOrMany::One(device)) => DeviceSelection::Explicit(vec![device]),
            Some(OneOrMany::Many(devices)) => DeviceSelection::Explicit(devices),
        }
    }
}
