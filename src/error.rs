//! Error types for virtual output management.

use crate::format::FourCc;
use thiserror::Error;

/// Coarse classification of a [`VirtualOutputError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad format identifier, empty device list, missing/invalid/busy device.
    InvalidArgument,
    /// The OS refused access to a device node.
    PermissionDenied,
    /// A device accepted the open but rejected the output format.
    ConfigurationFailed,
    /// Auto-discovery found nothing usable.
    NoDeviceAvailable,
    /// The requested pixel format cannot be resolved.
    UnsupportedFormat,
    /// The pixel conversion step failed.
    Conversion,
}

#[derive(Error, Debug)]
pub enum VirtualOutputError {
    #[error("Device {device} is already in use.")]
    DeviceInUse { device: String },

    #[error("Device {device} does not exist.")]
    DeviceNotFound { device: String },

    #[error("Device {device} could not be opened: {reason}")]
    OpenFailed { device: String, reason: String },

    #[error(
        "Could not access {device} due to missing permissions. \
        Did you add your user to the 'video' group? \
        Run 'usermod -a -G video myusername' and log out and in again."
    )]
    PermissionDenied { device: String },

    #[error("Device capabilities of {device} could not be queried.")]
    CapabilityQueryFailed { device: String },

    #[error("Device {device} is not a video output device.")]
    NotOutputDevice { device: String },

    #[error("Device {device} is not a V4L2 loopback device (driver '{driver}').")]
    NotLoopbackDevice { device: String, driver: String },

    #[error("Virtual camera device {device} could not be configured: {source}")]
    ConfigurationFailed {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "No v4l2 loopback device found at {prefix}[0-{last}]. \
        Did you run 'modprobe v4l2loopback'?"
    )]
    NoDeviceFound { prefix: String, last: u32 },

    #[error(
        "All v4l2 loopback devices at {prefix}[0-{last}] are busy. \
        Is another process using them?"
    )]
    AllDevicesBusy { prefix: String, last: u32 },

    #[error("Failed to open any of the requested devices.")]
    NoRequestedDeviceOpened,

    #[error("At least one device must be given when selecting devices explicitly.")]
    EmptyDeviceList,

    #[error("Unsupported image format {0}.")]
    UnsupportedFormat(FourCc),

    #[error("Unknown pixel format '{0}'.")]
    UnknownFormat(String),

    #[error("Frame has {actual} bytes, expected {expected} for {width}x{height} {format}.")]
    FrameSizeMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        format: FourCc,
    },

    #[error("Frame conversion failed: {0}")]
    Conversion(String),
}

impl VirtualOutputError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceInUse { .. }
            | Self::DeviceNotFound { .. }
            | Self::OpenFailed { .. }
            | Self::CapabilityQueryFailed { .. }
            | Self::NotOutputDevice { .. }
            | Self::NotLoopbackDevice { .. }
            | Self::EmptyDeviceList
            | Self::NoRequestedDeviceOpened
            | Self::UnknownFormat(_)
            | Self::FrameSizeMismatch { .. } => ErrorKind::InvalidArgument,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::ConfigurationFailed { .. } => ErrorKind::ConfigurationFailed,
            Self::NoDeviceFound { .. } | Self::AllDevicesBusy { .. } => {
                ErrorKind::NoDeviceAvailable
            }
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Conversion(_) => ErrorKind::Conversion,
        }
    }

    /// Whether auto-discovery may skip past this error and try the next
    /// candidate. Configuration failures mean the device itself is broken
    /// and always end construction.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::DeviceInUse { .. }
                | Self::DeviceNotFound { .. }
                | Self::OpenFailed { .. }
                | Self::PermissionDenied { .. }
                | Self::CapabilityQueryFailed { .. }
                | Self::NotOutputDevice { .. }
                | Self::NotLoopbackDevice { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VirtualOutputError>;
