//! Loopcam: virtual camera output for v4l2loopback devices
//!
//! Discovers or opens virtual video output devices, negotiates the output
//! format, and fans converted frames out to every acquired device.

pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod output;
pub mod utils;

pub use config::VirtualOutputConfig;
pub use error::{ErrorKind, VirtualOutputError};
pub use format::FourCc;
pub use frame::PixelFormat;
pub use output::{DeviceRegistry, DeviceSelection, VirtualOutput};
