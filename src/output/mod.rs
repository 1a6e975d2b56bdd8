//! Virtual camera output devices.

pub mod device;
pub mod registry;
#[cfg(target_os = "linux")]
pub mod virtual_camera_linux;
pub mod virtual_output;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{DeviceDriver, DeviceHandle, DeviceSelection};
pub use registry::{Claim, DeviceRegistry};
#[cfg(target_os = "linux")]
pub use virtual_camera_linux::{LoopbackDevice, V4l2Loopback};
pub use virtual_output::{list_devices, DeviceWrite, FanOut, VirtualOutput};
