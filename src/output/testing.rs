//! In-memory device driver for tests.

use super::device::{DeviceDriver, DeviceHandle};
use crate::error::{Result, VirtualOutputError};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// How a simulated device node behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeDevice {
    /// A working loopback output device.
    Loopback,
    /// Opening fails with EACCES.
    PermissionDenied,
    /// Opens, but lacks the video output capability.
    NotOutput,
    /// Opens, but is driven by something other than v4l2loopback.
    WrongDriver,
    /// Valid, but `VIDIOC_S_FMT` fails.
    RejectsFormat,
    /// Valid, but every write fails.
    FailsWrites,
}

#[derive(Debug, Default)]
struct FakeState {
    open: usize,
    attempts: usize,
    formats: HashMap<String, (u32, u32, u32)>,
    frames: HashMap<String, Vec<Vec<u8>>>,
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    devices: HashMap<String, FakeDevice>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, device: FakeDevice) -> Self {
        self.devices.insert(path.to_string(), device);
        self
    }

    /// Handles currently open.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open
    }

    /// Calls to `open`, including probes and failures.
    pub fn opens_attempted(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn format_of(&self, path: &str) -> Option<(u32, u32, u32)> {
        self.state.lock().unwrap().formats.get(path).copied()
    }

    /// Sizes of the frames written to `path`, oldest first.
    pub fn writes_to(&self, path: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .frames
            .get(path)
            .map(|frames| frames.iter().map(Vec::len).collect())
            .unwrap_or_default()
    }

    pub fn last_frame(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().frames.get(path)?.last().cloned()
    }
}

impl DeviceDriver for FakeDriver {
    type Handle = FakeHandle;

    fn open(&self, device: &str) -> Result<FakeHandle> {
        self.state.lock().unwrap().attempts += 1;
        let name = device.to_string();
        let kind = match self.devices.get(device) {
            Some(kind) => *kind,
            None => return Err(VirtualOutputError::DeviceNotFound { device: name }),
        };
        match kind {
            FakeDevice::PermissionDenied => Err(VirtualOutputError::PermissionDenied { device: name }),
            FakeDevice::NotOutput => Err(VirtualOutputError::NotOutputDevice { device: name }),
            FakeDevice::WrongDriver => Err(VirtualOutputError::NotLoopbackDevice {
                device: name,
                driver: "uvcvideo".into(),
            }),
            FakeDevice::Loopback | FakeDevice::RejectsFormat | FakeDevice::FailsWrites => {
                self.state.lock().unwrap().open += 1;
                Ok(FakeHandle {
                    name,
                    kind,
                    state: self.state.clone(),
                })
            }
        }
    }
}

#[derive(Debug)]
pub struct FakeHandle {
    name: String,
    kind: FakeDevice,
    state: Arc<Mutex<FakeState>>,
}

impl DeviceHandle for FakeHandle {
    fn set_format(&mut self, width: u32, height: u32, pixelformat: u32) -> io::Result<()> {
        if self.kind == FakeDevice::RejectsFormat {
            return Err(io::Error::from_raw_os_error(22));
        }
        self.state
            .lock()
            .unwrap()
            .formats
            .insert(self.name.clone(), (width, height, pixelformat));
        Ok(())
    }

    fn write_frame(&mut self, data: &[u8]) -> io::Result<()> {
        if self.kind == FakeDevice::FailsWrites {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "consumer went away"));
        }
        self.state
            .lock()
            .unwrap()
            .frames
            .entry(self.name.clone())
            .or_default()
            .push(data.to_vec());
        Ok(())
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open -= 1;
        }
    }
}
