//! Virtual camera output driving one or more loopback devices.
//!
//! A [`VirtualOutput`] resolves the output format once, acquires its devices
//! (auto-discovered or explicitly selected), and then fans every frame out
//! to all of them. Construction either acquires at least one device or
//! leaves nothing behind: every handle opened and every registry entry
//! claimed along the way is owned by an [`ActiveDevice`] guard, so any early
//! return closes and releases them.

use super::device::{DeviceDriver, DeviceHandle, DeviceSelection, DEVICE_PREFIX, MAX_DEVICES};
use super::registry::{Claim, DeviceRegistry};
use crate::error::{Result, VirtualOutputError};
use crate::format::{FourCc, OutputFormat};
use crate::frame::{I420Converter, PixelFormat};
use std::io;
use tracing::{debug, info, warn};

/// An acquired device: its open handle and its registry entry.
struct ActiveDevice<H> {
    // Field order matters: the handle is closed before the claim is released.
    handle: H,
    claim: Claim,
}

impl<H> ActiveDevice<H> {
    fn name(&self) -> &str {
        self.claim.device()
    }
}

/// Outcome of writing one frame to one device.
#[derive(Debug)]
pub struct DeviceWrite {
    pub device: String,
    pub result: io::Result<()>,
}

/// Per-device outcomes of one [`VirtualOutput::send`] call, in device order.
#[derive(Debug, Default)]
pub struct FanOut {
    pub writes: Vec<DeviceWrite>,
}

impl FanOut {
    /// Number of devices that received the frame.
    pub fn delivered(&self) -> usize {
        self.writes.iter().filter(|w| w.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceWrite> {
        self.writes.iter().filter(|w| w.result.is_err())
    }

    pub fn all_delivered(&self) -> bool {
        self.writes.iter().all(|w| w.result.is_ok())
    }
}

/// Writes frames to v4l2loopback-style virtual output devices.
pub struct VirtualOutput<D: DeviceDriver> {
    width: u32,
    height: u32,
    fourcc: FourCc,
    format: OutputFormat,
    devices: Vec<ActiveDevice<D::Handle>>,
    running: bool,
    /// Set when frames are converted before fan-out.
    converter: Option<I420Converter>,
    /// Conversion target, reused across frames. Empty when no conversion is needed.
    buffer: Vec<u8>,
}

impl<D: DeviceDriver> VirtualOutput<D> {
    /// Creates an output of `width` x `height` frames in `fourcc`, acquiring
    /// devices through `driver` and recording them in `registry`.
    pub fn new(
        driver: &D,
        registry: &DeviceRegistry,
        width: u32,
        height: u32,
        fourcc: FourCc,
        selection: DeviceSelection,
    ) -> Result<Self> {
        let format = OutputFormat::resolve(fourcc, width, height)?;
        debug!(
            "Resolved {} {}x{} to {:?} ({} bytes per frame)",
            fourcc, width, height, format.native, format.output_size
        );

        let converter = if format.needs_conversion() {
            Some(I420Converter::new(format.input, width, height)?)
        } else {
            None
        };

        let devices = match selection {
            DeviceSelection::Auto => Self::acquire_auto(driver, registry, &format, width, height)?,
            DeviceSelection::Explicit(names) => {
                Self::acquire_explicit(driver, registry, &format, width, height, &names)?
            }
        };

        let buffer = if format.needs_conversion() {
            vec![0; format.output_size]
        } else {
            Vec::new()
        };

        let output = Self {
            width,
            height,
            fourcc,
            format,
            devices,
            running: true,
            converter,
            buffer,
        };
        info!(
            "Virtual camera output started on {} ({}x{}, {:?})",
            output.device(),
            width,
            height,
            format.native
        );
        Ok(output)
    }

    /// Scans the driver's candidate paths and engages the first usable one.
    fn acquire_auto(
        driver: &D,
        registry: &DeviceRegistry,
        format: &OutputFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<ActiveDevice<D::Handle>>> {
        let candidates: Vec<String> = driver
            .candidates()
            .into_iter()
            .filter(|path| driver.probe(path))
            .collect();
        if candidates.is_empty() {
            return Err(VirtualOutputError::NoDeviceFound {
                prefix: DEVICE_PREFIX.to_string(),
                last: MAX_DEVICES - 1,
            });
        }
        debug!("Found v4l2loopback candidates: {}", candidates.join(", "));

        for name in &candidates {
            match Self::acquire(driver, registry, format, width, height, name) {
                Ok(device) => return Ok(vec![device]),
                Err(e) if e.is_skippable() => {
                    debug!("Skipping {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(VirtualOutputError::AllDevicesBusy {
            prefix: DEVICE_PREFIX.to_string(),
            last: MAX_DEVICES - 1,
        })
    }

    /// Engages every listed device. Any failure drops the devices acquired
    /// so far, which closes them and releases their claims.
    fn acquire_explicit(
        driver: &D,
        registry: &DeviceRegistry,
        format: &OutputFormat,
        width: u32,
        height: u32,
        names: &[String],
    ) -> Result<Vec<ActiveDevice<D::Handle>>> {
        if names.is_empty() {
            return Err(VirtualOutputError::EmptyDeviceList);
        }

        let mut devices = Vec::with_capacity(names.len());
        for name in names {
            match Self::acquire(driver, registry, format, width, height, name) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    if !devices.is_empty() {
                        warn!(
                            "Failed to acquire {}, releasing {} device(s) opened so far",
                            name,
                            devices.len()
                        );
                    }
                    return Err(e);
                }
            }
        }

        if devices.is_empty() {
            return Err(VirtualOutputError::NoRequestedDeviceOpened);
        }
        Ok(devices)
    }

    /// Claims, opens, and configures a single device.
    fn acquire(
        driver: &D,
        registry: &DeviceRegistry,
        format: &OutputFormat,
        width: u32,
        height: u32,
        name: &str,
    ) -> Result<ActiveDevice<D::Handle>> {
        let claim = registry.try_claim(name)?;
        let mut handle = driver.open(name)?;
        handle
            .set_format(width, height, format.v4l2_pixelformat)
            .map_err(|source| VirtualOutputError::ConfigurationFailed {
                device: name.to_string(),
                source,
            })?;
        debug!("Configured {} for {}x{}", name, width, height);
        Ok(ActiveDevice { handle, claim })
    }

    /// Converts `frame` if needed and writes it to every active device.
    ///
    /// A failed write to one device is logged and recorded in the returned
    /// [`FanOut`]; the remaining devices still receive the frame. Errors are
    /// only returned for frames of the wrong size or a failed conversion.
    /// Does nothing once the output is stopped.
    pub fn send(&mut self, frame: &[u8]) -> Result<FanOut> {
        if !self.running {
            return Ok(FanOut::default());
        }
        if frame.len() != self.format.input_size {
            return Err(VirtualOutputError::FrameSizeMismatch {
                expected: self.format.input_size,
                actual: frame.len(),
                width: self.width,
                height: self.height,
                format: self.fourcc,
            });
        }

        let out: &[u8] = match &mut self.converter {
            Some(converter) => {
                converter.convert(frame, &mut self.buffer)?;
                &self.buffer
            }
            None => frame,
        };

        let mut report = FanOut {
            writes: Vec::with_capacity(self.devices.len()),
        };
        for device in &mut self.devices {
            let result = device.handle.write_frame(out);
            if let Err(e) = &result {
                warn!("Error writing frame to {}: {}", device.name(), e);
            }
            report.writes.push(DeviceWrite {
                device: device.name().to_string(),
                result,
            });
        }
        Ok(report)
    }

    /// Closes every device and releases it from the registry.
    /// Stopping an already stopped output does nothing.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let names = self.device();
        // Dropping each device closes its handle, then releases its claim
        self.devices.clear();
        self.running = false;
        info!("Virtual camera output stopped ({})", names);
    }

    /// Alias of [`stop`](Self::stop).
    pub fn close(&mut self) {
        self.stop();
    }

    /// Active device identifiers in acquisition order, joined with `", "`.
    /// Empty once stopped.
    pub fn device(&self) -> String {
        self.devices
            .iter()
            .map(|d| d.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Active device identifiers in acquisition order.
    pub fn devices(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The format frames are passed to [`send`](Self::send) in, as requested.
    pub fn fourcc(&self) -> FourCc {
        self.fourcc
    }

    /// Canonical code of the format written to the devices.
    pub fn native_fourcc(&self) -> FourCc {
        self.format.native.fourcc()
    }

    pub fn native_format(&self) -> PixelFormat {
        self.format.native
    }

    /// Bytes expected per frame passed to [`send`](Self::send).
    pub fn frame_size(&self) -> usize {
        self.format.input_size
    }

    /// Bytes written to each device per frame.
    pub fn output_size(&self) -> usize {
        self.format.output_size
    }
}

impl<D: DeviceDriver> Drop for VirtualOutput<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lists the candidate devices `driver` considers usable, without opening
/// any of them for longer than the check.
pub fn list_devices<D: DeviceDriver>(driver: &D) -> Vec<String> {
    driver
        .candidates()
        .into_iter()
        .filter(|path| driver.probe(path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::V4L2_PIX_FMT_YUV420;
    use crate::output::testing::{FakeDevice, FakeDriver};

    fn rgb() -> FourCc {
        FourCc::new(b"RGB3")
    }

    #[test]
    fn test_explicit_single_device_rgb() {
        let driver = FakeDriver::new().with("/dev/video5", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let mut output =
            VirtualOutput::new(&driver, &registry, 640, 480, rgb(), DeviceSelection::single("/dev/video5")).unwrap();
        assert!(output.is_running());
        assert_eq!(output.native_fourcc(), FourCc::I420);
        assert_eq!(output.device(), "/dev/video5");
        assert_eq!(driver.format_of("/dev/video5"), Some((640, 480, V4L2_PIX_FMT_YUV420)));
        assert!(registry.contains("/dev/video5"));

        let report = output.send(&vec![0u8; 640 * 480 * 3]).unwrap();
        assert!(report.all_delivered());
        assert_eq!(driver.writes_to("/dev/video5"), vec![460800]);
    }

    #[test]
    fn test_unsupported_format_has_no_side_effects() {
        let driver = FakeDriver::new().with("/dev/video0", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();
        let err = VirtualOutput::new(&driver, &registry, 640, 480, FourCc::new(b"MJPG"), DeviceSelection::Auto)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(driver.open_count(), 0);
        assert_eq!(driver.opens_attempted(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_empty_list() {
        let driver = FakeDriver::new();
        let registry = DeviceRegistry::new();
        let err = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Explicit(vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, VirtualOutputError::EmptyDeviceList));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_explicit_rollback_on_invalid_entry() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video2", FakeDevice::WrongDriver);
        let registry = DeviceRegistry::new();

        let err = VirtualOutput::new(
            &driver,
            &registry,
            64,
            48,
            FourCc::I420,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, VirtualOutputError::NotLoopbackDevice { .. }), "{:?}", err);
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_explicit_missing_and_permission_are_terminal() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video3", FakeDevice::PermissionDenied);
        let registry = DeviceRegistry::new();

        let err = VirtualOutput::new(
            &driver,
            &registry,
            64,
            48,
            FourCc::I420,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, VirtualOutputError::DeviceNotFound { .. }));

        let err = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, "/dev/video3".into())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_explicit_device_in_use() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video2", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let first = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, "/dev/video2".into()).unwrap();
        let err = VirtualOutput::new(
            &driver,
            &registry,
            64,
            48,
            FourCc::I420,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, VirtualOutputError::DeviceInUse { .. }));
        assert_eq!(registry.devices(), vec!["/dev/video2".to_string()]);
        assert_eq!(driver.open_count(), 1);
        drop(first);
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_configuration_failure_rolls_back() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video2", FakeDevice::RejectsFormat);
        let registry = DeviceRegistry::new();

        let err = VirtualOutput::new(
            &driver,
            &registry,
            64,
            48,
            FourCc::YUY2,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigurationFailed);
        assert!(err.to_string().contains("/dev/video2 could not be configured"));
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_auto_no_device_found() {
        let driver = FakeDriver::new()
            .with("/dev/video0", FakeDevice::NotOutput)
            .with("/dev/video1", FakeDevice::WrongDriver);
        let registry = DeviceRegistry::new();

        let err = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Auto)
            .err()
            .unwrap();
        assert!(matches!(err, VirtualOutputError::NoDeviceFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NoDeviceAvailable);
        assert!(err.to_string().contains("modprobe v4l2loopback"));
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_auto_skips_busy_and_invalid() {
        let driver = FakeDriver::new()
            .with("/dev/video0", FakeDevice::NotOutput)
            .with("/dev/video2", FakeDevice::Loopback)
            .with("/dev/video4", FakeDevice::PermissionDenied)
            .with("/dev/video6", FakeDevice::Loopback)
            .with("/dev/video9", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();
        let _busy = registry.try_claim("/dev/video2").unwrap();

        let output = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Auto).unwrap();
        assert_eq!(output.device(), "/dev/video6");
        assert_eq!(registry.devices(), vec!["/dev/video2".to_string(), "/dev/video6".to_string()]);
        assert_eq!(driver.open_count(), 1);
    }

    #[test]
    fn test_auto_all_busy() {
        let driver = FakeDriver::new().with("/dev/video3", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let first = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Auto).unwrap();
        assert_eq!(first.device(), "/dev/video3");
        let err = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Auto)
            .err()
            .unwrap();
        assert!(matches!(err, VirtualOutputError::AllDevicesBusy { .. }));
        assert_eq!(err.kind(), ErrorKind::NoDeviceAvailable);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_auto_configuration_failure_is_terminal() {
        let driver = FakeDriver::new()
            .with("/dev/video0", FakeDevice::RejectsFormat)
            .with("/dev/video1", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let err = VirtualOutput::new(&driver, &registry, 64, 48, FourCc::I420, DeviceSelection::Auto)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigurationFailed);
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video2", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let mut output = VirtualOutput::new(
            &driver,
            &registry,
            64,
            48,
            FourCc::NV12,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .unwrap();
        assert_eq!(output.device(), "/dev/video1, /dev/video2");
        assert_eq!(output.devices(), vec!["/dev/video1", "/dev/video2"]);

        output.stop();
        assert!(!output.is_running());
        assert_eq!(output.device(), "");
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);

        output.stop();
        output.close();
        assert!(!output.is_running());

        // Sending after stop is a no-op
        let report = output.send(&vec![0u8; output.frame_size()]).unwrap();
        assert!(report.writes.is_empty());
        assert!(driver.writes_to("/dev/video1").is_empty());
    }

    #[test]
    fn test_send_continues_past_failed_write() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::FailsWrites)
            .with("/dev/video2", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let mut output = VirtualOutput::new(
            &driver,
            &registry,
            4,
            2,
            FourCc::YUY2,
            DeviceSelection::list(["/dev/video1", "/dev/video2"]),
        )
        .unwrap();
        let report = output.send(&[0u8; 16]).unwrap();
        assert_eq!(report.delivered(), 1);
        assert_eq!(report.failures().map(|w| w.device.as_str()).collect::<Vec<_>>(), vec!["/dev/video1"]);
        assert_eq!(driver.writes_to("/dev/video2"), vec![16]);
        assert!(output.is_running());
        assert_eq!(output.device(), "/dev/video1, /dev/video2");
    }

    #[test]
    fn test_send_rejects_wrong_frame_size() {
        let driver = FakeDriver::new().with("/dev/video1", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();
        let mut output = VirtualOutput::new(&driver, &registry, 4, 2, rgb(), "/dev/video1".into()).unwrap();
        assert_eq!(output.frame_size(), 24);
        assert_eq!(output.output_size(), 12);

        let err = output.send(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, VirtualOutputError::FrameSizeMismatch { expected: 24, actual: 12, .. }));
        assert!(driver.writes_to("/dev/video1").is_empty());
    }

    #[test]
    fn test_passthrough_writes_input_bytes() {
        let driver = FakeDriver::new().with("/dev/video1", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();
        let mut output = VirtualOutput::new(&driver, &registry, 2, 2, FourCc::J400, "/dev/video1".into()).unwrap();
        assert_eq!(output.native_format(), PixelFormat::Gray);
        output.send(&[1, 2, 3, 4]).unwrap();
        assert_eq!(driver.last_frame("/dev/video1"), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_odd_sized_rgb_frames_are_sent() {
        let driver = FakeDriver::new()
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video2", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let mut small = VirtualOutput::new(&driver, &registry, 3, 3, rgb(), "/dev/video1".into()).unwrap();
        assert_eq!(small.output_size(), 17);
        let report = small.send(&[255u8; 3 * 3 * 3]).unwrap();
        assert!(report.all_delivered());
        assert_eq!(driver.writes_to("/dev/video1"), vec![17]);

        let mut odd = VirtualOutput::new(&driver, &registry, 641, 481, FourCc::BGR24, "/dev/video2".into()).unwrap();
        let report = odd.send(&vec![0u8; 641 * 481 * 3]).unwrap();
        assert!(report.all_delivered());
        assert_eq!(driver.writes_to("/dev/video2"), vec![641 * 481 + 2 * 321 * 241]);
    }

    #[test]
    fn test_second_output_waits_for_first_to_drop() {
        let driver = FakeDriver::new().with("/dev/video4", FakeDevice::Loopback);
        let registry = DeviceRegistry::new();

        let first = VirtualOutput::new(&driver, &registry, 4, 4, FourCc::I420, "/dev/video4".into()).unwrap();
        let err = VirtualOutput::new(&driver, &registry, 4, 4, FourCc::I420, "/dev/video4".into())
            .err()
            .unwrap();
        assert!(matches!(err, VirtualOutputError::DeviceInUse { .. }));
        assert!(registry.contains("/dev/video4"));

        drop(first);
        let mut second = VirtualOutput::new(&driver, &registry, 4, 4, FourCc::I420, "/dev/video4".into()).unwrap();
        assert!(registry.contains("/dev/video4"));
        assert_eq!(driver.open_count(), 1);

        // A third attempt failing must not drop the second's entry
        assert!(VirtualOutput::new(&driver, &registry, 4, 4, FourCc::I420, "/dev/video4".into()).is_err());
        assert!(registry.contains("/dev/video4"));

        second.stop();
        assert!(registry.is_empty());
        assert_eq!(driver.open_count(), 0);
    }

    #[test]
    fn test_list_devices() {
        let driver = FakeDriver::new()
            .with("/dev/video7", FakeDevice::Loopback)
            .with("/dev/video1", FakeDevice::Loopback)
            .with("/dev/video3", FakeDevice::NotOutput);
        assert_eq!(list_devices(&driver), vec!["/dev/video1".to_string(), "/dev/video7".to_string()]);
        assert_eq!(driver.open_count(), 0);
    }
}
