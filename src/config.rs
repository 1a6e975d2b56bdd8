//! Output configuration, loadable from YAML.

use crate::error::Result;
use crate::format::FourCc;
use crate::output::{DeviceDriver, DeviceRegistry, DeviceSelection, VirtualOutput};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Configuration for a virtual camera output.
///
/// ```yaml
/// width: 1280
/// height: 720
/// fps: 30
/// format: rgb        # or a fourcc such as "YUYV"
/// device: [/dev/video0, /dev/video1]   # omit for auto-discovery
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VirtualOutputConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: FourCc,
    pub device: DeviceSelection,
}

impl Default for VirtualOutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            format: FourCc::RAW,
            device: DeviceSelection::Auto,
        }
    }
}

impl VirtualOutputConfig {
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no output can run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            anyhow::bail!("fps must be a positive number, got {}", self.fps);
        }
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("frame size must be non-zero, got {}x{}", self.width, self.height);
        }
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        info!("Loading output config from {:?}", path);
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// Opens an output through `driver`, recording devices in `registry`.
    pub fn open_with<D: DeviceDriver>(&self, driver: &D, registry: &DeviceRegistry) -> Result<VirtualOutput<D>> {
        VirtualOutput::new(
            driver,
            registry,
            self.width,
            self.height,
            self.format,
            self.device.clone(),
        )
    }

    /// Opens an output on v4l2loopback devices, using the process-wide registry.
    #[cfg(target_os = "linux")]
    pub fn open(&self) -> Result<VirtualOutput<crate::output::V4l2Loopback>> {
        self.open_with(&crate::output::V4l2Loopback, &DeviceRegistry::shared())
    }
}
