//! Loopcam: stream a test pattern to v4l2loopback virtual cameras.

use anyhow::Result;
use clap::Parser;
use loopcam::format::FourCc;
use loopcam::frame::{PixelFormat, VideoFrame};
use loopcam::output::DeviceSelection;
use loopcam::utils::FrameTimer;
use loopcam::VirtualOutputConfig;
use std::path::PathBuf;
use tracing::info;

/// Stream a generated test pattern to one or more virtual cameras.
#[derive(Parser, Debug)]
#[command(name = "loopcam")]
#[command(about = "Write video frames to v4l2loopback virtual cameras")]
struct Args {
    /// YAML config file; flags given on the command line override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device to write to, may be repeated (default: first free device)
    #[arg(short, long)]
    device: Vec<String>,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Pixel format of generated frames: rgb or bgr
    #[arg(long)]
    format: Option<String>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// List usable v4l2loopback devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Args {
    fn to_config(&self) -> Result<VirtualOutputConfig> {
        let mut config = match &self.config {
            Some(path) => VirtualOutputConfig::load(path)?,
            None => VirtualOutputConfig::default(),
        };
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(format) = &self.format {
            config.format = format.parse()?;
        }
        if !self.device.is_empty() {
            config.device = DeviceSelection::list(&self.device);
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    run(args)
}

#[cfg(target_os = "linux")]
fn run(args: Args) -> Result<()> {
    use loopcam::output::{list_devices, V4l2Loopback};

    if args.list_devices {
        let devices = list_devices(&V4l2Loopback);
        if devices.is_empty() {
            println!("No v4l2loopback devices found.");
        } else {
            println!("Available v4l2loopback devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
        return Ok(());
    }

    let config = args.to_config()?;
    stream(&config, args.frames)
}

#[cfg(not(target_os = "linux"))]
fn run(_args: Args) -> Result<()> {
    anyhow::bail!("v4l2loopback output is only available on Linux")
}

/// Stream a hue-cycling pattern until interrupted or `limit` frames are sent.
#[cfg(target_os = "linux")]
fn stream(config: &VirtualOutputConfig, limit: Option<u64>) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let source_format = match PixelFormat::from_fourcc(config.format.canonical()) {
        Some(f @ (PixelFormat::Rgb | PixelFormat::Bgr)) => f,
        _ => anyhow::bail!(
            "test pattern can only be generated as rgb or bgr, not {}",
            config.format
        ),
    };

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut output = config.open()?;
    info!(
        "Using virtual camera: {} ({} -> {})",
        output.device(),
        FourCc::from(source_format),
        output.native_fourcc()
    );

    let mut frame = VideoFrame::new(config.width, config.height, source_format);
    let mut timer = FrameTimer::new(config.fps);
    let mut sent = 0u64;

    while running.load(Ordering::SeqCst) && limit.map_or(true, |n| sent < n) {
        frame.fill_rgb(hue_to_rgb((sent % 100) as f64 / 100.0));
        let report = output.send(&frame.data)?;
        if report.delivered() == 0 {
            tracing::warn!("Frame {} reached no device", sent);
        }
        sent += 1;

        if let Some(fps) = timer.update() {
            info!("Virtual camera: {:.2} FPS", fps);
        }
        timer.sleep_until_next_frame();
    }

    output.stop();
    info!("Virtual camera stream stopped after {} frames", sent);
    Ok(())
}

/// Fully saturated, full-value color for hue `h` in `[0, 1)`.
fn hue_to_rgb(h: f64) -> [u8; 3] {
    let h6 = (h.fract() * 6.0).max(0.0);
    let sector = h6.floor() as u32;
    let f = h6 - h6.floor();
    let rise = (f * 255.0).round() as u8;
    let fall = 255 - rise;
    match sector {
        0 => [255, rise, 0],
        1 => [fall, 255, 0],
        2 => [0, 255, rise],
        3 => [0, fall, 255],
        4 => [rise, 0, 255],
        _ => [255, 0, fall],
    }
}
