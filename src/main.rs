//! barscan: scan barcodes from a V4L2 camera and forward them to a collector

use std::path::PathBuf;
use std::time::Duration;

use barscan::capture::V4l2Capture;
use barscan::delivery::{Deliver, HttpPoster, LogSink};
use barscan::error::DeliveryError;
use barscan::scan::{QrDecoder, ScanResult};
use barscan::{utils, CancellationToken, Config, Pipeline};
use clap::{ArgAction, Parser};
use color_eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "barscan", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device node; pass an empty string to auto-detect
    #[arg(short, long)]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Number of capture buffers to request from the driver
    #[arg(long)]
    buffers: Option<u32>,

    /// Barcode formats to scan for, e.g. QR_CODE
    #[arg(short, long = "format", value_delimiter = ',')]
    formats: Vec<String>,

    /// Collector endpoint results are posted to
    #[arg(short, long)]
    url: Option<String>,

    /// Frame queue depth at which new frames are dropped
    #[arg(long)]
    frame_watermark: Option<usize>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(buffers) = self.buffers {
            config.capture.buffer_count = buffers;
        }
        if !self.formats.is_empty() {
            config.scan.formats = self.formats.clone();
        }
        if let Some(url) = &self.url {
            config.delivery.url = Some(url.clone());
        }
        if self.frame_watermark.is_some() {
            config.pipeline.frame_watermark = self.frame_watermark;
        }
    }
}

/// Delivery target chosen at startup
enum Sink {
    Http(HttpPoster),
    Log(LogSink),
}

impl Deliver for Sink {
    fn deliver(&mut self, result: &ScanResult) -> Result<(), DeliveryError> {
        match self {
            Sink::Http(poster) => poster.deliver(result),
            Sink::Log(log) => log.deliver(result),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let cli = Cli::parse();

    let default_filter = if cli.verbose > 0 {
        "barscan=debug"
    } else {
        "barscan=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("barscan launching...");

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    // Auto-detect capture device if needed
    if config.capture.device.is_empty() {
        let found = utils::auto_detect_device()?;
        config.capture.device = found.path;
        config.capture.format = found.format;
    }
    info!("Using capture device: {}", config.capture.device);

    let sink = match config.delivery.url.as_deref() {
        Some(url) if !url.is_empty() => {
            info!("Posting results to {}", url);
            Sink::Http(HttpPoster::new(url, &config.delivery))
        }
        _ => {
            warn!("No collector URL configured, results are only logged");
            Sink::Log(LogSink)
        }
    };
    let decoder = QrDecoder::new(&config.scan.formats);

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let cancel = CancellationToken::new();
    let capture_config = config.capture.clone();
    let pipeline = Pipeline::spawn(
        move || {
            let mut capture = V4l2Capture::open(&capture_config)?;
            capture.start_capture()?;
            Ok(capture)
        },
        decoder,
        sink,
        &config,
        cancel.clone(),
    )?;

    let mut tick = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Terminate received, shutting down");
                break;
            }
            _ = tick.tick() => {
                if cancel.is_cancelled() || pipeline.is_finished() {
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || pipeline.shutdown()).await??;

    info!("barscan shutting down");
    Ok(())
}
