pub mod capture;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod scan;
pub mod utils;

use std::path::Path;

use capture::{CaptureFormat, PixelFormat};
use error::ConfigError;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use pipeline::{CancellationToken, Pipeline};
pub use scan::ScanResult;

/// Environment variables override file settings, e.g. `BARSCAN__CAPTURE__FPS=15`.
pub const ENV_PREFIX: &str = "BARSCAN";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub scan: ScanConfig,
    pub delivery: DeliveryConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node; empty means probe for one
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Payload format requested from the device
    pub format: CaptureFormat,
    /// Pixel format frames are converted to before scanning
    pub output: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Barcode formats to attempt; empty means all supported
    pub formats: Vec<String>,
    /// Identical text is not re-sent within this window
    pub backoff_ms: u64,
    /// Push a preview when nothing was pushed for this long
    pub heartbeat_ms: u64,
    /// Skip the preview while the result queue holds this many items
    pub heartbeat_watermark: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Collector endpoint; results are only logged when unset
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub jpeg_quality: u8,
    pub marker_radius: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame queue depth at which new frames are dropped; defaults to the
    /// negotiated frame rate
    pub frame_watermark: Option<usize>,
    /// Longest any worker blocks before checking for shutdown
    pub wait_ceiling_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 800,
            height: 600,
            fps: 5,
            format: CaptureFormat::Mjpeg,
            output: PixelFormat::Rgb24,
            buffer_count: 5,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            formats: Vec::new(),
            backoff_ms: 2000,
            heartbeat_ms: 1000,
            heartbeat_watermark: 5,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 1000,
            jpeg_quality: 60,
            marker_radius: 10,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_watermark: None,
            wait_ceiling_ms: 1000,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `BARSCAN__*` environment
    /// variables, then validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("capture.width", self.capture.width as u64),
            ("capture.height", self.capture.height as u64),
            ("capture.fps", self.capture.fps as u64),
            ("capture.buffer_count", self.capture.buffer_count as u64),
            ("pipeline.wait_ceiling_ms", self.pipeline.wait_ceiling_ms),
            ("delivery.timeout_ms", self.delivery.timeout_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if !(1..=100).contains(&self.delivery.jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "delivery.jpeg_quality",
                reason: format!("{} is outside 1..=100", self.delivery.jpeg_quality),
            });
        }
        if let Some(url) = self.delivery.url.as_deref().filter(|u| !u.is_empty()) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    key: "delivery.url",
                    reason: format!("{} is not an http(s) URL", url),
                });
            }
        }
        if self.pipeline.frame_watermark == Some(0) {
            return Err(ConfigError::Invalid {
                key: "pipeline.frame_watermark",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.fps, 5);
        assert_eq!(config.scan.backoff_ms, 2000);
        assert_eq!(config.pipeline.frame_watermark, None);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
device = "/dev/video2"
fps = 15
format = "yuyv"
output = "grey8"

[scan]
formats = ["QR_CODE"]

[delivery]
url = "http://localhost:5000/post"

[pipeline]
frame_watermark = 3
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.device, "/dev/video2");
        assert_eq!(config.capture.fps, 15);
        assert_eq!(config.capture.format, CaptureFormat::Yuyv);
        assert_eq!(config.capture.output, PixelFormat::Grey8);
        assert_eq!(config.capture.width, 800);
        assert_eq!(config.scan.formats, vec!["QR_CODE".to_string()]);
        assert_eq!(config.delivery.url.as_deref(), Some("http://localhost:5000/post"));
        assert_eq!(config.pipeline.frame_watermark, Some(3));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.delivery.jpeg_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "delivery.jpeg_quality", .. })
        ));

        let mut config = Config::default();
        config.capture.buffer_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn collector_url_must_be_http_or_https() {
        let mut config = Config::default();
        for ok in ["http://localhost:5000/post", "https://collector.example/post", ""] {
            config.delivery.url = Some(ok.into());
            assert!(config.validate().is_ok(), "{ok}");
        }

        config.delivery.url = Some("ftp://collector.example/post".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "delivery.url", .. })
        ));
    }
}
