use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::CaptureFormat;
use crate::error::CaptureError;

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: CaptureFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: CaptureFormat) -> Self {
        Self { path, format }
    }
}

/// Probe `/dev/video0..9` for a streaming capture device.
///
/// MJPEG is preferred over YUYV on the first device offering either.
pub fn auto_detect_device() -> Result<FoundDevice, CaptureError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING)
        {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let offered: Vec<_> = formats
            .iter()
            .filter_map(|f| CaptureFormat::from_fourcc(&f.fourcc.repr))
            .collect();
        if let Some(format) = preferred_format(&offered) {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice::new(path, format));
        }
    }

    Err(CaptureError::config("no suitable capture device found"))
}

fn preferred_format(offered: &[CaptureFormat]) -> Option<CaptureFormat> {
    [CaptureFormat::Mjpeg, CaptureFormat::Yuyv]
        .into_iter()
        .find(|f| offered.contains(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mjpeg_wins_over_yuyv() {
        assert_eq!(
            preferred_format(&[CaptureFormat::Yuyv, CaptureFormat::Mjpeg]),
            Some(CaptureFormat::Mjpeg)
        );
        assert_eq!(
            preferred_format(&[CaptureFormat::Grey, CaptureFormat::Yuyv]),
            Some(CaptureFormat::Yuyv)
        );
        assert_eq!(preferred_format(&[CaptureFormat::Rgb24]), None);
    }
}
