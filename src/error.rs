//! Error types shared across the capture, scan and delivery stages.

use std::io;

use thiserror::Error;

/// Failures raised by a capture device or its buffer pool.
///
/// `Config` is returned while the device is being opened, negotiated or
/// started. Anything raised after streaming began is `Fatal` and brings the
/// whole pipeline down.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device configuration failed: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("capture fault: {message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error(transparent)]
    Region(#[from] RegionError),
}

impl CaptureError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_io(message: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn fatal(message: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// True for errors raised during init/start rather than steady-state capture.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Violations of the buffer ownership ledger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("region {0} is out of range")]
    OutOfRange(usize),

    #[error("region {0} is already owned by the process")]
    AlreadyDequeued(usize),

    #[error("region {0} is already owned by the device")]
    AlreadyQueued(usize),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    Geometry {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("payload of {len} bytes is too short for {width}x{height}")]
    Truncated { width: u32, height: u32, len: usize },

    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    #[error("unsupported JPEG pixel layout {0:?}")]
    JpegLayout(jpeg_decoder::PixelFormat),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("payload serialization failed: {0}")]
    Serialize(String),

    #[error("post failed: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("result has no frame attached")]
    MissingFrame,
}

impl From<rmp_serde::encode::Error> for DeliveryError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<rmp::encode::ValueWriteError> for DeliveryError {
    fn from(err: rmp::encode::ValueWriteError) -> Self {
        Self::Serialize(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Why a pipeline run ended badly.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("{0} worker panicked")]
    Panicked(&'static str),
}
