//! Barcode decoding collaborators and the results they produce.

mod qr;

use std::sync::Arc;

use crate::capture::Frame;

pub use qr::QrDecoder;

/// Outcome of scanning one frame. Empty `text` means nothing was found.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub format: String,
    pub text: String,
    pub points: Vec<(i32, i32)>,
    /// Frame the result was decoded from, kept for annotation downstream
    pub frame: Option<Arc<Frame>>,
}

impl ScanResult {
    pub fn not_found(frame: Arc<Frame>) -> Self {
        Self {
            frame: Some(frame),
            ..Self::default()
        }
    }

    pub fn is_found(&self) -> bool {
        !self.text.is_empty()
    }

    /// The bare frame, with nothing decoded attached to it.
    pub fn into_preview(self) -> Self {
        Self {
            frame: self.frame,
            ..Self::default()
        }
    }
}

/// The barcode decoding library, seen through a single call.
pub trait Decoder {
    fn scan(&mut self, frame: Arc<Frame>) -> ScanResult;
}

impl<F> Decoder for F
where
    F: FnMut(Arc<Frame>) -> ScanResult,
{
    fn scan(&mut self, frame: Arc<Frame>) -> ScanResult {
        self(frame)
    }
}

/// Format names understood on the command line, in ZXing spelling.
pub const KNOWN_FORMATS: &[&str] = &[
    "AZTEC",
    "CODABAR",
    "CODE_39",
    "CODE_93",
    "CODE_128",
    "DATA_MATRIX",
    "EAN_8",
    "EAN_13",
    "ITF",
    "MAXICODE",
    "PDF_417",
    "QR_CODE",
    "RSS_14",
    "RSS_EXPANDED",
    "UPC_A",
    "UPC_E",
];

pub fn is_known_format(name: &str) -> bool {
    KNOWN_FORMATS.iter().any(|f| f.eq_ignore_ascii_case(name))
}
