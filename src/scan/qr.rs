use std::sync::Arc;

use rqrr::PreparedImage;
use tracing::{debug, error, info, warn};

use super::{is_known_format, Decoder, ScanResult};
use crate::capture::{Frame, LuminanceSource};

const QR_CODE: &str = "QR_CODE";

/// QR code decoder backed by `rqrr`
#[derive(Debug)]
pub struct QrDecoder {
    enabled: bool,
}

impl QrDecoder {
    /// Build a decoder for the requested format names. An empty list means
    /// every format this decoder supports.
    pub fn new(formats: &[String]) -> Self {
        let mut enabled = formats.is_empty();

        for name in formats {
            if !is_known_format(name) {
                error!("Invalid format {}", name);
            } else if name.eq_ignore_ascii_case(QR_CODE) {
                info!("Scanning for barcode format: {}", QR_CODE);
                enabled = true;
            } else {
                warn!("Barcode format {} is not supported by the QR decoder", name);
            }
        }

        if !enabled {
            warn!("No supported barcode format requested, frames will not be decoded");
        }
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Decoder for QrDecoder {
    fn scan(&mut self, frame: Arc<Frame>) -> ScanResult {
        if !self.enabled {
            return ScanResult::not_found(frame);
        }

        let mut img = {
            let source: &Frame = &frame;
            let (width, height) = (source.width() as usize, source.height() as usize);
            let luma = source.matrix();
            PreparedImage::prepare_from_greyscale(width, height, |x, y| luma[y * width + x])
        };

        for grid in img.detect_grids() {
            match grid.decode() {
                Ok((_meta, text)) => {
                    let points = grid.bounds.iter().map(|p| (p.x, p.y)).collect();
                    return ScanResult {
                        format: QR_CODE.to_string(),
                        text,
                        points,
                        frame: Some(frame),
                    };
                }
                Err(e) => debug!("QR grid failed to decode: {:?}", e),
            }
        }

        ScanResult::not_found(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};

    fn blank_frame() -> Arc<Frame> {
        let meta = FrameMetadata {
            sequence: 0,
            width: 64,
            height: 48,
            format: PixelFormat::Grey8,
        };
        Arc::new(Frame::new(vec![255u8; 64 * 48], meta).unwrap())
    }

    #[test]
    fn format_list_controls_enablement() {
        assert!(QrDecoder::new(&[]).is_enabled());
        assert!(QrDecoder::new(&["qr_code".to_string()]).is_enabled());
        assert!(!QrDecoder::new(&["EAN_13".to_string(), "BOGUS".to_string()]).is_enabled());
    }

    #[test]
    fn blank_frame_is_not_found() {
        let mut decoder = QrDecoder::new(&[]);
        let frame = blank_frame();
        let result = decoder.scan(Arc::clone(&frame));
        assert!(!result.is_found());
        assert!(result.points.is_empty());
        assert_eq!(result.frame.map(|f| f.sequence()), Some(frame.sequence()));
    }
}
