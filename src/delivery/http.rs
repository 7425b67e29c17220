use std::time::Duration;

use tracing::debug;
use ureq::{Agent, AgentBuilder};

use super::annotate::{annotate, encode_jpeg};
use super::Deliver;
use crate::error::DeliveryError;
use crate::scan::ScanResult;
use crate::DeliveryConfig;

/// Posts annotated results to a collector as MessagePack.
pub struct HttpPoster {
    agent: Agent,
    url: String,
    jpeg_quality: u8,
    marker_radius: u32,
}

impl HttpPoster {
    pub fn new(url: impl Into<String>, config: &DeliveryConfig) -> Self {
        let agent = AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self {
            agent,
            url: url.into(),
            jpeg_quality: config.jpeg_quality,
            marker_radius: config.marker_radius,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Deliver for HttpPoster {
    fn deliver(&mut self, result: &ScanResult) -> Result<(), DeliveryError> {
        let frame = result.frame.as_ref().ok_or(DeliveryError::MissingFrame)?;

        let img = annotate(frame, &result.points, self.marker_radius);
        let jpeg = encode_jpeg(&img, self.jpeg_quality)?;
        let body = encode_payload(result, &jpeg)?;
        debug!("jpeg {} bytes, msgpack {} bytes", jpeg.len(), body.len());

        self.agent
            .post(&self.url)
            .set("Content-Type", "application/msgpack")
            .send_bytes(&body)
            .map_err(Box::new)?;
        Ok(())
    }
}

/// Serialize a result as a stream of four MessagePack values:
/// text, format, points and the JPEG as a binary blob.
pub fn encode_payload(result: &ScanResult, jpeg: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    let mut buf = Vec::with_capacity(jpeg.len() + 64);
    rmp_serde::encode::write(&mut buf, &result.text)?;
    rmp_serde::encode::write(&mut buf, &result.format)?;
    rmp_serde::encode::write(&mut buf, &result.points)?;
    rmp::encode::write_bin(&mut buf, jpeg)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn payload_is_four_msgpack_values() {
        let result = ScanResult {
            format: "QR_CODE".into(),
            text: "hello".into(),
            points: vec![(1, 2), (3, 4)],
            frame: None,
        };
        let body = encode_payload(&result, &[0xFF, 0xD8, 0xFF]).unwrap();

        let mut rd = Cursor::new(body.as_slice());
        let text: String = rmp_serde::decode::from_read(&mut rd).unwrap();
        let format: String = rmp_serde::decode::from_read(&mut rd).unwrap();
        let points: Vec<(i32, i32)> = rmp_serde::decode::from_read(&mut rd).unwrap();
        let len = rmp::decode::read_bin_len(&mut rd).unwrap() as usize;

        assert_eq!(text, "hello");
        assert_eq!(format, "QR_CODE");
        assert_eq!(points, vec![(1, 2), (3, 4)]);
        assert_eq!(len, 3);
        assert_eq!(&body[body.len() - 3..], &[0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn results_without_frames_are_refused() {
        let mut poster = HttpPoster::new("http://127.0.0.1:9/post", &DeliveryConfig::default());
        let err = poster.deliver(&ScanResult::default()).unwrap_err();
        assert!(matches!(err, DeliveryError::MissingFrame));
    }
}
