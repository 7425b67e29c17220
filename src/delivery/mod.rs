//! Delivery collaborators: where accepted scan results end up.

mod annotate;
mod http;

use tracing::info;

pub use annotate::{annotate, encode_jpeg};
pub use http::{encode_payload, HttpPoster};

use crate::error::DeliveryError;
use crate::scan::ScanResult;

/// Sink for scan results leaving the pipeline.
pub trait Deliver {
    fn deliver(&mut self, result: &ScanResult) -> Result<(), DeliveryError>;
}

impl<F> Deliver for F
where
    F: FnMut(&ScanResult) -> Result<(), DeliveryError>,
{
    fn deliver(&mut self, result: &ScanResult) -> Result<(), DeliveryError> {
        self(result)
    }
}

/// Writes decoded barcodes to the log. Used when no endpoint is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl Deliver for LogSink {
    fn deliver(&mut self, result: &ScanResult) -> Result<(), DeliveryError> {
        if result.is_found() {
            info!(format = %result.format, "{}", result.text);
        }
        Ok(())
    }
}
