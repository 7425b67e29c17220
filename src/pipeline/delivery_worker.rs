//! Delivery stage: result queue -> external sink

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::queue::BoundedQueue;
use crate::delivery::Deliver;
use crate::scan::ScanResult;

pub struct DeliveryWorker<P> {
    sink: P,
    results: Arc<BoundedQueue<ScanResult>>,
    wait_ceiling: Duration,
    cancel: CancellationToken,
}

impl<P: Deliver> DeliveryWorker<P> {
    pub fn new(sink: P, results: Arc<BoundedQueue<ScanResult>>, cancel: CancellationToken) -> Self {
        Self {
            sink,
            results,
            wait_ceiling: Duration::from_secs(1),
            cancel,
        }
    }

    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }

    /// Deliver results until cancelled. Failures are logged and skipped.
    pub fn run(mut self) {
        while !self.cancel.is_cancelled() {
            let Some(result) = self.results.pop_with_timeout(self.wait_ceiling) else {
                continue;
            };
            self.deliver(&result);
        }
        debug!("Delivery worker exiting");
    }

    /// Returns whether the result was handed off successfully.
    pub fn deliver(&mut self, result: &ScanResult) -> bool {
        if result.frame.is_none() {
            return false;
        }
        match self.sink.deliver(result) {
            Ok(()) => {
                metrics::counter!("barscan_deliveries_total", "outcome" => "ok").increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("barscan_deliveries_total", "outcome" => "error").increment(1);
                warn!("Could not post result: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, FrameMetadata, PixelFormat};
    use crate::error::DeliveryError;

    fn with_frame(text: &str) -> ScanResult {
        let meta = FrameMetadata {
            sequence: 0,
            width: 1,
            height: 1,
            format: PixelFormat::Grey8,
        };
        ScanResult {
            text: text.into(),
            frame: Some(Arc::new(Frame::new(vec![0u8], meta).unwrap())),
            ..ScanResult::default()
        }
    }

    #[test]
    fn failures_do_not_stop_later_results() {
        let mut seen = Vec::new();
        let sink = |r: &ScanResult| {
            seen.push(r.text.clone());
            if r.text == "bad" {
                Err(DeliveryError::MissingFrame)
            } else {
                Ok(())
            }
        };
        let mut worker =
            DeliveryWorker::new(sink, Arc::new(BoundedQueue::new()), CancellationToken::new());

        assert!(!worker.deliver(&with_frame("bad")));
        assert!(worker.deliver(&with_frame("good")));
        assert!(!worker.deliver(&ScanResult::default()));
        drop(worker);

        assert_eq!(seen, vec!["bad", "good"]);
    }
}
