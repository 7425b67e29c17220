//! Scan stage: frame queue -> decoder -> result queue

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::cancel::CancellationToken;
use super::debounce::{ScanPolicy, Verdict};
use super::queue::BoundedQueue;
use crate::capture::Frame;
use crate::scan::{Decoder, ScanResult};
use crate::ScanConfig;

pub struct ScanWorker<D> {
    decoder: D,
    frames: Arc<BoundedQueue<Arc<Frame>>>,
    results: Arc<BoundedQueue<ScanResult>>,
    policy: ScanPolicy,
    wait_ceiling: Duration,
    cancel: CancellationToken,
}

impl<D: Decoder> ScanWorker<D> {
    pub fn new(
        decoder: D,
        frames: Arc<BoundedQueue<Arc<Frame>>>,
        results: Arc<BoundedQueue<ScanResult>>,
        config: &ScanConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            decoder,
            frames,
            results,
            policy: ScanPolicy::new(config, Instant::now()),
            wait_ceiling: Duration::from_secs(1),
            cancel,
        }
    }

    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }

    pub fn run(mut self) {
        while !self.cancel.is_cancelled() {
            let Some(frame) = self.frames.pop_with_timeout(self.wait_ceiling) else {
                continue;
            };
            let result = self.decoder.scan(frame);
            self.handle(result, Instant::now());
        }
        debug!("Scan worker exiting");
    }

    /// Apply debounce and heartbeat policy to one decode result.
    pub fn handle(&mut self, result: ScanResult, now: Instant) -> Verdict {
        let verdict = self.policy.judge(&result.text, now, self.results.size());
        match verdict {
            Verdict::Accept => {
                info!(format = %result.format, "Scanned {}", result.text);
                metrics::counter!("barscan_results_pushed_total", "kind" => "scan").increment(1);
                self.results.push(result);
            }
            Verdict::Heartbeat => {
                metrics::counter!("barscan_results_pushed_total", "kind" => "heartbeat")
                    .increment(1);
                // A repeat of the last accepted text goes out as a plain preview.
                self.results.push(result.into_preview());
            }
            Verdict::Suppressed => debug!("Suppressed duplicate result {}", result.text),
            Verdict::Idle => {}
        }
        metrics::gauge!("barscan_queue_depth", "queue" => "results")
            .set(self.results.size() as f64);
        verdict
    }
}
