//! Capture stage: device -> frame queue

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, warn};

use super::cancel::CancellationToken;
use super::queue::BoundedQueue;
use crate::capture::{Frame, FrameSource, Readiness};
use crate::error::CaptureError;

/// Summary window is `1 << STATS_WINDOW_SHIFT` seconds.
const STATS_WINDOW_SHIFT: u32 = 3;

/// Running totals shared with whoever supervises the capture thread.
#[derive(Debug, Default)]
pub struct CaptureStats {
    captured: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    timeouts: CachePadded<AtomicU64>,
}

impl CaptureStats {
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Device waits that ran the full ceiling without a frame
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

/// Per-window counters, reset each time a summary is emitted.
#[derive(Debug)]
struct StatsWindow {
    origin: Instant,
    index: u64,
    captured: u64,
    dropped: u64,
}

impl StatsWindow {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            index: 0,
            captured: 0,
            dropped: 0,
        }
    }

    /// Close the window if `now` has moved past it, returning its counts.
    fn roll(&mut self, now: Instant) -> Option<(u64, u64)> {
        let index = now.saturating_duration_since(self.origin).as_secs() >> STATS_WINDOW_SHIFT;
        if index == self.index {
            return None;
        }
        self.index = index;
        let counts = (self.captured, self.dropped);
        self.captured = 0;
        self.dropped = 0;
        Some(counts)
    }
}

pub struct CaptureWorker<S> {
    source: S,
    frames: Arc<BoundedQueue<Arc<Frame>>>,
    watermark: usize,
    wait_ceiling: Duration,
    cancel: CancellationToken,
    stats: Arc<CaptureStats>,
    window: StatsWindow,
}

impl<S: FrameSource> CaptureWorker<S> {
    pub fn new(
        source: S,
        frames: Arc<BoundedQueue<Arc<Frame>>>,
        watermark: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            frames,
            watermark,
            wait_ceiling: Duration::from_secs(1),
            cancel,
            stats: Arc::default(),
            window: StatsWindow::new(Instant::now()),
        }
    }

    /// Longest single wait on the device before cancellation is rechecked.
    pub fn with_wait_ceiling(mut self, ceiling: Duration) -> Self {
        self.wait_ceiling = ceiling;
        self
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Queue `frame` unless the consumer is already `watermark` frames behind,
    /// in which case the new frame is dropped. Returns whether it was queued.
    pub fn offer(&mut self, frame: Frame) -> bool {
        self.stats.captured.fetch_add(1, Ordering::Relaxed);
        self.window.captured += 1;
        metrics::counter!("barscan_frames_captured_total").increment(1);

        let depth = self.frames.size();
        metrics::gauge!("barscan_queue_depth", "queue" => "frames").set(depth as f64);
        if depth >= self.watermark {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            self.window.dropped += 1;
            metrics::counter!("barscan_frames_dropped_total").increment(1);
            warn!(depth, "Frame queue full, discarding frame");
            return false;
        }

        self.frames.push(Arc::new(frame));
        true
    }

    /// Capture until cancelled or the device fails, then release the device.
    ///
    /// A capture fault cancels the whole pipeline before returning.
    pub fn run(mut self) -> Result<(), CaptureError> {
        let outcome = self.capture_loop();

        if let Err(e) = &outcome {
            error!("Capture stopped: {}", e);
            self.cancel.cancel();
        }
        if let Err(e) = self.source.shutdown() {
            error!("Could not shutdown capture device: {}", e);
        }

        info!(
            captured = self.stats.captured(),
            dropped = self.stats.dropped(),
            timeouts = self.stats.timeouts(),
            "Capture worker exiting"
        );
        outcome
    }

    fn capture_loop(&mut self) -> Result<(), CaptureError> {
        while !self.cancel.is_cancelled() {
            self.report(Instant::now());

            match self.source.wait_ready(self.wait_ceiling)? {
                Readiness::Ready => {
                    while let Some(frame) = self.source.grab_frame()? {
                        self.offer(frame);
                    }
                }
                Readiness::TimedOut => {
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    if !self.cancel.is_cancelled() {
                        warn!("Timeout waiting for frame from device");
                    }
                }
                Readiness::Interrupted => debug!("Device wait interrupted"),
            }
        }
        Ok(())
    }

    fn report(&mut self, now: Instant) {
        if let Some((captured, dropped)) = self.window.roll(now) {
            info!(
                "Captured {} frames, dropped {} in the last {}s",
                captured,
                dropped,
                1u64 << STATS_WINDOW_SHIFT
            );
        }
    }
}
