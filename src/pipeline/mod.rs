//! Capture -> scan -> deliver worker pipeline.
//!
//! Three long-lived threads connected by two [`BoundedQueue`]s. Every worker
//! waits with a ceiling and checks the shared [`CancellationToken`] between
//! waits, so shutdown completes within one wait cycle.

pub mod cancel;
pub mod capture_worker;
pub mod debounce;
pub mod delivery_worker;
pub mod queue;
pub mod scan_worker;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

pub use cancel::CancellationToken;
pub use capture_worker::{CaptureStats, CaptureWorker};
pub use debounce::{ScanPolicy, Verdict};
pub use delivery_worker::DeliveryWorker;
pub use queue::BoundedQueue;
pub use scan_worker::ScanWorker;

use crate::capture::{Frame, FrameSource};
use crate::delivery::Deliver;
use crate::error::{CaptureError, PipelineError};
use crate::scan::{Decoder, ScanResult};
use crate::Config;

/// Cancels the pipeline if the owning worker thread unwinds from a panic.
struct CancelOnPanic(CancellationToken);

impl Drop for CancelOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Handles to the three running workers.
pub struct Pipeline {
    capture: JoinHandle<Result<(), CaptureError>>,
    scan: JoinHandle<()>,
    deliver: JoinHandle<()>,
    frames: Arc<BoundedQueue<Arc<Frame>>>,
    results: Arc<BoundedQueue<ScanResult>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Start all three workers.
    ///
    /// `open` runs on the capture thread so the device never leaves it; if it
    /// fails the pipeline is cancelled and the error surfaces from [`join`].
    ///
    /// [`join`]: Pipeline::join
    pub fn spawn<S, F, D, P>(
        open: F,
        decoder: D,
        sink: P,
        config: &Config,
        cancel: CancellationToken,
    ) -> io::Result<Self>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S, CaptureError> + Send + 'static,
        D: Decoder + Send + 'static,
        P: Deliver + Send + 'static,
    {
        let frames = Arc::new(BoundedQueue::new());
        let results = Arc::new(BoundedQueue::new());
        let ceiling = Duration::from_millis(config.pipeline.wait_ceiling_ms);

        let capture = {
            let frames = Arc::clone(&frames);
            let cancel = cancel.clone();
            let configured = config.pipeline.frame_watermark;
            let fallback = config.capture.fps as usize;
            thread::Builder::new()
                .name("barscan-capture".into())
                .spawn(move || {
                    let _guard = CancelOnPanic(cancel.clone());
                    let source = match open() {
                        Ok(source) => source,
                        Err(e) => {
                            error!("Could not initialise capture device: {}", e);
                            cancel.cancel();
                            return Err(e);
                        }
                    };
                    let watermark = configured
                        .or_else(|| source.frame_rate().map(|fps| fps as usize))
                        .unwrap_or(fallback)
                        .max(1);
                    info!(watermark, "Capture worker started");
                    CaptureWorker::new(source, frames, watermark, cancel)
                        .with_wait_ceiling(ceiling)
                        .run()
                })?
        };

        let scan = {
            let worker = ScanWorker::new(
                decoder,
                Arc::clone(&frames),
                Arc::clone(&results),
                &config.scan,
                cancel.clone(),
            )
            .with_wait_ceiling(ceiling);
            Self::spawn_named("barscan-scan", move || worker.run(), &cancel)?
        };

        let deliver = {
            let worker = DeliveryWorker::new(sink, Arc::clone(&results), cancel.clone())
                .with_wait_ceiling(ceiling);
            Self::spawn_named("barscan-deliver", move || worker.run(), &cancel)?
        };

        Ok(Self {
            capture,
            scan,
            deliver,
            frames,
            results,
            cancel,
        })
    }

    fn spawn_named<T>(
        name: &str,
        body: T,
        cancel: &CancellationToken,
    ) -> io::Result<JoinHandle<()>>
    where
        T: FnOnce() + Send + 'static,
    {
        let guard = CancelOnPanic(cancel.clone());
        thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let _guard = guard;
                body()
            })
            .map_err(|e| {
                // Unwind the workers that did start.
                cancel.cancel();
                e
            })
    }

    /// True once every worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.capture.is_finished() && self.scan.is_finished() && self.deliver.is_finished()
    }

    /// Cancel the pipeline and wait for every worker to unwind.
    pub fn shutdown(self) -> Result<(), PipelineError> {
        self.cancel.cancel();
        self.join()
    }

    /// Wait for all workers. A capture fault or a panic is reported after
    /// every thread has been joined.
    pub fn join(self) -> Result<(), PipelineError> {
        let capture = self.capture.join();
        if capture.is_err() {
            self.cancel.cancel();
        }
        let scan = self.scan.join();
        let deliver = self.deliver.join();

        let (frames_left, results_left) = (self.frames.size(), self.results.size());
        let (queued, scanned) = self.frames.stats();
        let (reported, delivered) = self.results.stats();
        info!(
            queued,
            scanned,
            reported,
            delivered,
            frames_left,
            results_left,
            "All workers stopped"
        );

        capture.map_err(|_| PipelineError::Panicked("capture"))??;
        scan.map_err(|_| PipelineError::Panicked("scan"))?;
        deliver.map_err(|_| PipelineError::Panicked("deliver"))?;
        Ok(())
    }
}
