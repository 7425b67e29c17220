//! V4L2 capture with a memory-mapped buffer pool

use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use memmap2::{MmapOptions, MmapRaw};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, instrument, warn};
use v4l::capability::Flags as CapFlags;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::{self, CaptureFormat, RawLayout};
use super::frame::{Frame, PixelFormat};
use super::regions::{RegionHandle, RegionLedger};
use super::{sys, FrameSource, Readiness};
use crate::error::CaptureError;
use crate::CaptureConfig;

const V4L2_BUF_FLAG_ERROR: u32 = 0x0040;

/// One buffer the driver handed back through DQBUF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Completed {
    index: u32,
    bytes_used: u32,
    flags: u32,
}

/// Driver side of the buffer rotation.
trait BufferQueue {
    fn count(&self) -> usize;

    /// Length of the mapping for region `index`, 0 if there is none.
    fn region_len(&self, index: usize) -> usize;

    /// DQBUF. `Ok(None)` when no buffer has completed yet.
    fn dequeue(&mut self) -> Result<Option<Completed>, Errno>;

    /// QBUF
    fn enqueue(&mut self, index: u32) -> Result<(), Errno>;

    /// Copy the filled part of a dequeued region.
    fn copy_out(&self, handle: &RegionHandle) -> Vec<u8>;
}

/// Regions mapped from a V4L2 device fd
struct MmapQueue {
    fd: RawFd,
    regions: Vec<MmapRaw>,
}

impl BufferQueue for MmapQueue {
    fn count(&self) -> usize {
        self.regions.len()
    }

    fn region_len(&self, index: usize) -> usize {
        self.regions.get(index).map_or(0, MmapRaw::len)
    }

    fn dequeue(&mut self) -> Result<Option<Completed>, Errno> {
        Ok(sys::dequeue_buffer(self.fd)?.map(|buf| Completed {
            index: buf.index,
            bytes_used: buf.bytesused,
            flags: buf.flags,
        }))
    }

    fn enqueue(&mut self, index: u32) -> Result<(), Errno> {
        sys::queue_buffer(self.fd, index)
    }

    fn copy_out(&self, handle: &RegionHandle) -> Vec<u8> {
        let Some(map) = self.regions.get(handle.index()) else {
            return Vec::new();
        };
        let len = handle.bytes_used().min(map.len());
        // SAFETY: the handle proves the region is dequeued, so the driver will
        // not write to it until it is queued again; `len` is clamped to the
        // mapping.
        let bytes = unsafe { std::slice::from_raw_parts(map.as_ptr(), len) };
        bytes.to_vec()
    }
}

/// Region ownership plus payload decoding on top of a [`BufferQueue`].
///
/// Regions are dequeued one at a time, copied out and queued straight back
/// before the copy is decoded, so the process never holds a region across
/// two calls to [`RegionPool::grab_frame`].
struct RegionPool<Q> {
    queue: Q,
    ledger: RegionLedger,
    layout: RawLayout,
    output: PixelFormat,
    sequence: u64,
    corrupt: u64,
}

impl<Q: BufferQueue> RegionPool<Q> {
    fn new(queue: Q, layout: RawLayout, output: PixelFormat) -> Self {
        Self {
            ledger: RegionLedger::new(queue.count()),
            queue,
            layout,
            output,
            sequence: 0,
            corrupt: 0,
        }
    }

    /// Hand every region to the device.
    fn queue_all(&mut self) -> Result<(), CaptureError> {
        for index in 0..self.ledger.len() {
            self.queue.enqueue(index as u32).map_err(|e| {
                CaptureError::config_io(format!("unable to queue buffer {}", index), e)
            })?;
            self.ledger.mark_queued(index)?;
        }
        Ok(())
    }

    /// Dequeue one completed region, if the device has one.
    ///
    /// Buffers the driver flagged as corrupt are queued back and skipped.
    fn acquire_completed_region(&mut self) -> Result<Option<RegionHandle>, CaptureError> {
        loop {
            let Some(buf) = self
                .queue
                .dequeue()
                .map_err(|e| CaptureError::fatal("unable to dequeue buffer from device", e))?
            else {
                return Ok(None);
            };

            let index = buf.index as usize;
            let len = self.queue.region_len(index);
            let used = match buf.bytes_used as usize {
                0 => len,
                n => n.min(len),
            };
            let handle = self.ledger.acquire(index, used)?;

            if buf.flags & V4L2_BUF_FLAG_ERROR != 0 {
                self.release_region(handle)?;
                self.corrupt += 1;
                warn!(index, "Driver flagged buffer as corrupt");
                continue;
            }
            return Ok(Some(handle));
        }
    }

    /// Queue a region back to the device. Failure leaks it from the rotation.
    fn release_region(&mut self, handle: RegionHandle) -> Result<(), CaptureError> {
        let index = handle.index();
        self.queue
            .enqueue(index as u32)
            .map_err(|e| CaptureError::fatal(format!("unable to requeue buffer {}", index), e))?;
        self.ledger.release(handle)?;
        Ok(())
    }

    fn grab_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            let Some(handle) = self.acquire_completed_region()? else {
                return Ok(None);
            };
            let raw = self.queue.copy_out(&handle);
            self.release_region(handle)?;

            self.sequence += 1;
            match decoder::decode_frame(&raw, self.layout, self.output, self.sequence) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    self.corrupt += 1;
                    metrics::counter!("barscan_frames_corrupt_total").increment(1);
                    warn!(sequence = self.sequence, "Discarding undecodable frame: {}", e);
                }
            }
        }
    }
}

/// Owner of a V4L2 device and its kernel-mapped capture regions.
pub struct V4l2Capture {
    // Unmapped before the device closes: fields drop in declaration order.
    pool: RegionPool<MmapQueue>,
    device: Option<Device>,
    fd: RawFd,
    fps: u32,
    streaming: bool,
}

impl V4l2Capture {
    /// Open the device, negotiate format and frame rate, and map the buffer pool.
    ///
    /// The driver may adjust geometry, frame rate and buffer count; the
    /// negotiated values are available through the accessors afterwards.
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture");

        let device = Device::with_path(&config.device)
            .map_err(|e| CaptureError::config_io(format!("unable to open {}", config.device), e))?;
        let fd = device.handle().fd();

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::config_io("unable to query device", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::config("device does not support video capture"));
        }
        if !caps.capabilities.contains(CapFlags::STREAMING) {
            return Err(CaptureError::config("device does not support streaming"));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::config_io("unable to read device format", e))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(config.format.fourcc());

        let fmt = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::config_io("unable to set device format", e))?;

        if CaptureFormat::from_fourcc(&fmt.fourcc.repr) != Some(config.format) {
            return Err(CaptureError::config(format!(
                "device does not support {:?} output (offered {})",
                config.format, fmt.fourcc
            )));
        }
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                "Device changed image dimensions to {}x{}",
                fmt.width, fmt.height
            );
        }

        let params = device
            .set_params(&Parameters::with_fps(config.fps))
            .map_err(|e| CaptureError::config_io("unable to set framerate", e))?;
        let fps = match params.interval.numerator {
            0 => config.fps,
            n => params.interval.denominator / n,
        };
        if fps != config.fps {
            warn!("Device changed framerate to {} fps", fps);
        }

        let count = sys::request_buffers(fd, config.buffer_count)
            .map_err(|e| CaptureError::config_io("unable to configure buffers", e))?;
        if count == 0 {
            return Err(CaptureError::config("driver allocated no buffers"));
        }
        if count != config.buffer_count {
            warn!("Driver was only able to allocate {} buffers", count);
        }

        let mut regions = Vec::with_capacity(count as usize);
        for index in 0..count {
            let buf = sys::query_buffer(fd, index).map_err(|e| {
                CaptureError::config_io(format!("querying buffer {} failed", index), e)
            })?;
            let map = MmapOptions::new()
                .len(buf.length as usize)
                .offset(u64::from(buf.offset()))
                .map_raw(fd)
                .map_err(|e| CaptureError::config_io("memory mapping failed", e))?;
            debug!(index, len = buf.length, "Mapped capture region");
            regions.push(map);
        }

        let layout = RawLayout {
            width: fmt.width,
            height: fmt.height,
            format: config.format,
        };
        Ok(Self {
            pool: RegionPool::new(MmapQueue { fd, regions }, layout, config.output),
            device: Some(device),
            fd,
            fps,
            streaming: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.pool.layout.width
    }

    pub fn height(&self) -> u32 {
        self.pool.layout.height
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn buffer_count(&self) -> usize {
        self.pool.queue.count()
    }

    /// Payloads dropped because the driver flagged them or they failed to decode
    pub fn corrupt_frames(&self) -> u64 {
        self.pool.corrupt
    }

    /// Queue every region to the device and switch streaming on.
    pub fn start_capture(&mut self) -> Result<(), CaptureError> {
        self.ensure_open()?;

        self.pool.queue_all()?;
        sys::stream_on(self.fd)
            .map_err(|e| CaptureError::config_io("unable to start streaming", e))?;
        self.streaming = true;

        info!("Capture stream started with {} buffers", self.buffer_count());
        Ok(())
    }

    /// Switch streaming off. The driver returns every region to the process.
    pub fn end_capture(&mut self) -> Result<(), CaptureError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.pool.ledger.reclaim_all();
        sys::stream_off(self.fd)
            .map_err(|e| CaptureError::config_io("unable to stop streaming", e))
    }

    /// Unmap all regions and close the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Err(e) = self.end_capture() {
            warn!("Could not stop stream: {}", e);
        }
        self.pool.queue.regions.clear();
        if self.device.take().is_some() {
            debug!("Closed capture device");
        }
    }

    /// Copy out the next completed frame and hand its region straight back.
    ///
    /// Re-queue failures are fatal; undecodable payloads are counted and
    /// skipped.
    #[instrument(level = "trace", skip(self))]
    pub fn grab_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.ensure_open()?;
        self.pool.grab_frame()
    }

    fn ensure_open(&self) -> Result<(), CaptureError> {
        match self.device {
            Some(_) => Ok(()),
            None => Err(CaptureError::config("device is closed")),
        }
    }
}

impl FrameSource for V4l2Capture {
    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, CaptureError> {
        self.ensure_open()?;

        // SAFETY: `self.fd` stays open while `self.device` is Some.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => Ok(Readiness::TimedOut),
            Ok(_) => Ok(Readiness::Ready),
            Err(Errno::EINTR) => Ok(Readiness::Interrupted),
            Err(e) => Err(CaptureError::fatal("poll on capture device failed", e)),
        }
    }

    fn grab_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        V4l2Capture::grab_frame(self)
    }

    fn frame_rate(&self) -> Option<u32> {
        Some(self.fps)
    }

    fn shutdown(&mut self) -> Result<(), CaptureError> {
        let stopped = self.end_capture();
        self.close();
        stopped
    }
}

impl Drop for V4l2Capture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use image::codecs::jpeg::JpegEncoder;
    use image::ExtendedColorType;

    use crate::capture::regions::Owner;

    const SIDE: u32 = 8;

    /// In-memory stand-in for the driver: DQBUF replays a script, QBUF is
    /// recorded and can be made to fail for one region.
    struct ScriptedQueue {
        regions: Vec<Vec<u8>>,
        completed: VecDeque<Completed>,
        enqueued: Vec<u32>,
        reject: Option<u32>,
    }

    impl BufferQueue for ScriptedQueue {
        fn count(&self) -> usize {
            self.regions.len()
        }

        fn region_len(&self, index: usize) -> usize {
            self.regions.get(index).map_or(0, Vec::len)
        }

        fn dequeue(&mut self) -> Result<Option<Completed>, Errno> {
            Ok(self.completed.pop_front())
        }

        fn enqueue(&mut self, index: u32) -> Result<(), Errno> {
            if self.reject == Some(index) {
                return Err(Errno::EIO);
            }
            self.enqueued.push(index);
            Ok(())
        }

        fn copy_out(&self, handle: &RegionHandle) -> Vec<u8> {
            self.regions[handle.index()][..handle.bytes_used()].to_vec()
        }
    }

    fn jpeg() -> Vec<u8> {
        let pixels = vec![200u8; (SIDE * SIDE) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(&pixels, SIDE, SIDE, ExtendedColorType::L8)
            .unwrap();
        out
    }

    fn done(index: u32, bytes_used: usize) -> Completed {
        Completed {
            index,
            bytes_used: bytes_used as u32,
            flags: 0,
        }
    }

    /// Regions 0 and 2 hold a good JPEG, region 1 holds garbage.
    fn streaming_pool() -> (RegionPool<ScriptedQueue>, usize) {
        let good = jpeg();
        let len = good.len();
        let mut garbage = vec![0xAB; len];
        garbage[..4].copy_from_slice(b"junk");
        let queue = ScriptedQueue {
            regions: vec![good.clone(), garbage, good],
            completed: VecDeque::new(),
            enqueued: Vec::new(),
            reject: None,
        };
        let layout = RawLayout {
            width: SIDE,
            height: SIDE,
            format: CaptureFormat::Mjpeg,
        };
        let mut pool = RegionPool::new(queue, layout, PixelFormat::Grey8);
        pool.queue_all().unwrap();
        pool.queue.enqueued.clear();
        (pool, len)
    }

    #[test]
    fn every_region_is_back_with_the_device_after_each_grab() {
        let (mut pool, len) = streaming_pool();
        assert_eq!(pool.ledger.held(), 0);

        pool.queue.completed.push_back(done(0, len));
        let frame = pool.grab_frame().unwrap().unwrap();
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.width(), SIDE);
        assert_eq!(pool.ledger.held(), 0);
        assert_eq!(pool.queue.enqueued, vec![0]);

        pool.queue.completed.push_back(done(2, len));
        assert!(pool.grab_frame().unwrap().is_some());
        assert_eq!(pool.ledger.held(), 0);

        assert!(pool.grab_frame().unwrap().is_none());
        assert_eq!(pool.ledger.held(), 0);
    }

    #[test]
    fn flagged_and_undecodable_buffers_are_requeued_and_skipped() {
        let (mut pool, len) = streaming_pool();
        let mut flagged = done(2, len);
        flagged.flags = V4L2_BUF_FLAG_ERROR;
        pool.queue
            .completed
            .extend([flagged, done(1, len), done(0, len)]);

        let frame = pool.grab_frame().unwrap().unwrap();

        // The flagged buffer never reaches the decoder; the garbage one does.
        assert_eq!(frame.sequence(), 2);
        assert_eq!(pool.corrupt, 2);
        assert_eq!(pool.queue.enqueued, vec![2, 1, 0]);
        assert_eq!(pool.ledger.held(), 0);
    }

    #[test]
    fn failed_requeue_is_fatal() {
        let (mut pool, len) = streaming_pool();
        pool.queue.reject = Some(0);
        pool.queue.completed.push_back(done(0, len));

        let err = pool.grab_frame().unwrap_err();
        assert!(matches!(err, CaptureError::Fatal { .. }));
        assert_eq!(pool.ledger.owner(0), Some(Owner::Process));
    }

    #[test]
    fn zero_bytes_used_reads_the_whole_region() {
        let (mut pool, _) = streaming_pool();
        pool.queue.completed.push_back(done(0, 0));
        assert!(pool.grab_frame().unwrap().is_some());
        assert_eq!(pool.ledger.held(), 0);
    }
}
