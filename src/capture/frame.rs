use std::borrow::Cow;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Pixel layouts a [`Frame`] can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb24,
    /// Single 8-bit luma channel
    Grey8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Grey8 => 1,
        }
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Owned copy of one captured image.
///
/// The bytes are copied out of the device mapping at capture time, so a frame
/// never borrows kernel memory. Frames travel between stages as `Arc<Frame>`
/// and are never mutated after construction.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    meta: FrameMetadata,
    timestamp: Instant,
}

impl Frame {
    /// Wrap `data`, checking it holds exactly `width * height` pixels.
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = meta.width as usize * meta.height as usize * meta.format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::Geometry {
                width: meta.width,
                height: meta.height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            meta,
            timestamp: Instant::now(),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Capture time, for latency tracking
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    fn stride(&self) -> usize {
        self.meta.width as usize * self.meta.format.bytes_per_pixel()
    }
}

/// Read-only greyscale view of an image, as consumed by barcode decoders.
pub trait LuminanceSource {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Fill `row` with the luma values of line `y` and return it. Lines
    /// outside the image come back empty.
    fn row<'a>(&self, y: usize, row: &'a mut Vec<u8>) -> &'a [u8];

    /// The whole image as `width * height` luma bytes.
    fn matrix(&self) -> Cow<'_, [u8]>;
}

#[inline]
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

impl LuminanceSource for Frame {
    fn width(&self) -> usize {
        self.meta.width as usize
    }

    fn height(&self) -> usize {
        self.meta.height as usize
    }

    fn row<'a>(&self, y: usize, row: &'a mut Vec<u8>) -> &'a [u8] {
        let stride = self.stride();
        row.clear();
        let Some(line) = y
            .checked_mul(stride)
            .and_then(|start| Some(start..start.checked_add(stride)?))
            .and_then(|span| self.data.get(span))
        else {
            return row;
        };
        match self.meta.format {
            PixelFormat::Grey8 => row.extend_from_slice(line),
            PixelFormat::Rgb24 => {
                row.extend(line.chunks_exact(3).map(|px| luma(px[0], px[1], px[2])));
            }
        }
        row
    }

    fn matrix(&self) -> Cow<'_, [u8]> {
        match self.meta.format {
            PixelFormat::Grey8 => Cow::Borrowed(&self.data),
            PixelFormat::Rgb24 => Cow::Owned(
                self.data
                    .chunks_exact(3)
                    .map(|px| luma(px[0], px[1], px[2]))
                    .collect(),
            ),
        }
    }
}
