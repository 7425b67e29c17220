//! Conversion of raw device payloads into [`Frame`] pixels.

use jpeg_decoder::Decoder;
use serde::{Deserialize, Serialize};

use super::frame::{luma, Frame, FrameMetadata, PixelFormat};
use crate::error::FrameError;

/// Payload layouts a capture device can be asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
    Grey,
}

impl CaptureFormat {
    pub const fn fourcc(self) -> &'static [u8; 4] {
        match self {
            CaptureFormat::Mjpeg => b"MJPG",
            CaptureFormat::Yuyv => b"YUYV",
            CaptureFormat::Rgb24 => b"RGB3",
            CaptureFormat::Grey => b"GREY",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        [Self::Mjpeg, Self::Yuyv, Self::Rgb24, Self::Grey]
            .into_iter()
            .find(|f| f.fourcc() == code)
    }
}

/// Geometry and layout of the raw payloads coming off the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    pub width: u32,
    pub height: u32,
    pub format: CaptureFormat,
}

/// Turn one raw payload into a frame in the `output` pixel format.
pub fn decode_frame(
    data: &[u8],
    layout: RawLayout,
    output: PixelFormat,
    sequence: u64,
) -> Result<Frame, FrameError> {
    let pixels = match layout.format {
        CaptureFormat::Mjpeg => decode_mjpeg(data, output)?,
        CaptureFormat::Yuyv => {
            let data = exact(data, layout, 2)?;
            match output {
                PixelFormat::Rgb24 => yuyv_to_rgb(data),
                PixelFormat::Grey8 => data.iter().step_by(2).copied().collect(),
            }
        }
        CaptureFormat::Rgb24 => {
            let data = exact(data, layout, 3)?;
            match output {
                PixelFormat::Rgb24 => data.to_vec(),
                PixelFormat::Grey8 => rgb_to_grey(data),
            }
        }
        CaptureFormat::Grey => {
            let data = exact(data, layout, 1)?;
            match output {
                PixelFormat::Rgb24 => data.iter().flat_map(|&y| [y, y, y]).collect(),
                PixelFormat::Grey8 => data.to_vec(),
            }
        }
    };

    Frame::new(
        pixels,
        FrameMetadata {
            sequence,
            width: layout.width,
            height: layout.height,
            format: output,
        },
    )
}

/// Drivers may report padding past the image; cut it off, reject short payloads.
fn exact(data: &[u8], layout: RawLayout, bpp: usize) -> Result<&[u8], FrameError> {
    let len = layout.width as usize * layout.height as usize * bpp;
    data.get(..len).ok_or(FrameError::Truncated {
        width: layout.width,
        height: layout.height,
        len: data.len(),
    })
}

fn decode_mjpeg(data: &[u8], output: PixelFormat) -> Result<Vec<u8>, FrameError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or(FrameError::Jpeg(jpeg_decoder::Error::Format(
            "missing frame header".into(),
        )))?;

    match (info.pixel_format, output) {
        (jpeg_decoder::PixelFormat::RGB24, PixelFormat::Rgb24) => Ok(pixels),
        (jpeg_decoder::PixelFormat::RGB24, PixelFormat::Grey8) => Ok(rgb_to_grey(&pixels)),
        (jpeg_decoder::PixelFormat::L8, PixelFormat::Grey8) => Ok(pixels),
        (jpeg_decoder::PixelFormat::L8, PixelFormat::Rgb24) => {
            Ok(pixels.iter().flat_map(|&y| [y, y, y]).collect())
        }
        (other, _) => Err(FrameError::JpegLayout(other)),
    }
}

fn rgb_to_grey(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect()
}

/// BT.601 limited-range YUV 4:2:2 to packed RGB, integer arithmetic.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 * 3);
    for quad in data.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        out.extend_from_slice(&yuv_to_rgb(y0, u, v));
        out.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    out
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(width: u32, height: u32, format: CaptureFormat) -> RawLayout {
        RawLayout {
            width,
            height,
            format,
        }
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(CaptureFormat::from_fourcc(b"YUYV"), Some(CaptureFormat::Yuyv));
        assert_eq!(CaptureFormat::from_fourcc(b"H264"), None);
    }

    #[test]
    fn yuyv_luma_plane_becomes_grey() {
        let raw = [16, 128, 235, 128, 100, 90, 200, 170];
        let frame = decode_frame(&raw, layout(2, 2, CaptureFormat::Yuyv), PixelFormat::Grey8, 7)
            .unwrap();
        assert_eq!(frame.data(), &[16, 235, 100, 200]);
        assert_eq!(frame.sequence(), 7);
    }

    #[test]
    fn yuyv_black_and_white_convert_to_rgb() {
        let raw = [16, 128, 235, 128];
        let frame =
            decode_frame(&raw, layout(2, 1, CaptureFormat::Yuyv), PixelFormat::Rgb24, 0).unwrap();
        assert_eq!(frame.data(), &[0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn padded_payloads_are_trimmed_and_short_ones_rejected() {
        let raw = [9u8; 16];
        let frame =
            decode_frame(&raw, layout(2, 2, CaptureFormat::Grey), PixelFormat::Grey8, 0).unwrap();
        assert_eq!(frame.data().len(), 4);

        let err = decode_frame(&raw[..3], layout(2, 2, CaptureFormat::Grey), PixelFormat::Grey8, 0)
            .unwrap_err();
        assert!(matches!(err, FrameError::Truncated { len: 3, .. }));
    }

    #[test]
    fn garbage_mjpeg_is_an_error() {
        let raw = [0u8, 1, 2, 3, 4];
        assert!(
            decode_frame(&raw, layout(2, 2, CaptureFormat::Mjpeg), PixelFormat::Rgb24, 0).is_err()
        );
    }
}
