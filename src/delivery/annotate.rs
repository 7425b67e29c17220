use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;

use crate::capture::{Frame, PixelFormat};
use crate::error::DeliveryError;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Copy `frame` into an RGB image with a green ring around every point.
pub fn annotate(frame: &Frame, points: &[(i32, i32)], radius: u32) -> RgbImage {
    let rgb = match frame.format() {
        PixelFormat::Rgb24 => frame.data().to_vec(),
        PixelFormat::Grey8 => frame.data().iter().flat_map(|&y| [y, y, y]).collect(),
    };
    let mut img = RgbImage::from_raw(frame.width(), frame.height(), rgb)
        .unwrap_or_else(|| RgbImage::new(frame.width(), frame.height()));

    for &(cx, cy) in points {
        draw_ring(&mut img, (cx, cy), radius as i32);
    }
    img
}

/// Two-pixel ring, clipped to the image.
fn draw_ring(img: &mut RgbImage, center: (i32, i32), radius: i32) {
    for r in [radius, radius + 1] {
        draw_hollow_circle_mut(img, center, r, GREEN);
    }
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, DeliveryError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;

    fn grey_frame(width: u32, height: u32) -> Frame {
        let meta = FrameMetadata {
            sequence: 0,
            width,
            height,
            format: PixelFormat::Grey8,
        };
        Frame::new(vec![40u8; (width * height) as usize], meta).unwrap()
    }

    #[test]
    fn rings_are_drawn_around_points_and_clipped() {
        let frame = grey_frame(40, 30);
        let img = annotate(&frame, &[(20, 15), (0, 0)], 10);

        assert_eq!(*img.get_pixel(30, 15), GREEN);
        assert_eq!(*img.get_pixel(31, 15), GREEN);
        assert_eq!(*img.get_pixel(28, 15), Rgb([40, 40, 40]));
        assert_eq!(*img.get_pixel(20, 5), GREEN);
        assert_eq!(*img.get_pixel(20, 15), Rgb([40, 40, 40]));
        assert_eq!(*img.get_pixel(10, 0), GREEN);
    }

    #[test]
    fn encodes_a_jpeg() {
        let img = annotate(&grey_frame(16, 16), &[], 10);
        let jpeg = encode_jpeg(&img, 60).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
