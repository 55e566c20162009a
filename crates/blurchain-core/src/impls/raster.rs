//! Stand-in imaging capabilities: a raw grayscale container and a box blur.
//!
//! Container layout: `b"BLR"`, one format byte (`P` or `J`), width and height
//! as big-endian `u32`, then `width * height` pixel bytes.

use crate::ports::{Blur, CodecError, ImageCodec, ImageFormat, RasterImage};

const MAGIC: &[u8; 3] = b"BLR";
const HEADER_LEN: usize = 3 + 1 + 4 + 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl RawCodec {
    fn format_byte(format: ImageFormat) -> u8 {
        match format {
            ImageFormat::Png => b'P',
            ImageFormat::Jpeg => b'J',
        }
    }
}

impl ImageCodec for RawCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RasterImage, CodecError> {
        if bytes.len() < HEADER_LEN || &bytes[..3] != MAGIC {
            return Err(CodecError::Malformed("missing header".into()));
        }
        if !matches!(bytes[3], b'P' | b'J') {
            return Err(CodecError::Malformed(format!("unknown format byte {}", bytes[3])));
        }
        let width = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let height = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        RasterImage::new(width, height, bytes[HEADER_LEN..].to_vec()).ok_or_else(|| {
            CodecError::Malformed(format!(
                "expected {} pixels for {width}x{height}, got {}",
                width as usize * height as usize,
                bytes.len() - HEADER_LEN
            ))
        })
    }

    fn encode(&self, image: &RasterImage, format: ImageFormat) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(HEADER_LEN + image.pixels.len());
        out.extend_from_slice(MAGIC);
        out.push(Self::format_byte(format));
        out.extend_from_slice(&image.width.to_be_bytes());
        out.extend_from_slice(&image.height.to_be_bytes());
        out.extend_from_slice(&image.pixels);
        Ok(out)
    }
}

/// 3x3 box blur with clamped edges; one pass per unit of intensity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxBlur;

impl BoxBlur {
    fn pass(image: &RasterImage) -> RasterImage {
        let (w, h) = (image.width as i64, image.height as i64);
        let at = |x: i64, y: i64| {
            let x = x.clamp(0, w - 1);
            let y = y.clamp(0, h - 1);
            image.pixels[(y * w + x) as usize] as u32
        };

        let mut pixels = Vec::with_capacity(image.pixels.len());
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        sum += at(x + dx, y + dy);
                    }
                }
                pixels.push((sum / 9) as u8);
            }
        }
        RasterImage {
            width: image.width,
            height: image.height,
            pixels,
        }
    }
}

impl Blur for BoxBlur {
    fn apply_blur(&self, image: &RasterImage, intensity: u32) -> RasterImage {
        if image.pixels.is_empty() {
            return image.clone();
        }
        let mut current = image.clone();
        for _ in 0..intensity {
            current = Self::pass(&current);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RasterImage {
        let pixels = (0..w * h)
            .map(|i| if (i % w + i / w) % 2 == 0 { 255 } else { 0 })
            .collect();
        RasterImage::new(w, h, pixels).unwrap()
    }

    #[test]
    fn codec_round_trips_pixels() {
        let image = checker(4, 3);
        let bytes = RawCodec.encode(&image, ImageFormat::Jpeg).unwrap();
        assert_eq!(bytes[3], b'J');
        assert_eq!(RawCodec.decode(&bytes).unwrap(), image);
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut bytes = RawCodec.encode(&checker(4, 4), ImageFormat::Png).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(RawCodec.decode(&bytes), Err(CodecError::Malformed(_))));
        assert!(matches!(RawCodec.decode(b"nope"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn blur_smooths_contrast() {
        let image = checker(6, 6);
        let blurred = BoxBlur.apply_blur(&image, 2);

        let spread = |img: &RasterImage| {
            let max = *img.pixels.iter().max().unwrap();
            let min = *img.pixels.iter().min().unwrap();
            max - min
        };
        assert_eq!(blurred.width, 6);
        assert!(spread(&blurred) < spread(&image));
    }

    #[test]
    fn uniform_image_is_unchanged() {
        let image = RasterImage::new(3, 3, vec![80; 9]).unwrap();
        assert_eq!(BoxBlur.apply_blur(&image, 3), image);
    }
}
