use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::VisionError;

pub const JPEG_QUALITY: u8 = 80;

/// Image ready to be embedded in a data URL.
#[derive(Debug)]
pub struct PreparedImage {
    pub base64: String,
    pub width: u32,
    pub height: u32,
}

impl PreparedImage {
    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.base64)
    }
}

/// Decode, downscale to `max_dimension`, re-encode as JPEG and
/// base64-encode. Intended to run on a blocking worker; decode and
/// resize are CPU-bound.
pub fn prepare(bytes: &[u8], max_dimension: u32) -> Result<PreparedImage, VisionError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| VisionError::ImageProcessingFailed(format!("decode: {e}")))?;
    let img = downscale(img, max_dimension);

    // JPEG has no alpha channel, so flatten before encoding.
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width(), rgb.height());

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| VisionError::ImageProcessingFailed(format!("encode: {e}")))?;
    if jpeg.is_empty() {
        return Err(VisionError::ImageProcessingFailed(
            "encoder produced no data".into(),
        ));
    }

    Ok(PreparedImage {
        base64: BASE64.encode(&jpeg),
        width,
        height,
    })
}

/// No-op when both sides already fit; otherwise shrink so the longer
/// side equals `max`, preserving aspect ratio.
pub fn downscale(img: DynamicImage, max: u32) -> DynamicImage {
    if img.width() <= max && img.height() <= max {
        return img;
    }
    img.resize(max, max, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn small_image_keeps_its_dimensions() {
        let prepared = prepare(&png_bytes(800, 600), 1024).unwrap();
        assert_eq!((prepared.width, prepared.height), (800, 600));
    }

    #[test]
    fn wide_image_is_capped_at_max_dimension() {
        let prepared = prepare(&png_bytes(2048, 1024), 1024).unwrap();
        assert_eq!((prepared.width, prepared.height), (1024, 512));
    }

    #[test]
    fn tall_image_preserves_aspect_ratio() {
        let prepared = prepare(&png_bytes(1500, 3000), 1024).unwrap();
        assert_eq!(prepared.height, 1024);
        assert_eq!(prepared.width, 512);
    }

    #[test]
    fn downscale_is_noop_under_threshold() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1024, 1024));
        let out = downscale(img, 1024);
        assert_eq!((out.width(), out.height()), (1024, 1024));
    }

    #[test]
    fn prepare_yields_decodable_jpeg() {
        let prepared = prepare(&png_bytes(64, 48), 1024).unwrap();
        let jpeg = BASE64.decode(prepared.base64).unwrap();
        let round = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((round.width(), round.height()), (64, 48));
    }

    #[test]
    fn garbage_bytes_fail_with_image_error() {
        let err = prepare(b"not an image", 1024).unwrap_err();
        assert!(matches!(err, VisionError::ImageProcessingFailed(_)));
    }

    #[test]
    fn data_url_has_jpeg_prefix() {
        let prepared = prepare(&png_bytes(8, 8), 1024).unwrap();
        assert!(prepared.data_url().starts_with("data:image/jpeg;base64,"));
    }
}
