use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;

/// Image handed to the detector, together with the size of the frame it
/// came from. Outward coordinates are always expressed in original pixels.
#[derive(Debug, Clone)]
pub struct Downscaled {
    pub image: RgbImage,
    pub original_width: u32,
    pub original_height: u32,
}

/// エンコード済み画像 (JPEG/PNG/WebP) を RGB にデコード
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("failed to decode frame")?;
    Ok(image.to_rgb8())
}

/// 短辺が `target` を超える場合のみ縦横同比率で縮小する
///
/// `target == 0` disables downscaling.
pub fn downscale_short_side(image: RgbImage, target: u32) -> Downscaled {
    let (width, height) = image.dimensions();
    let short = width.min(height);

    if target == 0 || short <= target {
        return Downscaled {
            image,
            original_width: width,
            original_height: height,
        };
    }

    let scale = target as f32 / short as f32;
    let (new_w, new_h) = if width <= height {
        (target, ((height as f32 * scale).round() as u32).max(target))
    } else {
        (((width as f32 * scale).round() as u32).max(target), target)
    };
    let resized = image::imageops::resize(&image, new_w, new_h, FilterType::Lanczos3);

    Downscaled {
        image: resized,
        original_width: width,
        original_height: height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(image: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_small_image_unchanged() {
        let image = RgbImage::from_pixel(320, 240, Rgb([10, 20, 30]));
        let out = downscale_short_side(image.clone(), 480);
        assert_eq!(out.image.dimensions(), (320, 240));
        assert_eq!(out.image, image);
    }

    #[test]
    fn test_exact_fit_unchanged() {
        let image = RgbImage::new(640, 480);
        let out = downscale_short_side(image, 480);
        assert_eq!(out.image.dimensions(), (640, 480));
    }

    #[test]
    fn test_landscape_downscale_keeps_original() {
        let image = RgbImage::new(1280, 720);
        let out = downscale_short_side(image, 480);
        assert_eq!(out.image.dimensions(), (853, 480));
        assert_eq!(out.original_width, 1280);
        assert_eq!(out.original_height, 720);
    }

    #[test]
    fn test_portrait_downscale() {
        let image = RgbImage::new(720, 1280);
        let out = downscale_short_side(image, 360);
        assert_eq!(out.image.dimensions(), (360, 640));
        assert_eq!((out.original_width, out.original_height), (720, 1280));
    }

    #[test]
    fn test_zero_target_disables() {
        let image = RgbImage::new(1920, 1080);
        let out = downscale_short_side(image, 0);
        assert_eq!(out.image.dimensions(), (1920, 1080));
    }

    #[test]
    fn test_decode_png() {
        let image = RgbImage::from_pixel(4, 3, Rgb([200, 100, 50]));
        let decoded = decode_frame(&encode_png(&image)).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_frame(b"not an image").is_err());
    }
}
