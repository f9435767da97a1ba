//! Error banner drawn over screenshot artifacts.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const BORDER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BANNER_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const BORDER_THICKNESS: u32 = 6;
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
/// 1 column gap between glyphs
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
const BANNER_PADDING: u32 = 4;

/// 5x7 ビットマップフォント (MSB が左端)
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        // 未対応文字は枠
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

/// Width in pixels of `text` drawn at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * GLYPH_ADVANCE - 1) * scale
}

/// ビットマップフォントで文字列を描画 (左上基準、大文字化)
pub fn draw_text(image: &mut RgbImage, text: &str, x: i32, y: i32, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1) as i32;
    let (w, h) = (image.width() as i32, image.height() as i32);

    for (i, ch) in text.to_uppercase().chars().enumerate() {
        let origin_x = x + i as i32 * GLYPH_ADVANCE as i32 * scale;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH as i32 {
                if (bits >> (GLYPH_WIDTH as i32 - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as i32 * scale + dy;
                        if px >= 0 && py >= 0 && px < w && py < h {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

/// 赤枠 + 上部バナー (メッセージ) を描画
pub fn annotate_error(image: &mut RgbImage, message: &str) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    for i in 0..BORDER_THICKNESS.min(w / 2).min(h / 2) {
        let rect = Rect::at(i as i32, i as i32).of_size(w - 2 * i, h - 2 * i);
        draw_hollow_rect_mut(image, rect, BORDER_COLOR);
    }

    // shrink the text until it fits
    let mut scale = 3;
    while scale > 1 && text_width(message, scale) + 2 * BANNER_PADDING > w {
        scale -= 1;
    }
    let banner_height = (GLYPH_HEIGHT * scale + 2 * BANNER_PADDING).min(h);
    let inset = BORDER_THICKNESS.min(w / 2).min(h / 2);
    if w > 2 * inset && banner_height > 0 {
        let rect = Rect::at(inset as i32, inset as i32).of_size(w - 2 * inset, banner_height);
        draw_filled_rect_mut(image, rect, BANNER_COLOR);
    }
    let text_x = (inset + BANNER_PADDING) as i32;
    let text_y = (inset + BANNER_PADDING) as i32;
    draw_text(image, message, text_x, text_y, scale, TEXT_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_width() {
        assert_eq!(text_width("", 2), 0);
        assert_eq!(text_width("A", 1), 5);
        assert_eq!(text_width("AB", 2), 22);
    }

    #[test]
    fn test_draw_text_sets_glyph_pixels() {
        let mut image = RgbImage::new(20, 10);
        draw_text(&mut image, "l", 0, 0, 1, TEXT_COLOR);
        // 'L' is a left column plus a bottom row
        assert_eq!(image.get_pixel(0, 0), &TEXT_COLOR);
        assert_eq!(image.get_pixel(4, 6), &TEXT_COLOR);
        assert_eq!(image.get_pixel(4, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_error_draws_border_and_banner() {
        let mut image = RgbImage::from_pixel(320, 240, Rgb([10, 200, 10]));
        annotate_error(&mut image, "LEFT ELBOW 20.5 DEG");
        assert_eq!(image.get_pixel(0, 0), &BORDER_COLOR);
        assert_eq!(image.get_pixel(319, 239), &BORDER_COLOR);
        assert_eq!(image.get_pixel(160, 239 - 3), &BORDER_COLOR);
        // untouched center
        assert_eq!(image.get_pixel(160, 200), &Rgb([10, 200, 10]));
        // banner somewhere under the text at the far right of the banner
        assert_eq!(image.get_pixel(310, 8), &BANNER_COLOR);
    }

    #[test]
    fn test_annotate_tiny_image_does_not_panic() {
        let mut image = RgbImage::new(3, 2);
        annotate_error(&mut image, "RIGHT KNEE 30.0 DEG");
        let mut empty = RgbImage::new(0, 0);
        annotate_error(&mut empty, "X");
    }
}
