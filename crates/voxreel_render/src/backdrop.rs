use crate::error::{RenderError, Result};
use crate::text::TextPainter;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use std::io::{BufWriter, Write};
use std::path::Path;
use voxreel_core::report::Reporter;
use voxreel_core::settings::CanvasSize;

pub const JPEG_QUALITY: u8 = 95;

const AVATAR_SIZE: u32 = 200;
const AVATAR_TOP: i64 = 150;
const FONT_SIZE: f32 = 36.0;
const CORNER_MARGIN: i64 = 50;
const CORNER_TOP: i32 = 100;
const AUTHOR_FROM_BOTTOM: i32 = 150;
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Text and imagery drawn on the still video background.
#[derive(Debug, Clone, Copy)]
pub struct BackdropContent<'a> {
    pub avatar: &'a Path,
    pub corner_text: &'a str,
    pub author: &'a str,
}

/// Render the still frame the video is built on: black canvas, round
/// avatar at the top, corner text at the top right and the author name
/// centered near the bottom.
///
/// An unreadable avatar only produces a warning; the frame is drawn without it.
pub fn render_background(
    painter: &TextPainter,
    content: &BackdropContent<'_>,
    size: CanvasSize,
    output: &Path,
    reporter: &dyn Reporter,
) -> Result<()> {
    let mut canvas = RgbImage::new(size.width, size.height);

    match circular_avatar(content.avatar, AVATAR_SIZE) {
        Ok(avatar) => {
            let x = (i64::from(size.width) - i64::from(AVATAR_SIZE)) / 2;
            paste_masked(&mut canvas, &avatar, x, AVATAR_TOP);
        }
        Err(e) => reporter.warn(&format!(
            "could not load avatar {}: {e}; drawing background without it",
            content.avatar.display()
        )),
    }

    let corner = painter.measure(content.corner_text, FONT_SIZE);
    let corner_x = i64::from(size.width) - i64::from(corner.width) - CORNER_MARGIN;
    painter.draw(
        &mut canvas,
        corner_x as i32,
        CORNER_TOP,
        content.corner_text,
        FONT_SIZE,
        WHITE,
    );

    let author = painter.measure(content.author, FONT_SIZE);
    let author_x = (i64::from(size.width) - i64::from(author.width)) / 2;
    painter.draw(
        &mut canvas,
        author_x as i32,
        size.height as i32 - AUTHOR_FROM_BOTTOM,
        content.author,
        FONT_SIZE,
        WHITE,
    );

    save_jpeg(&canvas, output)
}

/// Load an image and resize it to a `size`×`size` square with a circular
/// alpha mask.
pub(crate) fn circular_avatar(path: &Path, size: u32) -> Result<RgbaImage> {
    if !path.is_file() {
        return Err(RenderError::MissingAsset {
            what: "avatar",
            path: path.to_path_buf(),
        });
    }
    let source = image::open(path)?.to_rgba8();
    let mut avatar = imageops::resize(&source, size, size, FilterType::Lanczos3);

    let radius = size as f32 / 2.0;
    for (x, y, pixel) in avatar.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        if dx * dx + dy * dy > radius * radius {
            pixel.0[3] = 0;
        } else {
            pixel.0[3] = 255;
        }
    }
    Ok(avatar)
}

/// Paste an RGBA image at (`x`, `y`), using its alpha channel as the mask.
pub(crate) fn paste_masked(canvas: &mut RgbImage, overlay: &RgbaImage, x: i64, y: i64) {
    let (cw, ch) = canvas.dimensions();
    for (ox, oy, src) in overlay.enumerate_pixels() {
        let px = x + i64::from(ox);
        let py = y + i64::from(oy);
        if px < 0 || py < 0 || px >= i64::from(cw) || py >= i64::from(ch) {
            continue;
        }
        let alpha = u16::from(src.0[3]);
        if alpha == 0 {
            continue;
        }
        let dst = canvas.get_pixel_mut(px as u32, py as u32);
        for c in 0..3 {
            dst.0[c] =
                ((u16::from(src.0[c]) * alpha + u16::from(dst.0[c]) * (255 - alpha) + 127) / 255)
                    as u8;
        }
    }
}

/// Write an RGB image as a JPEG, creating the parent directory if needed.
pub(crate) fn save_jpeg(image: &RgbImage, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(image)?;
    writer.flush()?;
    Ok(())
}
