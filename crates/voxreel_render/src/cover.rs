use crate::backdrop::{circular_avatar, paste_masked, save_jpeg};
use crate::error::Result;
use crate::text::{fill_rect, TextPainter};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::path::Path;
use voxreel_core::report::Reporter;
use voxreel_core::settings::CanvasSize;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
/// Layout constants are authored for a 540 px wide cover and scaled.
const REFERENCE_WIDTH: f32 = 540.0;
const BLUR_SIGMA: f32 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct CoverContent<'a> {
    pub title: &'a str,
    pub subtitle: &'a str,
    pub author: &'a str,
    pub avatar: &'a Path,
}

/// Render the portrait cover: a black content band with title, subtitle,
/// separator line, avatar and author row, framed top and bottom by a
/// blurred, stretched copy of itself.
pub fn render_cover(
    painter: &TextPainter,
    content: &CoverContent<'_>,
    size: CanvasSize,
    output: &Path,
    reporter: &dyn Reporter,
) -> Result<()> {
    let border = (size.height as f32 * 0.2) as u32;
    let content_w = size.width;
    let content_h = size.height.saturating_sub(2 * border).max(1);
    let scale = size.width as f32 / REFERENCE_WIDTH;
    let px = |v: f32| (v * scale) as i32;

    let mut band = RgbImage::new(content_w, content_h);

    let title_size = (80.0 * scale).floor();
    let small_size = (40.0 * scale).floor();

    let title = painter.measure(content.title, title_size);
    let title_x = (content_w as i32 - title.width as i32) / 2;
    let title_y = (size.height as f32 * 0.3) as i32 - border as i32;
    painter.draw(&mut band, title_x, title_y, content.title, title_size, WHITE);

    let subtitle = painter.measure(content.subtitle, small_size);
    let subtitle_x = (content_w as i32 - subtitle.width as i32) / 2;
    let subtitle_y = title_y + title.height as i32 + px(25.0);
    painter.draw(
        &mut band,
        subtitle_x,
        subtitle_y,
        content.subtitle,
        small_size,
        WHITE,
    );

    let line_y = subtitle_y + subtitle.height as i32 + px(25.0);
    let line_w = (content_w as f32 * 0.6) as u32;
    let thickness = px(2.0).max(1) as u32;
    fill_rect(
        &mut band,
        (content_w - line_w) as i32 / 2,
        line_y,
        line_w,
        thickness,
        WHITE,
    );

    let avatar_size = px(130.0).max(1) as u32;
    let (avatar_top, avatar_extent) = match circular_avatar(content.avatar, avatar_size) {
        Ok(avatar) => {
            let x = content_w as i32 - avatar_size as i32 - px(60.0);
            let y = line_y + px(20.0);
            paste_masked(&mut band, &avatar, i64::from(x), i64::from(y));
            (y, avatar_size as i32)
        }
        Err(e) => {
            reporter.warn(&format!(
                "could not load avatar {}: {e}; drawing cover without it",
                content.avatar.display()
            ));
            (0, 0)
        }
    };

    let author = painter.measure(content.author, small_size);
    let author_y = avatar_top + avatar_extent / 2 - author.height as i32 / 2;
    painter.draw(
        &mut band,
        px(100.0),
        author_y,
        content.author,
        small_size,
        WHITE,
    );

    let mut cover = blurred_backdrop(&band, size);
    imageops::replace(&mut cover, &band, 0, i64::from(border));

    save_jpeg(&cover, output)
}

/// Stretch the content band over the whole cover and blur it. The blur runs
/// at quarter resolution.
fn blurred_backdrop(band: &RgbImage, size: CanvasSize) -> RgbImage {
    let small_w = (size.width / 4).max(1);
    let small_h = (size.height / 4).max(1);
    let small = imageops::resize(band, small_w, small_h, FilterType::Triangle);
    let blurred = imageops::blur(&small, BLUR_SIGMA / 4.0);
    imageops::resize(&blurred, size.width, size.height, FilterType::Triangle)
}
