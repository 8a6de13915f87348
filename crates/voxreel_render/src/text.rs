use crate::error::{RenderError, Result};
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};
use std::path::Path;

/// Pixel extent of a laid-out string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextSize {
    pub width: u32,
    pub height: u32,
}

/// Draws single-line text from one TrueType/OpenType font onto RGB canvases.
pub struct TextPainter {
    font: Font,
    family: String,
}

impl TextPainter {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(RenderError::MissingAsset {
                what: "font",
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_bytes(bytes, &fallback)
    }

    pub fn from_bytes(bytes: Vec<u8>, fallback_name: &str) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| RenderError::Font(e.to_string()))?;
        let family = font
            .name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string());
        Ok(Self { font, family })
    }

    /// Family name as embedded in the font, or the file stem.
    pub fn family_name(&self) -> &str {
        &self.family
    }

    fn layout(&self, x: f32, y: f32, text: &str, size: f32) -> Layout {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x,
            y,
            ..LayoutSettings::default()
        });
        layout.append(&[&self.font], &TextStyle::new(text, size, 0));
        layout
    }

    pub fn measure(&self, text: &str, size: f32) -> TextSize {
        let layout = self.layout(0.0, 0.0, text, size);
        let width = layout
            .glyphs()
            .iter()
            .map(|g| g.x + g.width as f32)
            .fold(0.0f32, f32::max);
        TextSize {
            width: width.ceil().max(0.0) as u32,
            height: layout.height().ceil().max(0.0) as u32,
        }
    }

    /// Draw `text` with its top-left corner at (`x`, `y`). Glyphs outside
    /// the canvas are clipped.
    pub fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, size: f32, color: Rgb<u8>) {
        let layout = self.layout(x as f32, y as f32, text, size);
        let (cw, ch) = canvas.dimensions();

        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let (_, coverage) = self.font.rasterize_config(glyph.key);
            let gx = glyph.x.round() as i32;
            let gy = glyph.y.round() as i32;

            for row in 0..glyph.height {
                let py = gy + row as i32;
                if py < 0 || py >= ch as i32 {
                    continue;
                }
                for col in 0..glyph.width {
                    let px = gx + col as i32;
                    if px < 0 || px >= cw as i32 {
                        continue;
                    }
                    let mask = coverage[row * glyph.width + col];
                    if mask == 0 {
                        continue;
                    }
                    blend(canvas.get_pixel_mut(px as u32, py as u32), color, mask);
                }
            }
        }
    }
}

fn blend(dst: &mut Rgb<u8>, src: Rgb<u8>, alpha: u8) {
    let a = u16::from(alpha);
    let inv = 255 - a;
    for c in 0..3 {
        dst.0[c] = ((u16::from(src.0[c]) * a + u16::from(dst.0[c]) * inv + 127) / 255) as u8;
    }
}

/// Fill an axis-aligned rectangle, clipped to the canvas.
pub fn fill_rect(canvas: &mut RgbImage, x: i32, y: i32, w: u32, h: u32, color: Rgb<u8>) {
    let (cw, ch) = canvas.dimensions();
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = (x + w as i32).clamp(0, cw as i32) as u32;
    let y1 = (y + h as i32).clamp(0, ch as i32) as u32;
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.put_pixel(px, py, color);
        }
    }
}
