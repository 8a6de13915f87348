use crate::error::Result;
use crate::types::SubtitleLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pixel dimensions of a rendered still.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

/// Tunables for the composition pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub subtitles: SubtitleLayout,
    pub background: CanvasSize,
    pub cover: CanvasSize,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            subtitles: SubtitleLayout::default(),
            background: preset_landscape_1080p(),
            cover: preset_cover_portrait(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl PipelineSettings {
    /// Save settings as pretty-printed JSON.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load settings from a JSON file; missing keys take their defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let settings: PipelineSettings = serde_json::from_str(&data)?;
        settings.subtitles.validate()?;
        Ok(settings)
    }
}

/// 1920x1080 video background.
pub fn preset_landscape_1080p() -> CanvasSize {
    CanvasSize {
        width: 1920,
        height: 1080,
    }
}

/// 900x1200 portrait cover.
pub fn preset_cover_portrait() -> CanvasSize {
    CanvasSize {
        width: 900,
        height: 1200,
    }
}
