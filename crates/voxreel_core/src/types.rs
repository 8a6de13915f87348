use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

// ---------------------------------------------------------------------------
// TimeMs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000.0).round() as i64)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    /// Format as an SRT timestamp, `HH:MM:SS,mmm`. Negative values clamp to zero.
    pub fn to_srt(&self) -> String {
        let total_ms = self.0.max(0) as u64;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3_600;
        format!("{hours:02}:{mins:02}:{secs:02},{ms:03}")
    }
}

impl Add for TimeMs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeMs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for TimeMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0.unsigned_abs();
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let mins = (total_secs / 60) % 60;
        let hours = total_secs / 3_600;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// Caption data
// ---------------------------------------------------------------------------

/// One timed caption block as delivered by the upstream speech synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimedBlock {
    pub text: String,
    pub start: TimeMs,
    pub end: TimeMs,
}

impl TimedBlock {
    pub fn new(text: impl Into<String>, start: TimeMs, end: TimeMs) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// Concatenated caption text with one timestamp per character.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub chars: Vec<char>,
    pub timestamps: Vec<TimeMs>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }
}

/// A resegmented caption ready to be written out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetimedEntry {
    pub index: usize,
    pub start: TimeMs,
    pub end: TimeMs,
    pub text: String,
}

impl RetimedEntry {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split('\n')
    }
}

// ---------------------------------------------------------------------------
// SubtitleLayout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubtitleLayout {
    pub max_chars_per_line: usize,
    pub max_lines_per_block: usize,
}

impl SubtitleLayout {
    pub fn new(max_chars_per_line: usize, max_lines_per_block: usize) -> Result<Self> {
        let layout = Self {
            max_chars_per_line,
            max_lines_per_block,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_chars_per_line == 0 {
            return Err(CoreError::InvalidLayout(
                "max_chars_per_line must be at least 1".into(),
            ));
        }
        if self.max_lines_per_block == 0 {
            return Err(CoreError::InvalidLayout(
                "max_lines_per_block must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SubtitleLayout {
    fn default() -> Self {
        Self {
            max_chars_per_line: 12,
            max_lines_per_block: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// CompositionParams
// ---------------------------------------------------------------------------

/// Everything the composition pipeline needs for one video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionParams {
    pub avatar: PathBuf,
    pub font: PathBuf,
    pub author: String,
    pub corner_text: String,
    #[serde(default)]
    pub cover_title: Option<String>,
    #[serde(default)]
    pub cover_subtitle: Option<String>,
    pub audio: PathBuf,
    pub subtitles: PathBuf,
    #[serde(default)]
    pub background_music: Option<PathBuf>,
    #[serde(default)]
    pub use_hw_accel: bool,
    pub output: PathBuf,
}

impl CompositionParams {
    /// Load params from a JSON job file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Cover title, treating a blank title as absent.
    pub fn cover_title(&self) -> Option<&str> {
        self.cover_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Where the cover image lands: `cover_<video stem>.jpg` next to the video.
    pub fn cover_output_path(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let name = format!("cover_{stem}.jpg");
        match self.output.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
