use serde::Deserialize;
use std::path::Path;
use voxreel_core::types::TimeMs;

use crate::error::{RenderError, Result};

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Ask ffprobe for the playing time of an audio file.
pub fn probe_duration(ffprobe: &str, path: impl AsRef<Path>) -> Result<TimeMs> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RenderError::MissingAsset {
            what: "audio file",
            path: path.to_path_buf(),
        });
    }

    let output = std::process::Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| RenderError::FfprobeExec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::FfprobeFailed(stderr.into_owned()));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    parse_duration(&probe)
        .ok_or_else(|| RenderError::FfprobeFailed("no duration reported".to_string()))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Container duration, falling back to the first audio stream's duration.
fn parse_duration(probe: &FfprobeOutput) -> Option<TimeMs> {
    let stream_duration = || {
        probe
            .streams
            .iter()
            .filter(|s| s.codec_type == "audio")
            .find_map(|s| s.duration.as_deref())
    };

    probe
        .format
        .duration
        .as_deref()
        .or_else(stream_duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(TimeMs::from_seconds)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
