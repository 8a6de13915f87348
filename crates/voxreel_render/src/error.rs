use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage names used for error attribution and progress messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Background,
    Cover,
    Subtitles,
    Encode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Background => "background",
            Stage::Cover => "cover",
            Stage::Subtitles => "subtitles",
            Stage::Encode => "encode",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{what} not found: {}", path.display())]
    MissingAsset { what: &'static str, path: PathBuf },

    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("ffmpeg exited with code {code:?}: {stderr}")]
    EncoderFailed { code: Option<i32>, stderr: String },

    #[error("ffmpeg not found")]
    EncoderNotFound,

    #[error("failed to execute ffprobe: {0}")]
    FfprobeExec(String),

    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("font error: {0}")]
    Font(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Core(#[from] voxreel_core::error::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    pub fn stage(stage: Stage, err: impl fmt::Display) -> Self {
        RenderError::Stage {
            stage,
            message: err.to_string(),
        }
    }

    /// The pipeline stage this error is attributed to, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            RenderError::MissingAsset { .. } => Some(Stage::Validate),
            RenderError::Stage { stage, .. } => Some(*stage),
            RenderError::EncoderFailed { .. } | RenderError::EncoderNotFound => {
                Some(Stage::Encode)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
