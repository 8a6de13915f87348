use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("subtitle file not found: {0}")]
    MissingAsset(PathBuf),

    #[error("SRT parse error at line {line}: {reason}")]
    SrtParse { line: usize, reason: String },

    #[error("invalid subtitle layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
