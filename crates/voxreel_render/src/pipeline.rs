use crate::backdrop::{self, BackdropContent};
use crate::cover::{self, CoverContent};
use crate::encoder::{self, EncoderJob};
use crate::error::{RenderError, Result, Stage};
use crate::probe;
use crate::text::TextPainter;
use std::fs::File;
use std::path::{Path, PathBuf};
use voxreel_core::report::{CancelFlag, Reporter};
use voxreel_core::resegment::process_subtitle_file;
use voxreel_core::settings::PipelineSettings;
use voxreel_core::types::CompositionParams;

const BACKGROUND_FILE: &str = "background.jpg";
const SUBTITLES_FILE: &str = "subtitles_processed.srt";

/// Files produced by a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub video: PathBuf,
    pub cover: Option<PathBuf>,
    pub captions: usize,
}

/// Compose one video: background still, optional cover, resegmented
/// subtitles, then the encode.
///
/// Intermediates live in a scratch directory (under `scratch_root` when
/// given) that is removed on every exit path. The output directory is only
/// touched after the encoder succeeds, and the video and cover appear there
/// complete or not at all.
pub fn run(
    params: &CompositionParams,
    settings: &PipelineSettings,
    scratch_root: Option<&Path>,
    reporter: &dyn Reporter,
    cancel: &CancelFlag,
) -> Result<PipelineOutput> {
    validate_assets(params)?;
    checkpoint(cancel)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix("voxreel-");
    let scratch = match scratch_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    tracing::debug!(scratch = %scratch.path().display(), "created scratch directory");

    // Stage 1: background
    reporter.report("rendering background");
    let painter =
        TextPainter::from_file(&params.font).map_err(|e| RenderError::stage(Stage::Background, e))?;
    let background = scratch.path().join(BACKGROUND_FILE);
    let content = BackdropContent {
        avatar: &params.avatar,
        corner_text: &params.corner_text,
        author: &params.author,
    };
    backdrop::render_background(&painter, &content, settings.background, &background, reporter)
        .map_err(|e| RenderError::stage(Stage::Background, e))?;
    checkpoint(cancel)?;

    // Stage 2: cover
    let staged_cover = match params.cover_title() {
        Some(title) => {
            reporter.report("rendering cover");
            let staged = scratch.path().join(file_name(&params.cover_output_path()));
            let content = CoverContent {
                title,
                subtitle: params.cover_subtitle.as_deref().unwrap_or_default(),
                author: &params.author,
                avatar: &params.avatar,
            };
            match cover::render_cover(&painter, &content, settings.cover, &staged, reporter)
                .map_err(|e| RenderError::stage(Stage::Cover, e))
            {
                Ok(()) => Some(staged),
                Err(e) => {
                    reporter.warn(&format!("cover rendering failed, continuing: {e}"));
                    None
                }
            }
        }
        None => {
            reporter.report("no cover title, skipping cover");
            None
        }
    };
    checkpoint(cancel)?;

    // Stage 3: subtitles
    reporter.report("resegmenting subtitles");
    let subtitles = scratch.path().join(SUBTITLES_FILE);
    let captions = process_subtitle_file(&params.subtitles, &subtitles, &settings.subtitles, reporter)
        .map_err(|e| RenderError::stage(Stage::Subtitles, e))?;
    checkpoint(cancel)?;

    // Stage 4: encode
    let total = match probe::probe_duration(&settings.ffprobe, &params.audio) {
        Ok(total) => Some(total),
        Err(e) => {
            tracing::debug!("duration probe failed, progress will be time-based: {e}");
            None
        }
    };
    let staged_video = scratch.path().join(file_name(&params.output));
    let job = EncoderJob {
        background_image: background,
        audio: params.audio.clone(),
        subtitles,
        font: params.font.clone(),
        font_name: painter.family_name().to_string(),
        background_music: params.background_music.clone(),
        use_hw_accel: params.use_hw_accel,
        output: staged_video.clone(),
    };
    if job.background_music.is_some() && !job.music_available() {
        reporter.warn("background music file not found, using narration audio only");
    }
    let command = encoder::build_command(&job, job.music_available());
    reporter.report(if params.use_hw_accel {
        "encoding video (hardware)"
    } else {
        "encoding video"
    });
    encoder::execute(&command, &settings.ffmpeg, total, reporter, cancel)?;

    checkpoint(cancel)?;
    publish(&staged_video, &params.output).map_err(|e| RenderError::stage(Stage::Encode, e))?;
    let cover = match staged_cover {
        Some(staged) => {
            let target = params.cover_output_path();
            match publish(&staged, &target) {
                Ok(()) => Some(target),
                Err(e) => {
                    reporter.warn(&format!("could not write cover: {e}"));
                    None
                }
            }
        }
        None => None,
    };

    reporter.report(&format!("video written to {}", params.output.display()));
    Ok(PipelineOutput {
        video: params.output.clone(),
        cover,
        captions,
    })
}

/// Every input file must exist before anything is written.
pub fn validate_assets(params: &CompositionParams) -> Result<()> {
    let required: [(&'static str, &Path); 4] = [
        ("avatar", params.avatar.as_path()),
        ("font", params.font.as_path()),
        ("audio file", params.audio.as_path()),
        ("subtitle file", params.subtitles.as_path()),
    ];
    for (what, path) in required {
        if !path.exists() {
            return Err(RenderError::MissingAsset {
                what,
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn checkpoint(cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }
    Ok(())
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output.mp4"))
}

/// Move a finished file into place. Across filesystems the copy goes to a
/// temporary file beside `to` first, so `to` only ever holds a complete file.
fn publish(from: &Path, to: &Path) -> std::io::Result<()> {
    let dir = match to.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    let mut source = File::open(from)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".voxreel-")
        .suffix(".part")
        .tempfile_in(dir)?;
    std::io::copy(&mut source, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(to).map_err(|e| e.error)?;
    tracing::debug!(to = %to.display(), "published by copy");
    Ok(())
}
