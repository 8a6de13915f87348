use crate::error::{RenderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use voxreel_core::report::{CancelFlag, Reporter};
use voxreel_core::types::TimeMs;

/// Background music gain relative to the narration.
pub const MUSIC_VOLUME: f32 = 0.15;

const SUBTITLE_STYLE: &str =
    "FontSize=42,Alignment=2,MarginV=80,PrimaryColour=&HFFFFFF,Bold=1,Shadow=0.8";
const STDERR_TAIL_LINES: usize = 40;
const WAIT_TICK: Duration = Duration::from_millis(100);

/// Inputs for one encode, with paths already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderJob {
    pub background_image: PathBuf,
    pub audio: PathBuf,
    pub subtitles: PathBuf,
    pub font: PathBuf,
    pub font_name: String,
    pub background_music: Option<PathBuf>,
    pub use_hw_accel: bool,
    pub output: PathBuf,
}

impl EncoderJob {
    /// Whether the music input is supplied and present on disk.
    pub fn music_available(&self) -> bool {
        self.background_music.as_deref().is_some_and(Path::is_file)
    }
}

/// A compiled ffmpeg invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderCommand {
    pub inputs: Vec<EncoderInput>,
    pub filter_graph: String,
    pub maps: Vec<String>,
    pub output_args: Vec<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderInput {
    /// Options placed before this input's `-i`.
    pub options: Vec<String>,
    pub path: PathBuf,
}

/// Progress update parsed from ffmpeg's stderr.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodeProgress {
    pub percent: f64,
    pub frame: u64,
    pub fps: f64,
    pub time_secs: f64,
    pub speed: String,
    pub eta_seconds: Option<f64>,
}

/// Compile an encode job into an ffmpeg command. `bgm_available` comes from
/// [`EncoderJob::music_available`] so no file is touched here; relative font
/// and subtitle paths are resolved against the working directory, since
/// libass sees the filter arguments verbatim.
pub fn build_command(job: &EncoderJob, bgm_available: bool) -> EncoderCommand {
    let mut inputs = vec![
        EncoderInput {
            options: vec!["-loop".into(), "1".into()],
            path: job.background_image.clone(),
        },
        EncoderInput {
            options: vec![],
            path: job.audio.clone(),
        },
    ];

    let font = absolute(&job.font);
    let font_dir = font.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut filters = vec![format!(
        "[0:v]{}[v]",
        subtitle_filter(&absolute(&job.subtitles), &font_dir, &job.font_name)
    )];
    let mut maps = vec!["-map".to_string(), "[v]".to_string()];

    match job.background_music.as_ref().filter(|_| bgm_available) {
        Some(music) => {
            inputs.push(EncoderInput {
                options: vec!["-stream_loop".into(), "-1".into()],
                path: music.clone(),
            });
            filters.push(format!(
                "[2:a]volume={MUSIC_VOLUME}[bgm];[1:a][bgm]amix=inputs=2:duration=first[a]"
            ));
            maps.extend(["-map".to_string(), "[a]".to_string()]);
        }
        None => maps.extend(["-map".to_string(), "1:a".to_string()]),
    }

    let mut output_args: Vec<String> = if job.use_hw_accel {
        ["-c:v", "h264_nvenc", "-preset", "fast", "-cq", "24"]
    } else {
        ["-c:v", "libx264", "-preset", "fast", "-crf", "18"]
    }
    .iter()
    .map(|s| s.to_string())
    .collect();
    output_args.extend(
        [
            "-c:a", "aac", "-b:a", "192k", "-shortest", "-pix_fmt", "yuv420p",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    EncoderCommand {
        inputs,
        filter_graph: filters.join(";"),
        maps,
        output_args,
        output_path: job.output.clone(),
    }
}

impl EncoderCommand {
    /// Full ffmpeg argument list, without the program name.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string()];

        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.push("-filter_complex".to_string());
        args.push(self.filter_graph.clone());
        args.extend(self.maps.iter().cloned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output_path.to_string_lossy().to_string());

        args
    }
}

/// The burn-in stage: `subtitles` filter with a fixed bottom-center style.
pub fn subtitle_filter(subtitles: &Path, font_dir: &Path, font_name: &str) -> String {
    format!(
        "subtitles='{}':fontsdir='{}':force_style='FontName={},{SUBTITLE_STYLE}'",
        escape_filter_path(subtitles),
        escape_filter_path(font_dir),
        font_name.replace(['\'', ',', ':'], " "),
    )
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Escape a path for use inside a quoted filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    escape_filter_path_for(&path.to_string_lossy(), cfg!(windows))
}

fn escape_filter_path_for(raw: &str, windows: bool) -> String {
    let normalized = if windows {
        raw.replace('\\', "/")
    } else {
        raw.to_string()
    };
    let mut escaped = String::with_capacity(normalized.len() + 8);
    for ch in normalized.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ':' => escaped.push_str("\\:"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Run a compiled command with the given ffmpeg binary.
pub fn execute(
    cmd: &EncoderCommand,
    ffmpeg: &str,
    total: Option<TimeMs>,
    reporter: &dyn Reporter,
    cancel: &CancelFlag,
) -> Result<()> {
    let args = cmd.to_args();
    tracing::debug!(ffmpeg, ?args, "starting encoder");
    run_encoder(ffmpeg, &args, total, reporter, cancel)
}

/// Spawn the encoder, forward progress and wait for it to exit.
///
/// stderr is read on a helper thread; progress lines are forwarded, the rest
/// is kept as a bounded tail for the error message.
pub fn run_encoder(
    program: &str,
    args: &[String],
    total: Option<TimeMs>,
    reporter: &dyn Reporter,
    cancel: &CancelFlag,
) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::EncoderNotFound
            } else {
                RenderError::Io(e)
            }
        })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::Io(std::io::Error::other("encoder stderr not captured")))?;
    let total_secs = total.map(|t| t.as_seconds()).unwrap_or(0.0);
    let (progress_tx, progress_rx) = mpsc::channel::<EncodeProgress>();

    let reader = std::thread::spawn(move || {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        for_each_line(stderr, |line| {
            if let Some(progress) = parse_progress(line, total_secs) {
                let _ = progress_tx.send(progress);
            } else {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            }
        });
        Vec::from(tail)
    });

    let mut ticker = ProgressTicker::new(total_secs);
    let status = loop {
        match progress_rx.recv_timeout(WAIT_TICK) {
            Ok(progress) => ticker.observe(&progress, reporter),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(WAIT_TICK),
        }

        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RenderError::Cancelled);
        }
        if let Some(status) = child.try_wait()? {
            break status;
        }
    };

    let tail = reader.join().unwrap_or_default();
    for progress in progress_rx.try_iter() {
        ticker.observe(&progress, reporter);
    }
    if !status.success() {
        return Err(RenderError::EncoderFailed {
            code: status.code(),
            stderr: tail.join("\n"),
        });
    }

    Ok(())
}

/// Throttles progress to one message per 10% (or per 30s of output when the
/// total duration is unknown).
struct ProgressTicker {
    total_secs: f64,
    last_bucket: i64,
}

impl ProgressTicker {
    fn new(total_secs: f64) -> Self {
        Self {
            total_secs,
            last_bucket: -1,
        }
    }

    fn observe(&mut self, progress: &EncodeProgress, reporter: &dyn Reporter) {
        let known = self.total_secs > 0.0;
        let bucket = if known {
            (progress.percent / 10.0) as i64
        } else {
            (progress.time_secs / 30.0) as i64
        };
        if bucket <= self.last_bucket {
            return;
        }
        self.last_bucket = bucket;
        if known {
            reporter.report(&format!("encoding {:.0}%", progress.percent));
        } else {
            reporter.report(&format!(
                "encoded {}",
                TimeMs::from_seconds(progress.time_secs)
            ));
        }
    }
}

/// Split a byte stream on `\n` or `\r`; ffmpeg ends progress lines with `\r`.
fn for_each_line(mut reader: impl Read, mut f: impl FnMut(&str)) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    f(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        f(&String::from_utf8_lossy(&pending));
    }
}

/// Parse an ffmpeg stderr progress line.
///
/// Example line: `frame=  123 fps= 60 ... time=00:01:02.05 speed=1.50x`
pub fn parse_progress(line: &str, total_secs: f64) -> Option<EncodeProgress> {
    if !line.contains("time=") {
        return None;
    }

    let frame = extract_value(line, "frame=")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = extract_value(line, "fps=")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let speed_str = extract_value(line, "speed=").unwrap_or_default();

    let time_secs = extract_value(line, "time=")
        .and_then(|v| parse_time_str(&v))
        .unwrap_or(0.0);

    let percent = if total_secs > 0.0 {
        (time_secs / total_secs * 100.0).min(100.0)
    } else {
        0.0
    };

    let speed_factor = speed_str
        .trim_end_matches('x')
        .parse::<f64>()
        .unwrap_or(0.0);

    let eta_seconds = if speed_factor > 0.0 && total_secs > time_secs {
        Some((total_secs - time_secs) / speed_factor)
    } else {
        None
    };

    Some(EncodeProgress {
        percent,
        frame,
        fps,
        time_secs,
        speed: speed_str,
        eta_seconds,
    })
}

/// Extract a value from an ffmpeg key=value progress line.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let val = trimmed[..end].to_string();
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Parse an ffmpeg time string like "00:01:02.05" into seconds.
fn parse_time_str(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let mins: f64 = parts[1].parse().ok()?;
    let secs: f64 = parts[2].parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use voxreel_core::report::CollectingReporter;

    fn make_job(music: Option<&str>, hw: bool) -> EncoderJob {
        EncoderJob {
            background_image: PathBuf::from("/scratch/background.jpg"),
            audio: PathBuf::from("/work/audio.mp3"),
            subtitles: PathBuf::from("/scratch/subtitles_processed.srt"),
            font: PathBuf::from("/assets/fonts/Brush.ttf"),
            font_name: "Brush Script".to_string(),
            background_music: music.map(PathBuf::from),
            use_hw_accel: hw,
            output: PathBuf::from("/scratch/video.mp4"),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn software_profile_without_music_maps_audio_directly() {
        let args = build_command(&make_job(None, false), false).to_args();

        let expected: Vec<String> = [
            "-y",
            "-loop",
            "1",
            "-i",
            "/scratch/background.jpg",
            "-i",
            "/work/audio.mp3",
            "-filter_complex",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(&args[..8], expected.as_slice());

        assert_eq!(value_after(&args, "-map"), vec!["[v]", "1:a"]);
        assert_eq!(value_after(&args, "-c:v"), vec!["libx264"]);
        assert_eq!(value_after(&args, "-crf"), vec!["18"]);
        assert_eq!(value_after(&args, "-preset"), vec!["fast"]);
        assert!(!args.contains(&"-stream_loop".to_string()));
        assert!(!args[8].contains("amix"));
        assert_eq!(args.last().unwrap(), "/scratch/video.mp4");
    }

    #[test]
    fn hardware_profile_uses_nvenc() {
        let args = build_command(&make_job(None, true), false).to_args();
        assert_eq!(value_after(&args, "-c:v"), vec!["h264_nvenc"]);
        assert_eq!(value_after(&args, "-cq"), vec!["24"]);
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn both_profiles_share_audio_and_pixel_format() {
        for hw in [false, true] {
            let args = build_command(&make_job(None, hw), false).to_args();
            assert_eq!(value_after(&args, "-c:a"), vec!["aac"]);
            assert_eq!(value_after(&args, "-b:a"), vec!["192k"]);
            assert_eq!(value_after(&args, "-pix_fmt"), vec!["yuv420p"]);
            assert!(args.contains(&"-shortest".to_string()));
        }
    }

    #[test]
    fn music_adds_looped_third_input_and_mix() {
        let cmd = build_command(&make_job(Some("/assets/music/bgm.mp3"), false), true);
        let args = cmd.to_args();

        assert_eq!(cmd.inputs.len(), 3);
        let loop_pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(
            &args[loop_pos..loop_pos + 4],
            &["-stream_loop", "-1", "-i", "/assets/music/bgm.mp3"]
        );
        assert!(cmd
            .filter_graph
            .ends_with("[2:a]volume=0.15[bgm];[1:a][bgm]amix=inputs=2:duration=first[a]"));
        assert_eq!(value_after(&args, "-map"), vec!["[v]", "[a]"]);
    }

    #[test]
    fn missing_music_file_falls_back_to_direct_audio() {
        let job = make_job(Some("/tmp/does_not_exist_voxreel_bgm.mp3"), false);
        assert!(!job.music_available());
        let args = build_command(&job, job.music_available()).to_args();
        assert_eq!(value_after(&args, "-map"), vec!["[v]", "1:a"]);
        assert!(!args.contains(&"-stream_loop".to_string()));
    }

    #[test]
    fn availability_without_music_path_maps_audio_directly() {
        let args = build_command(&make_job(None, false), true).to_args();
        assert_eq!(value_after(&args, "-map"), vec!["[v]", "1:a"]);
        assert!(!args.iter().any(|a| a.contains("amix")));
    }

    #[test]
    fn existing_music_file_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let music = dir.path().join("bgm.mp3");
        std::fs::write(&music, b"not really mp3").unwrap();

        let mut job = make_job(None, false);
        job.background_music = Some(music);
        assert!(job.music_available());
        assert!(build_command(&job, job.music_available())
            .filter_graph
            .contains("amix"));
    }

    #[test]
    fn builder_is_deterministic() {
        let job = make_job(Some("/assets/music/bgm.mp3"), true);
        assert_eq!(build_command(&job, true), build_command(&job, true));
        assert_eq!(
            build_command(&job, true).to_args(),
            build_command(&job, true).to_args()
        );
    }

    #[test]
    fn subtitle_stage_burns_in_with_fixed_style() {
        let cmd = build_command(&make_job(None, false), false);
        let expected_start = format!(
            "[0:v]subtitles='{}':fontsdir='{}':force_style='FontName=Brush Script,",
            escape_filter_path(Path::new("/scratch/subtitles_processed.srt")),
            escape_filter_path(Path::new("/assets/fonts")),
        );
        assert!(cmd.filter_graph.starts_with(&expected_start));
        assert!(cmd.filter_graph.contains(
            "FontSize=42,Alignment=2,MarginV=80,PrimaryColour=&HFFFFFF,Bold=1,Shadow=0.8'[v]"
        ));
    }

    #[test]
    fn relative_font_and_subtitles_resolve_to_absolute_dirs() {
        let mut job = make_job(None, false);
        job.font = PathBuf::from("font.ttf");
        job.subtitles = PathBuf::from("subs.srt");
        let cwd = std::env::current_dir().unwrap();

        let graph = build_command(&job, false).filter_graph;

        assert!(!graph.contains("fontsdir=''"), "{graph}");
        assert!(graph.contains(&format!("fontsdir='{}'", escape_filter_path(&cwd))));
        assert!(graph.contains(&format!(
            "subtitles='{}'",
            escape_filter_path(&cwd.join("subs.srt"))
        )));
    }

    #[test]
    fn escape_windows_paths() {
        assert_eq!(
            escape_filter_path_for(r"C:\Users\me\subs.srt", true),
            r"C\:/Users/me/subs.srt"
        );
    }

    #[test]
    fn escape_posix_paths() {
        assert_eq!(escape_filter_path_for("/tmp/plain.srt", false), "/tmp/plain.srt");
        assert_eq!(
            escape_filter_path_for(r"/tmp/a:b\c'd.srt", false),
            r"/tmp/a\:b\\c\'d.srt"
        );
    }

    #[test]
    fn parse_progress_extracts_time_and_calculates_percent() {
        let line =
            "frame=  150 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 200.0kbits/s speed=1.50x";
        let progress = parse_progress(line, 10.0).unwrap();

        assert_eq!(progress.frame, 150);
        assert!((progress.fps - 30.0).abs() < 0.01);
        assert!((progress.percent - 50.0).abs() < 0.1);
        assert!((progress.time_secs - 5.0).abs() < 0.001);
        assert_eq!(progress.speed, "1.50x");
        assert!((progress.eta_seconds.unwrap() - 3.33).abs() < 0.1);
    }

    #[test]
    fn parse_progress_returns_none_for_non_progress_lines() {
        assert!(parse_progress("Input #0, mp3, from 'audio.mp3':", 10.0).is_none());
        assert!(parse_progress("", 10.0).is_none());
    }

    #[test]
    fn parse_progress_handles_zero_total_duration() {
        let line = "frame=  10 fps= 30 time=00:00:01.00 speed=1.00x";
        let progress = parse_progress(line, 0.0).unwrap();
        assert!((progress.percent - 0.0).abs() < 0.01);
        assert!(progress.eta_seconds.is_none());
    }

    #[test]
    fn parse_time_str_valid_and_invalid() {
        assert!((parse_time_str("00:01:02.05").unwrap() - 62.05).abs() < 0.001);
        assert!(parse_time_str("invalid").is_none());
        assert!(parse_time_str("00:00").is_none());
    }

    #[test]
    fn lines_split_on_carriage_returns() {
        let input: &[u8] = b"header\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\rdone";
        let mut lines = Vec::new();
        for_each_line(input, |l| lines.push(l.to_string()));
        assert_eq!(
            lines,
            vec![
                "header",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
                "done"
            ]
        );
    }

    #[test]
    fn missing_encoder_binary() {
        let result = run_encoder(
            "voxreel-no-such-encoder",
            &[],
            None,
            &CollectingReporter::new(),
            &CancelFlag::new(),
        );
        assert!(matches!(result, Err(RenderError::EncoderNotFound)));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_code_and_stderr() {
        let args = vec![
            "-c".to_string(),
            "echo 'Invalid data found' >&2; exit 3".to_string(),
        ];
        let result = run_encoder("sh", &args, None, &CollectingReporter::new(), &CancelFlag::new());
        match result {
            Err(RenderError::EncoderFailed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("Invalid data found"));
            }
            other => panic!("expected EncoderFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn progress_lines_reach_reporter() {
        let args = vec![
            "-c".to_string(),
            r"printf 'frame=1 fps=1 time=00:00:05.00 speed=1x\r' >&2".to_string(),
        ];
        let reporter = CollectingReporter::new();
        run_encoder("sh", &args, Some(TimeMs(10_000)), &reporter, &CancelFlag::new()).unwrap();
        assert_eq!(reporter.messages(), vec!["encoding 50%"]);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_running_encoder() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let started = std::time::Instant::now();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let result = run_encoder(
            "sleep",
            &["30".to_string()],
            None,
            &CollectingReporter::new(),
            &cancel,
        );
        assert!(matches!(result, Err(RenderError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
