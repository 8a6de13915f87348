use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use voxreel_core::settings::PipelineSettings;
use voxreel_core::types::{CompositionParams, SubtitleLayout};

pub type TaskId = String;

/// Work a task can run inside a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Composition(CompositionJob),
    Resegment(ResegmentJob),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Composition(_) => "composition",
            Job::Resegment(_) => "resegment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionJob {
    pub params: CompositionParams,
    #[serde(default)]
    pub settings: PipelineSettings,
}

/// Resegment one SRT file without rendering anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResegmentJob {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub layout: SubtitleLayout,
}

/// The single line a supervisor writes to a worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: TaskId,
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    pub job: Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Error,
}

/// One line of worker stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress {
        text: String,
    },
    Terminal {
        task_id: TaskId,
        status: TerminalStatus,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl WorkerMessage {
    pub fn progress(text: impl Into<String>) -> Self {
        WorkerMessage::Progress { text: text.into() }
    }

    /// Serialize as a single line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_wire_format() {
        let line = WorkerMessage::progress("rendering background").to_line().unwrap();
        assert_eq!(line, "{\"type\":\"progress\",\"text\":\"rendering background\"}\n");
    }

    #[test]
    fn terminal_wire_format() {
        let msg = WorkerMessage::Terminal {
            task_id: "t1".to_string(),
            status: TerminalStatus::Error,
            payload: json!("ffmpeg not found"),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "terminal",
                "task_id": "t1",
                "status": "error",
                "payload": "ffmpeg not found"
            })
        );
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        let msg = WorkerMessage::parse_line("  {\"type\":\"progress\",\"text\":\"x\"}\r\n").unwrap();
        assert_eq!(msg, WorkerMessage::progress("x"));
    }

    #[test]
    fn parse_rejects_unknown_type() {
        assert!(WorkerMessage::parse_line("{\"type\":\"bogus\"}").is_err());
        assert!(WorkerMessage::parse_line("not json").is_err());
    }

    #[test]
    fn resegment_request_uses_layout_defaults() {
        let raw = r#"{
            "task_id": "abc",
            "job": { "kind": "resegment", "input": "in.srt", "output": "out.srt" }
        }"#;
        let request: WorkerRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.scratch_root, None);
        match request.job {
            Job::Resegment(job) => {
                assert_eq!(job.input, PathBuf::from("in.srt"));
                assert_eq!(job.layout, SubtitleLayout::default());
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn composition_request_is_tagged() {
        let raw = r#"{
            "task_id": "abc",
            "scratch_root": "/tmp/scratch",
            "job": {
                "kind": "composition",
                "params": {
                    "avatar": "a.png", "font": "f.ttf", "author": "me",
                    "corner_text": "c", "audio": "a.mp3", "subtitles": "a.srt",
                    "output": "out/video.mp4"
                }
            }
        }"#;
        let request: WorkerRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.job.kind(), "composition");
        let Job::Composition(job) = request.job else {
            panic!("expected composition");
        };
        assert_eq!(job.settings, PipelineSettings::default());
        assert!(!job.params.use_hw_accel);
    }
}
