use crate::protocol::{Job, TerminalStatus, WorkerMessage, WorkerRequest};
use anyhow::{bail, Context};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use tokio::io::{AsyncBufReadExt, BufReader};
use voxreel_core::report::{CancelFlag, Reporter};
use voxreel_core::resegment::process_subtitle_file;
use voxreel_render::pipeline;

/// Reporter that forwards messages as progress lines on the worker's stdout.
pub struct ChannelReporter {
    tx: Sender<WorkerMessage>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<WorkerMessage>) -> Self {
        Self { tx }
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, message: &str) {
        tracing::info!("{message}");
        let _ = self.tx.send(WorkerMessage::progress(message));
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
        let _ = self.tx.send(WorkerMessage::progress(format!("warning: {message}")));
    }
}

/// Worker process entry: read one request from stdin, run it, and report
/// progress plus exactly one terminal message on stdout.
pub async fn run_stdio() -> anyhow::Result<()> {
    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read request from stdin")?;
    if read == 0 {
        bail!("no request received on stdin");
    }
    let request: WorkerRequest =
        serde_json::from_str(line.trim()).context("malformed worker request")?;
    let task_id = request.task_id.clone();

    let (tx, rx) = mpsc::channel();
    let writer = std::thread::spawn(move || write_messages(rx));

    let reporter = ChannelReporter::new(tx.clone());
    reporter.report(&format!(
        "worker {} started task {task_id} ({})",
        std::process::id(),
        request.job.kind()
    ));

    let cancel = CancelFlag::new();
    let signals = tokio::spawn(watch_signals(cancel.clone()));

    let outcome =
        tokio::task::spawn_blocking(move || run_job(&request, &reporter, &cancel)).await;
    signals.abort();

    let (status, payload) = match outcome {
        Ok(Ok(value)) => (TerminalStatus::Success, value),
        Ok(Err(message)) => (TerminalStatus::Error, Value::String(message)),
        Err(e) => (
            TerminalStatus::Error,
            Value::String(format!("job thread failed: {e}")),
        ),
    };
    if status == TerminalStatus::Error {
        tracing::error!(task_id = %task_id, "task failed: {payload}");
    }
    let _ = tx.send(WorkerMessage::Terminal {
        task_id,
        status,
        payload,
    });
    drop(tx);

    writer
        .join()
        .map_err(|_| anyhow::anyhow!("stdout writer panicked"))?
        .context("failed to write to stdout")?;
    Ok(())
}

/// Run a job in-process. The error string becomes the terminal payload.
pub fn run_job(
    request: &WorkerRequest,
    reporter: &dyn Reporter,
    cancel: &CancelFlag,
) -> Result<Value, String> {
    match &request.job {
        Job::Composition(job) => {
            let output = pipeline::run(
                &job.params,
                &job.settings,
                request.scratch_root.as_deref(),
                reporter,
                cancel,
            )
            .map_err(|e| e.to_string())?;
            Ok(json!({
                "video": output.video.to_string_lossy(),
                "cover": output.cover.map(|c| c.to_string_lossy().to_string()),
                "captions": output.captions,
            }))
        }
        Job::Resegment(job) => {
            job.layout.validate().map_err(|e| e.to_string())?;
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
            let captions = process_subtitle_file(&job.input, &job.output, &job.layout, reporter)
                .map_err(|e| e.to_string())?;
            Ok(json!({
                "output": job.output.to_string_lossy(),
                "captions": captions,
            }))
        }
    }
}

fn write_messages(rx: Receiver<WorkerMessage>) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for message in rx {
        let line = message.to_line().map_err(std::io::Error::other)?;
        out.write_all(line.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

async fn watch_signals(cancel: CancelFlag) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("termination requested, cancelling job");
    cancel.cancel();
}
