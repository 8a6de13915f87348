use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use voxreel_core::settings::PipelineSettings;
use voxreel_core::types::{CompositionParams, SubtitleLayout};
use voxreel_worker::protocol::{CompositionJob, Job, ResegmentJob};
use voxreel_worker::supervisor::{SupervisorEvent, TaskState, TaskSupervisor, WorkerCommand};

#[derive(Parser, Debug)]
#[command(name = "voxreel")]
#[command(about = "Turn narration audio and subtitles into a captioned video", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compose a video from a JSON job file
    Compose {
        /// Composition parameters (JSON)
        #[arg(long)]
        params: PathBuf,

        /// Pipeline settings (JSON); defaults apply when omitted
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Re-split an SRT file into readable captions
    Resegment {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, default_value_t = 12)]
        max_chars: usize,

        #[arg(long, default_value_t = 2)]
        max_lines: usize,
    },
    /// Run one job from stdin (used internally)
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let job = match cli.command {
        Commands::Worker => return voxreel_worker::worker::run_stdio().await,
        Commands::Compose { params, settings } => {
            let params = CompositionParams::load_from_file(&params)
                .with_context(|| format!("failed to load job file {}", params.display()))?;
            let settings = match settings {
                Some(path) => PipelineSettings::load_from_file(&path)
                    .with_context(|| format!("failed to load settings {}", path.display()))?,
                None => PipelineSettings::default(),
            };
            Job::Composition(CompositionJob { params, settings })
        }
        Commands::Resegment {
            input,
            output,
            max_chars,
            max_lines,
        } => Job::Resegment(ResegmentJob {
            input,
            output,
            layout: SubtitleLayout::new(max_chars, max_lines)?,
        }),
    };

    run_supervised(job).await
}

/// Run `job` in a worker process, relaying progress until it finishes or
/// the user interrupts.
async fn run_supervised(job: Job) -> Result<()> {
    let mut supervisor = TaskSupervisor::new(WorkerCommand::current_exe()?);
    let task_id = supervisor.submit(job)?;
    tracing::info!(task_id = %task_id, "submitted task");

    let mut outcome = None;
    let interrupted = tokio::select! {
        _ = supervisor.drive(|event| match event {
            SupervisorEvent::Progress(p) => tracing::info!("{}", p.message),
            SupervisorEvent::Finished { result, .. } => outcome = Some(result),
        }) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        supervisor.cancel();
        bail!("interrupted, task {task_id} cancelled");
    }

    match (supervisor.state(), outcome) {
        (Some(TaskState::Succeeded), Some(Ok(payload))) => {
            println!("{payload}");
            Ok(())
        }
        (_, Some(Err(e))) => bail!("task {task_id} failed: {e}"),
        (state, _) => bail!("task {task_id} ended in state {state:?}"),
    }
}
