use crate::error::{Result, SupervisorError, TaskError};
use crate::protocol::{Job, TaskId, TerminalStatus, WorkerMessage, WorkerRequest};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const DEFAULT_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for lines still in the pipe after the worker exits.
const EXIT_DRAIN: Duration = Duration::from_millis(250);
const REAP_TICK: Duration = Duration::from_millis(10);

/// How to launch a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// This executable re-invoked with the `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".to_string()]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Crashed,
    Terminated,
}

impl TaskState {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Crashed | TaskState::Terminated
        )
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub job: Job,
    pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Progress(ProgressEvent),
    Finished {
        task_id: TaskId,
        state: TaskState,
        result: std::result::Result<serde_json::Value, TaskError>,
    },
}

/// A line read from worker stdout.
enum Line {
    Message(WorkerMessage),
    Undecodable(String),
}

/// OS resources held while a task runs. Dropping the scratch directory
/// removes whatever the worker left in it.
struct Running {
    child: Child,
    lines: Receiver<Line>,
    _scratch: TempDir,
}

/// Runs one job at a time in a separate worker process and relays its
/// progress and result.
pub struct TaskSupervisor {
    command: WorkerCommand,
    grace_period: Duration,
    poll_interval: Duration,
    task: Option<Task>,
    running: Option<Running>,
}

impl TaskSupervisor {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            grace_period: DEFAULT_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            task: None,
            running: None,
        }
    }

    /// Time between SIGTERM and a hard kill on cancel.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn state(&self) -> Option<TaskState> {
        self.task.as_ref().map(|t| t.state)
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.child.id())
    }

    /// Start `job` in a fresh worker process.
    pub fn submit(&mut self, job: Job) -> Result<TaskId> {
        if self.running.is_some() {
            return Err(SupervisorError::Busy);
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let scratch = tempfile::Builder::new()
            .prefix("voxreel-task-")
            .tempdir()?;
        let request = WorkerRequest {
            task_id: task_id.clone(),
            scratch_root: Some(scratch.path().to_path_buf()),
            job: job.clone(),
        };
        let mut line =
            serde_json::to_string(&request).map_err(|e| SupervisorError::Protocol(e.to_string()))?;
        line.push('\n');

        self.task = Some(Task {
            id: task_id.clone(),
            job,
            state: TaskState::Pending,
        });

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                self.task = None;
                SupervisorError::Spawn(e)
            })?;

        // A worker that dies before reading shows up as a crash in `poll`.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()) {
                tracing::warn!(task_id = %task_id, "failed to send request to worker: {e}");
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Protocol("worker stdout not captured".to_string()))?;
        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, tx);

        tracing::info!(
            task_id = %task_id,
            pid = child.id(),
            kind = self.task.as_ref().map(|t| t.job.kind()).unwrap_or_default(),
            "worker started"
        );
        self.running = Some(Running {
            child,
            lines: rx,
            _scratch: scratch,
        });
        if let Some(task) = self.task.as_mut() {
            task.state = TaskState::Running;
        }
        Ok(task_id)
    }

    /// Collect whatever the worker has said since the last call. Never blocks
    /// for long: only a bounded drain after the worker has exited.
    pub fn poll(&mut self) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        let Some(task_id) = self.running_task_id() else {
            return events;
        };

        let exited = match self.running.as_mut().map(|r| r.child.try_wait()) {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                tracing::warn!(task_id = %task_id, "failed to query worker status: {e}");
                None
            }
            None => return events,
        };

        loop {
            let next = match self.running.as_ref() {
                Some(running) => running.lines.try_recv(),
                None => return events,
            };
            match next {
                Ok(line) => {
                    if let Some(finished) = self.handle_line(&task_id, line, &mut events) {
                        events.push(finished);
                        return events;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let Some(status) = exited else {
            return events;
        };

        let deadline = Instant::now() + EXIT_DRAIN;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let next = match self.running.as_ref() {
                Some(running) => running.lines.recv_timeout(remaining),
                None => return events,
            };
            match next {
                Ok(line) => {
                    if let Some(finished) = self.handle_line(&task_id, line, &mut events) {
                        events.push(finished);
                        return events;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::warn!(task_id = %task_id, code = ?status.code(), "worker exited without a result");
        events.push(self.finalize(
            TaskState::Crashed,
            Err(TaskError::WorkerCrash {
                code: status.code(),
            }),
        ));
        events
    }

    /// Stop the running task. Returns `false` if nothing was running.
    pub fn cancel(&mut self) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        let pid = running.child.id();
        tracing::info!(pid, "cancelling worker");
        if let Err(e) = terminate(&mut running.child, self.grace_period) {
            tracing::warn!(pid, "failed to stop worker cleanly: {e}");
        }
        self.finalize(TaskState::Terminated, Err(TaskError::Terminated));
        true
    }

    /// Poll every `poll_interval` until the task reaches a final state.
    ///
    /// `poll` may block briefly (draining after exit, or the grace period
    /// when stopping a worker), so it runs under `block_in_place`. Requires
    /// the multi-threaded runtime.
    pub async fn drive<F>(&mut self, mut on_event: F) -> Option<TaskState>
    where
        F: FnMut(SupervisorEvent),
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        while self.running.is_some() {
            ticker.tick().await;
            let events = tokio::task::block_in_place(|| self.poll());
            for event in events {
                on_event(event);
            }
        }
        self.state()
    }

    fn running_task_id(&self) -> Option<TaskId> {
        self.running.as_ref()?;
        self.task.as_ref().map(|t| t.id.clone())
    }

    /// Turn one stdout line into events; returns the finishing event if the
    /// line was this task's terminal message.
    fn handle_line(
        &mut self,
        task_id: &str,
        line: Line,
        events: &mut Vec<SupervisorEvent>,
    ) -> Option<SupervisorEvent> {
        match line {
            Line::Message(WorkerMessage::Progress { text }) | Line::Undecodable(text) => {
                events.push(SupervisorEvent::Progress(ProgressEvent {
                    task_id: task_id.to_string(),
                    message: text,
                }));
                None
            }
            Line::Message(WorkerMessage::Terminal {
                task_id: reported,
                status,
                payload,
            }) => {
                if reported != task_id {
                    tracing::warn!(expected = task_id, reported = %reported, "ignoring result for another task");
                    return None;
                }
                Some(match status {
                    TerminalStatus::Success => self.finalize(TaskState::Succeeded, Ok(payload)),
                    TerminalStatus::Error => {
                        let message = match payload {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        self.finalize(TaskState::Failed, Err(TaskError::Failed(message)))
                    }
                })
            }
        }
    }

    /// Release the process, channel and scratch directory, then record the
    /// final state.
    fn finalize(
        &mut self,
        state: TaskState,
        result: std::result::Result<serde_json::Value, TaskError>,
    ) -> SupervisorEvent {
        if let Some(mut running) = self.running.take() {
            let reaped = match wait_for_exit(&mut running.child, self.grace_period) {
                Ok(Some(_)) => Ok(()),
                Ok(None) => terminate(&mut running.child, self.grace_period).map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = reaped {
                tracing::warn!("failed to reap worker: {e}");
            }
        }

        let task_id = match self.task.as_mut() {
            Some(task) => {
                task.state = state;
                task.id.clone()
            }
            None => TaskId::new(),
        };
        tracing::info!(task_id = %task_id, ?state, "task finished");
        SupervisorEvent::Finished {
            task_id,
            state,
            result,
        }
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn spawn_reader(stdout: ChildStdout, tx: Sender<Line>) {
    // Not joined: a grandchild may keep the pipe open after the worker dies.
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let parsed = match WorkerMessage::parse_line(&line) {
                Ok(message) => Line::Message(message),
                Err(_) => Line::Undecodable(line),
            };
            if tx.send(parsed).is_err() {
                break;
            }
        }
    });
}

/// Ask the process to stop, wait up to `grace`, then kill it. Always reaps.
fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    }

    if let Some(status) = wait_for_exit(child, grace)? {
        return Ok(Some(status));
    }

    child.kill()?;
    child.wait().map(Some)
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(REAP_TICK);
    }
}
