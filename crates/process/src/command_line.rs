//! Spawning and supervising a single external process.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::logs_cache::{LogStream, LogsCache};
use crate::output::LoggingOutputStream;

/// Default time a process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on how long output pumps may keep draining after exit.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a process run ended in failure.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    /// The process exited on its own with a non-zero status or a signal.
    #[error("process exited with {0}")]
    Exited(ExitStatus),

    /// The process exited after a stop was requested.
    #[error("process was stopped ({0})")]
    Stopped(ExitStatus),

    /// The process ignored SIGTERM and had to be killed.
    #[error("process did not exit within {0:?} and was killed")]
    Killed(Duration),

    /// Waiting on the process failed.
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),
}

/// Receives lifecycle callbacks for a [`CommandLineProcess`].
///
/// Per run, `on_start` fires once and is followed by exactly one of
/// `on_process_complete` or `on_process_failed`.
pub trait ProcessListener: Send + Sync + 'static {
    /// The OS process has been spawned.
    fn on_start(&self);

    /// The process exited cleanly.
    fn on_process_complete(&self, exit_code: i32);

    /// The process exited with an error, was stopped, or could not be waited on.
    fn on_process_failed(&self, exit_code: i32, cause: &ProcessFailure);
}

/// Options for a [`CommandLineProcess`].
#[derive(Clone, Debug)]
pub struct CommandLineOptions {
    /// The arguments to pass to the executable.
    pub args: Vec<String>,

    /// Environment variables to set.
    pub env: HashMap<String, String>,

    /// The executable to run.
    pub executable: PathBuf,

    /// Name used when logging process output.
    pub name: String,

    /// How long to wait after SIGTERM before killing the process.
    pub stop_timeout: Duration,

    /// The working directory for the process.
    pub working_dir: Option<PathBuf>,
}

impl CommandLineOptions {
    /// Creates new `CommandLineOptions`.
    #[must_use]
    pub fn new<P: AsRef<Path>, A: AsRef<OsStr>>(
        executable: P,
        args: impl IntoIterator<Item = A>,
    ) -> Self {
        let executable = executable.as_ref().to_path_buf();
        let name = executable
            .file_name()
            .map_or_else(|| "process".to_string(), |n| n.to_string_lossy().to_string());

        Self {
            args: args
                .into_iter()
                .map(|a| a.as_ref().to_string_lossy().to_string())
                .collect(),
            env: HashMap::new(),
            executable,
            name,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            working_dir: None,
        }
    }

    /// Sets the name used in log output.
    #[must_use]
    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn with_working_dir<P: AsRef<Path>>(mut self, working_dir: P) -> Self {
        self.working_dir = Some(working_dir.as_ref().to_path_buf());
        self
    }

    /// Sets an environment variable for the process.
    #[must_use]
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

/// Snapshot of a process run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process ID of the current or last run.
    pub pid: Option<u32>,

    /// Whether the process is still running.
    pub alive: bool,
}

struct RunningProcess {
    alive: Arc<AtomicBool>,
    pid: u32,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl RunningProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Owns one external OS process at a time.
///
/// Output is pumped line by line into a shared [`LogsCache`] and echoed through
/// `tracing`. Completion is reported to the [`ProcessListener`] from a
/// background task.
pub struct CommandLineProcess {
    listener: Arc<dyn ProcessListener>,
    logs: LogsCache,
    options: CommandLineOptions,
    running: Mutex<Option<RunningProcess>>,
    runtime: Handle,
}

impl CommandLineProcess {
    /// Creates a process bound to the current tokio runtime. Nothing is
    /// spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if called outside of a tokio runtime.
    pub fn new(
        options: CommandLineOptions,
        logs: LogsCache,
        listener: Arc<dyn ProcessListener>,
    ) -> Result<Self> {
        Ok(Self {
            listener,
            logs,
            options,
            running: Mutex::new(None),
            runtime: Handle::try_current()?,
        })
    }

    /// The options this process runs with.
    #[must_use]
    pub const fn options(&self) -> &CommandLineOptions {
        &self.options
    }

    /// The cache receiving this process's output.
    #[must_use]
    pub const fn logs(&self) -> &LogsCache {
        &self.logs
    }

    /// Returns the process ID of the current or last run.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.running.lock().as_ref().map(|r| r.pid)
    }

    /// Returns whether the process is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(RunningProcess::is_alive)
    }

    /// Returns a snapshot of the current run.
    #[must_use]
    pub fn info(&self) -> ProcessInfo {
        self.running
            .lock()
            .as_ref()
            .map_or_else(ProcessInfo::default, |r| ProcessInfo {
                pid: Some(r.pid),
                alive: r.is_alive(),
            })
    }

    /// Spawns the process. Does nothing if it is already running.
    ///
    /// `on_start` is invoked on the calling thread before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be spawned.
    pub fn start(&self) -> Result<()> {
        let _runtime = self.runtime.enter();

        let (child, pid, shutdown_token, task_tracker, alive, output) = {
            let mut running = self.running.lock();
            if let Some(current) = running.as_ref() {
                if current.is_alive() {
                    debug!(pid = current.pid, "process already running");
                    return Ok(());
                }
            }

            let mut cmd = Command::new(&self.options.executable);
            cmd.args(&self.options.args);

            if let Some(ref working_dir) = self.options.working_dir {
                cmd.current_dir(working_dir);
            }

            for (key, value) in &self.options.env {
                cmd.env(key, value);
            }

            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            cmd.kill_on_drop(true);

            debug!("Spawning process: {:?}", cmd);

            let mut child = cmd
                .spawn()
                .map_err(|e| Error::Io("Failed to spawn process", e))?;

            let pid = child.id().ok_or_else(|| {
                Error::SpawnProcess("No PID available for spawned process".to_string())
            })?;

            info!(process = %self.options.name, pid, "process started");

            let output = OutputPumps::new();
            if let Some(stdout) = child.stdout.take() {
                output.spawn(&self.options.name, LogStream::Stdout, stdout, self.logs.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                output.spawn(&self.options.name, LogStream::Stderr, stderr, self.logs.clone());
            }
            output.tracker.close();

            let shutdown_token = CancellationToken::new();
            let task_tracker = TaskTracker::new();
            let alive = Arc::new(AtomicBool::new(true));

            *running = Some(RunningProcess {
                alive: alive.clone(),
                pid,
                shutdown_token: shutdown_token.clone(),
                task_tracker: task_tracker.clone(),
            });

            (child, pid, shutdown_token, task_tracker, alive, output)
        };

        // The monitor is spawned only after `on_start` so that a completion
        // callback can never overtake it.
        self.listener.on_start();

        task_tracker.spawn(monitor(
            child,
            Monitor {
                alive,
                listener: self.listener.clone(),
                name: self.options.name.clone(),
                output,
                pid,
                shutdown_token,
                stop_timeout: self.options.stop_timeout,
            },
        ));
        task_tracker.close();

        Ok(())
    }

    /// Sends a signal to the running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be delivered.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.pid() else {
            return Ok(());
        };

        signal::kill(to_pid(pid), signal).map_err(|e| Error::Signal(pid, e))
    }

    /// Stops the process and waits for its teardown to complete.
    ///
    /// Sends SIGTERM, escalating to SIGKILL after the configured stop timeout.
    /// Calling this when nothing is running is a no-op. Concurrent callers all
    /// return once the same teardown has completed.
    pub async fn stop(&self) {
        let teardown = self.running.lock().as_ref().map(|running| {
            (
                running.is_alive(),
                running.pid,
                running.shutdown_token.clone(),
                running.task_tracker.clone(),
            )
        });
        let Some((alive, pid, shutdown_token, task_tracker)) = teardown else {
            debug!(process = %self.options.name, "process never started");
            return;
        };

        if alive && !shutdown_token.is_cancelled() {
            info!(process = %self.options.name, pid, "Shutting down process");
        }

        shutdown_token.cancel();
        task_tracker.wait().await;

        if alive {
            info!(process = %self.options.name, pid, "Process shut down");
        }
    }
}

impl Drop for CommandLineProcess {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown_token.cancel();
        }
    }
}

struct OutputPumps {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl OutputPumps {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn spawn<R>(&self, name: &str, stream: LogStream, reader: R, logs: LogsCache)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = name.to_string();
        let token = self.token.clone();

        self.tracker.spawn(async move {
            let process = name.clone();
            let sink = LoggingOutputStream::new(move |line: String| {
                match stream {
                    LogStream::Stdout => info!(target: "process_output", process = %process, "{}", line),
                    LogStream::Stderr => warn!(target: "process_output", process = %process, "{}", line),
                }
                logs.add(stream, line);
            });

            tokio::select! {
                result = sink.pump(reader) => {
                    if let Err(err) = result {
                        error!(process = %name, %stream, "failed to read process output: {}", err);
                    }
                }
                () = token.cancelled() => {
                    debug!(process = %name, %stream, "output pump cancelled");
                }
            }
        });
    }

    async fn drain(&self, name: &str) {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            // Orphaned grandchildren can keep the pipes open indefinitely.
            warn!(process = %name, "process output still open after exit, detaching");
            self.token.cancel();
        }
    }
}

struct Monitor {
    alive: Arc<AtomicBool>,
    listener: Arc<dyn ProcessListener>,
    name: String,
    output: OutputPumps,
    pid: u32,
    shutdown_token: CancellationToken,
    stop_timeout: Duration,
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Stopped(io::Result<ExitStatus>),
    Killed(io::Result<ExitStatus>),
}

async fn monitor(mut child: Child, ctx: Monitor) {
    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        () = ctx.shutdown_token.cancelled() => {
            terminate(&mut child, ctx.pid, ctx.stop_timeout, &ctx.name).await
        }
    };

    ctx.alive.store(false, Ordering::SeqCst);
    ctx.output.drain(&ctx.name).await;

    let name = ctx.name.as_str();
    let listener = ctx.listener.as_ref();
    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => {
            info!(process = %name, "Process exited with status: {}", status);
            listener.on_process_complete(exit_code(status));
        }
        Outcome::Exited(Ok(status)) => {
            error!(process = %name, "Process exited with non-zero status: {}", status);
            listener.on_process_failed(exit_code(status), &ProcessFailure::Exited(status));
        }
        Outcome::Stopped(Ok(status)) => {
            info!(process = %name, "Process exited with status: {}", status);
            listener.on_process_failed(exit_code(status), &ProcessFailure::Stopped(status));
        }
        Outcome::Killed(Ok(status)) => {
            listener.on_process_failed(
                exit_code(status),
                &ProcessFailure::Killed(ctx.stop_timeout),
            );
        }
        Outcome::Exited(Err(err)) | Outcome::Stopped(Err(err)) | Outcome::Killed(Err(err)) => {
            error!(process = %name, "Failed to wait for process: {}", err);
            listener.on_process_failed(-1, &ProcessFailure::Wait(err));
        }
    }
}

async fn terminate(child: &mut Child, pid: u32, stop_timeout: Duration, name: &str) -> Outcome {
    info!(process = %name, "Shutdown requested, terminating process...");

    if let Err(err) = signal::kill(to_pid(pid), Signal::SIGTERM) {
        error!(process = %name, "Failed to send SIGTERM to process: {}", err);
    }

    if let Ok(status) = tokio::time::timeout(stop_timeout, child.wait()).await {
        return Outcome::Stopped(status);
    }

    error!(process = %name, "Timeout waiting for process to exit, killing...");
    if let Err(err) = child.kill().await {
        return Outcome::Killed(Err(err));
    }

    Outcome::Killed(child.wait().await)
}

#[allow(clippy::cast_possible_wrap)]
const fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(-1, |signal| 128 + signal))
}
