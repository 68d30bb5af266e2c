use crate::error::{Error, Result};
use crate::state::{ProcessEvent, ProcessState};
use crate::state_machine::{DEFAULT_HEALTH_CHECK_FAILURE_THRESHOLD, StateMachine};
use crate::tracer::StateMachineTracer;

use std::sync::Arc;

use async_trait::async_trait;
use datanode_process::{
    CommandLineOptions, CommandLineProcess, DEFAULT_LOGS_CAPACITY, LogsCache, ProcessFailure,
    ProcessInfo, ProcessListener,
};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A process whose lifecycle is driven by a [`StateMachine`].
#[async_trait]
pub trait ManagedProcess
where
    Self: Send + Sync + 'static,
{
    /// Configuration applied by [`configure`](Self::configure).
    type Config: Send + 'static;

    /// Applies `config`. A running process is restarted with it.
    async fn configure(&self, config: Self::Config) -> Result<()>;

    /// Starts the process. Does nothing if it is already running.
    fn start(&self) -> Result<()>;

    /// Stops the process and waits until it has exited.
    async fn stop(&self);

    /// Feeds `event` into the state machine.
    fn on_event(&self, event: ProcessEvent);

    /// Registers a tracer on the state machine.
    fn add_state_machine_tracer(&self, tracer: Arc<dyn StateMachineTracer>);

    /// Current lifecycle state.
    fn state(&self) -> ProcessState;

    /// Whether the process is in `state`.
    fn is_in_state(&self, state: ProcessState) -> bool {
        self.state() == state
    }
}

/// Options for an [`OpensearchProcess`].
#[derive(Clone, Debug)]
pub struct OpensearchProcessOptions {
    /// Consecutive failed health checks before the process is marked failed.
    pub health_check_failure_threshold: u32,

    /// Lines retained per output stream.
    pub logs_capacity: usize,

    /// Name used in logs.
    pub name: String,
}

impl OpensearchProcessOptions {
    /// Default options for a process called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            health_check_failure_threshold: DEFAULT_HEALTH_CHECK_FAILURE_THRESHOLD,
            logs_capacity: DEFAULT_LOGS_CAPACITY,
            name: name.into(),
        }
    }

    /// Sets the health check failure threshold.
    #[must_use]
    pub const fn with_health_check_failure_threshold(mut self, threshold: u32) -> Self {
        self.health_check_failure_threshold = threshold;
        self
    }

    /// Sets the number of output lines retained per stream.
    #[must_use]
    pub const fn with_logs_capacity(mut self, logs_capacity: usize) -> Self {
        self.logs_capacity = logs_capacity;
        self
    }
}

/// Search engine node run as an external command line process.
///
/// Process callbacks are translated into state machine events: a spawn fires
/// [`ProcessEvent::ProcessStarted`] and any exit fires
/// [`ProcessEvent::ProcessTerminated`]. A deliberate [`stop`](ManagedProcess::stop)
/// fires [`ProcessEvent::ProcessStopped`] first so the exit is not mistaken
/// for a crash.
pub struct OpensearchProcess {
    command: RwLock<Option<Arc<CommandLineProcess>>>,
    logs: LogsCache,
    machine: StateMachine,
    name: String,
}

impl OpensearchProcess {
    /// Creates an unconfigured process in [`ProcessState::New`].
    #[must_use]
    pub fn new(
        OpensearchProcessOptions {
            health_check_failure_threshold,
            logs_capacity,
            name,
        }: OpensearchProcessOptions,
    ) -> Self {
        Self {
            command: RwLock::new(None),
            logs: LogsCache::new(logs_capacity),
            machine: StateMachine::with_failure_threshold(health_check_failure_threshold),
            name,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recent output of the process, shared across restarts.
    #[must_use]
    pub const fn logs(&self) -> &LogsCache {
        &self.logs
    }

    /// The lifecycle state machine.
    #[must_use]
    pub const fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.machine.subscribe()
    }

    /// Snapshot of the OS process, if configured.
    #[must_use]
    pub fn info(&self) -> ProcessInfo {
        self.command
            .read()
            .as_ref()
            .map_or_else(ProcessInfo::default, |command| command.info())
    }

    /// Whether [`configure`](ManagedProcess::configure) has been called.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.command.read().is_some()
    }

    /// Returns the state machine to [`ProcessState::New`] and restarts the
    /// process with its current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is not configured or fails to spawn.
    pub async fn reset(&self) -> Result<()> {
        let command = self.command.read().clone().ok_or(Error::NotConfigured)?;

        info!(process = %self.name, "resetting process");
        self.on_event(ProcessEvent::Reset);
        command.stop().await;

        self.start()
    }

    fn command(&self) -> Option<Arc<CommandLineProcess>> {
        self.command.read().clone()
    }
}

#[async_trait]
impl ManagedProcess for OpensearchProcess {
    type Config = CommandLineOptions;

    async fn configure(&self, config: CommandLineOptions) -> Result<()> {
        let listener = Arc::new(StateMachineListener {
            machine: self.machine.clone(),
            name: self.name.clone(),
        });
        let command = Arc::new(CommandLineProcess::new(
            config,
            self.logs.clone(),
            listener,
        )?);

        let was_running = self
            .command()
            .as_deref()
            .is_some_and(CommandLineProcess::is_alive);
        if was_running {
            info!(process = %self.name, "configuration changed, restarting process");
            self.stop().await;
        }

        *self.command.write() = Some(command);

        if was_running {
            self.start()?;
        }

        Ok(())
    }

    fn start(&self) -> Result<()> {
        let command = self.command().ok_or(Error::NotConfigured)?;
        command.start()?;

        Ok(())
    }

    async fn stop(&self) {
        let Some(command) = self.command() else {
            debug!(process = %self.name, "stop requested before configuration");
            return;
        };

        self.on_event(ProcessEvent::ProcessStopped);
        command.stop().await;
    }

    fn on_event(&self, event: ProcessEvent) {
        self.machine.fire(event);
    }

    fn add_state_machine_tracer(&self, tracer: Arc<dyn StateMachineTracer>) {
        self.machine.add_tracer(tracer);
    }

    fn state(&self) -> ProcessState {
        self.machine.state()
    }
}

impl std::fmt::Debug for OpensearchProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpensearchProcess")
            .field("name", &self.name)
            .field("state", &self.machine.state())
            .field("info", &self.info())
            .finish_non_exhaustive()
    }
}

/// Holds the machine rather than the process to keep ownership acyclic.
struct StateMachineListener {
    machine: StateMachine,
    name: String,
}

impl ProcessListener for StateMachineListener {
    fn on_start(&self) {
        self.machine.fire(ProcessEvent::ProcessStarted);
    }

    fn on_process_complete(&self, exit_code: i32) {
        info!(process = %self.name, exit_code, "process finished");
        self.machine.fire(ProcessEvent::ProcessTerminated);
    }

    fn on_process_failed(&self, exit_code: i32, cause: &ProcessFailure) {
        warn!(process = %self.name, exit_code, "process failed: {}", cause);
        self.machine.fire(ProcessEvent::ProcessTerminated);
    }
}
