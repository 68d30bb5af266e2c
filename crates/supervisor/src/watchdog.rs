use crate::process::ManagedProcess;
use crate::state::{ProcessEvent, ProcessState};
use crate::tracer::StateMachineTracer;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, error, info, warn};

/// Default number of automatic restarts before the watchdog gives up.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Restarts a process that terminates unexpectedly.
///
/// The watchdog arms when the process starts and disarms when it is stopped
/// deliberately. Each unexpected termination while armed consumes one restart;
/// once `max_restarts` have been used the next termination makes the watchdog
/// give up for good. A restart that fails to spawn also consumes one and is
/// retried at once, so the watchdog gives up when every attempt fails. The
/// restart budget is never replenished.
pub struct ProcessWatchdog<P: ManagedProcess> {
    armed: AtomicBool,
    gave_up: AtomicBool,
    max_restarts: u32,
    process: Weak<P>,
    restarts: AtomicU32,
}

impl<P: ManagedProcess> ProcessWatchdog<P> {
    /// Creates a disarmed watchdog for `process`.
    #[must_use]
    pub fn new(process: &Arc<P>, max_restarts: u32) -> Self {
        Self {
            armed: AtomicBool::new(false),
            gave_up: AtomicBool::new(false),
            max_restarts,
            process: Arc::downgrade(process),
            restarts: AtomicU32::new(0),
        }
    }

    /// Whether a termination would currently trigger a restart attempt.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.armed.load(Ordering::SeqCst) && !self.is_stopped()
    }

    /// Whether the watchdog gave up after exhausting its restarts.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.gave_up.load(Ordering::SeqCst)
    }

    /// Restarts performed so far.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Maximum number of restarts.
    #[must_use]
    pub const fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    fn arm(&self) {
        if self.is_stopped() {
            debug!("watchdog gave up earlier, staying disarmed");
            return;
        }
        self.armed.store(true, Ordering::SeqCst);
    }

    fn restart_process(&self) {
        if !self.is_active() {
            debug!("watchdog inactive, not restarting process");
            return;
        }

        let Some(process) = self.process.upgrade() else {
            debug!("process dropped, nothing to restart");
            return;
        };

        loop {
            let used = self.restarts();
            if used >= self.max_restarts {
                warn!(
                    "process terminated after {} restarts, giving up",
                    self.max_restarts
                );
                self.armed.store(false, Ordering::SeqCst);
                self.gave_up.store(true, Ordering::SeqCst);
                return;
            }

            self.restarts.fetch_add(1, Ordering::SeqCst);
            info!(
                attempt = used + 1,
                max = self.max_restarts,
                "process terminated unexpectedly, restarting"
            );

            match process.start() {
                Ok(()) => return,
                Err(err) => error!("failed to restart process: {}", err),
            }
        }
    }
}

impl<P: ManagedProcess> StateMachineTracer for ProcessWatchdog<P> {
    fn name(&self) -> &str {
        "process-watchdog"
    }

    fn transition(&self, event: ProcessEvent, _source: ProcessState, destination: ProcessState) {
        match event {
            ProcessEvent::ProcessStarted => self.arm(),
            ProcessEvent::ProcessStopped => self.armed.store(false, Ordering::SeqCst),
            ProcessEvent::ProcessTerminated if destination == ProcessState::Terminated => {
                self.restart_process();
            }
            _ => {}
        }
    }
}

impl<P: ManagedProcess> std::fmt::Debug for ProcessWatchdog<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWatchdog")
            .field("active", &self.is_active())
            .field("stopped", &self.is_stopped())
            .field("restarts", &self.restarts())
            .field("max_restarts", &self.max_restarts)
            .finish_non_exhaustive()
    }
}
