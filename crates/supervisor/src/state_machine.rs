use crate::state::{ProcessEvent, ProcessState, Transition};
use crate::tracer::StateMachineTracer;

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

/// Consecutive failed health checks before a process is considered failed.
pub const DEFAULT_HEALTH_CHECK_FAILURE_THRESHOLD: u32 = 10;

struct Core {
    dispatcher: Option<ThreadId>,
    health_check_failures: u32,
    pending: VecDeque<ProcessEvent>,
    state: ProcessState,
}

impl Core {
    fn accept(&mut self, event: ProcessEvent, failure_threshold: u32) -> Option<Transition> {
        let source = self.state;
        let Some(mut destination) = source.on(event) else {
            debug!("ignoring {} in state {}", event, source);
            return None;
        };

        if event == ProcessEvent::HealthCheckFailed {
            self.health_check_failures = self.health_check_failures.saturating_add(1);
            if self.health_check_failures >= failure_threshold {
                warn!(
                    "{} consecutive health checks failed",
                    self.health_check_failures
                );
                destination = ProcessState::Failed;
            }
        }

        let entering = |state| destination == state && source != state;
        if entering(ProcessState::Available)
            || entering(ProcessState::Starting)
            || destination == ProcessState::New
        {
            self.health_check_failures = 0;
        }

        self.state = destination;

        Some(Transition {
            event,
            source,
            destination,
        })
    }
}

struct Inner {
    core: Mutex<Core>,
    failure_threshold: u32,
    idle: Condvar,
    state_tx: watch::Sender<ProcessState>,
    tracers: RwLock<Vec<Arc<dyn StateMachineTracer>>>,
}

/// Lifecycle state machine of one managed process.
///
/// Events may be fired from any thread, including from inside a tracer. Each
/// event is applied atomically and tracers see transitions in the order the
/// events were accepted.
///
/// Events fired from inside a tracer are queued and handled once the current
/// transition has been traced. A caller on any other thread blocks until the
/// running dispatch has finished, so its event has been applied by the time
/// [`fire`](Self::fire) returns. Tracers must therefore not wait on other
/// threads that fire events.
///
/// Clones share the same machine.
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

impl StateMachine {
    /// Creates a machine in [`ProcessState::New`] with the default failure
    /// threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_HEALTH_CHECK_FAILURE_THRESHOLD)
    }

    /// Creates a machine that fails after `failure_threshold` consecutive
    /// failed health checks.
    #[must_use]
    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        let (state_tx, _) = watch::channel(ProcessState::New);

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    dispatcher: None,
                    health_check_failures: 0,
                    pending: VecDeque::new(),
                    state: ProcessState::New,
                }),
                failure_threshold: failure_threshold.max(1),
                idle: Condvar::new(),
                state_tx,
                tracers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.inner.core.lock().state
    }

    /// Whether the machine is currently in `state`.
    #[must_use]
    pub fn is_in_state(&self, state: ProcessState) -> bool {
        self.state() == state
    }

    /// Consecutive failed health checks since the process last became
    /// available.
    #[must_use]
    pub fn health_check_failures(&self) -> u32 {
        self.inner.core.lock().health_check_failures
    }

    /// Receiver notified on every accepted transition, after all tracers
    /// have handled it.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.inner.state_tx.subscribe()
    }

    /// Registers a tracer. Tracers are invoked in registration order.
    pub fn add_tracer(&self, tracer: Arc<dyn StateMachineTracer>) {
        debug!("registering tracer {}", tracer.name());
        self.inner.tracers.write().push(tracer);
    }

    /// Fires `event`. Events that do not apply to the current state are
    /// ignored.
    pub fn fire(&self, event: ProcessEvent) {
        let current = thread::current().id();
        {
            let mut core = self.inner.core.lock();
            if core.dispatcher == Some(current) {
                core.pending.push_back(event);
                trace!("queued {}", event);
                return;
            }
            while core.dispatcher.is_some() {
                self.inner.idle.wait(&mut core);
            }
            core.dispatcher = Some(current);
            core.pending.push_back(event);
        }

        loop {
            let transition = {
                let mut core = self.inner.core.lock();
                let Some(event) = core.pending.pop_front() else {
                    core.dispatcher = None;
                    self.inner.idle.notify_all();
                    return;
                };
                core.accept(event, self.inner.failure_threshold)
            };

            if let Some(transition) = transition {
                trace!("{}", transition);
                self.notify(transition);
                self.inner.state_tx.send_replace(transition.destination);
            }
        }
    }

    fn notify(&self, transition: Transition) {
        let tracers = self.inner.tracers.read().clone();

        for tracer in tracers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                tracer.trigger(transition.event);
                tracer.transition(transition.event, transition.source, transition.destination);
            }));

            if let Err(panic) = result {
                error!(
                    "tracer {} panicked on {}: {}",
                    tracer.name(),
                    transition,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("StateMachine")
            .field("state", &core.state)
            .field("health_check_failures", &core.health_check_failures)
            .field("failure_threshold", &self.inner.failure_threshold)
            .field("tracers", &self.inner.tracers.read().len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
