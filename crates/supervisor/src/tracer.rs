use crate::state::{ProcessEvent, ProcessState};

use tracing::info;

/// Observer of state machine transitions.
///
/// Tracers are invoked synchronously, in registration order, after the state
/// has changed. They may fire further events on the state machine; those are
/// queued and dispatched once every tracer has seen the current transition.
pub trait StateMachineTracer
where
    Self: Send + Sync + 'static,
{
    /// Name used when logging failures of this tracer.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called with the event of an accepted transition, before `transition`.
    fn trigger(&self, _event: ProcessEvent) {}

    /// Called after the state moved from `source` to `destination`.
    fn transition(&self, event: ProcessEvent, source: ProcessState, destination: ProcessState);
}

/// Tracer logging every transition at info level.
#[derive(Debug)]
pub struct TransitionLogger {
    process: String,
}

impl TransitionLogger {
    /// Creates a logger labelling transitions with `process`.
    pub fn new(process: impl Into<String>) -> Self {
        Self {
            process: process.into(),
        }
    }
}

impl StateMachineTracer for TransitionLogger {
    fn name(&self) -> &str {
        "transition-logger"
    }

    fn transition(&self, event: ProcessEvent, source: ProcessState, destination: ProcessState) {
        if source != destination {
            info!(process = %self.process, "{} --{}--> {}", source, event, destination);
        }
    }
}
