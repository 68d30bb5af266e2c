//! States and events of the managed process lifecycle.

use std::fmt;

/// Lifecycle state of a managed process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Created, never started.
    #[default]
    New,

    /// Spawned, waiting for the first successful health check.
    Starting,

    /// Healthy member of the cluster.
    Available,

    /// Health checks failing after having been available.
    NotResponding,

    /// Health checks failed too many times.
    Failed,

    /// Draining shards before shutdown.
    Removing,

    /// All shards relocated away, waiting for the process to stop.
    Removed,

    /// The process is not running.
    Terminated,
}

impl ProcessState {
    /// Whether a process in this state is expected to be running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Available | Self::NotResponding | Self::Failed | Self::Removing
        )
    }

    /// Whether health checks are meaningful in this state.
    #[must_use]
    pub const fn is_health_checked(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Available | Self::NotResponding | Self::Failed
        )
    }

    /// Destination of `event` from this state, or `None` if the event does
    /// not apply.
    ///
    /// A `HealthCheckFailed` destination of `Starting` or `NotResponding` is
    /// escalated to `Failed` by the state machine once its failure threshold
    /// is reached.
    #[must_use]
    pub const fn on(self, event: ProcessEvent) -> Option<Self> {
        use ProcessEvent as E;

        let destination = match (self, event) {
            (Self::New | Self::Terminated, E::ProcessStarted)
            | (Self::Starting, E::ProcessStarted | E::HealthCheckFailed) => Self::Starting,

            (
                Self::Starting | Self::Available | Self::NotResponding | Self::Failed,
                E::HealthCheckOk,
            ) => Self::Available,

            (Self::Available | Self::NotResponding, E::HealthCheckFailed) => Self::NotResponding,

            (Self::Available, E::ProcessRemove) => Self::Removing,

            (Self::Removing, E::ProcessRemoved) => Self::Removed,

            (
                Self::Starting
                | Self::Available
                | Self::NotResponding
                | Self::Failed
                | Self::Removing
                | Self::Removed,
                E::ProcessStopped | E::ProcessTerminated,
            ) => Self::Terminated,

            (
                Self::Starting
                | Self::Available
                | Self::NotResponding
                | Self::Failed
                | Self::Removing
                | Self::Removed
                | Self::Terminated,
                E::Reset,
            ) => Self::New,

            _ => return None,
        };

        Some(destination)
    }

    /// Upper-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Starting => "STARTING",
            Self::Available => "AVAILABLE",
            Self::NotResponding => "NOT_RESPONDING",
            Self::Failed => "FAILED",
            Self::Removing => "REMOVING",
            Self::Removed => "REMOVED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger fed into the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessEvent {
    /// The OS process was spawned.
    ProcessStarted,

    /// The cluster answered a health check.
    HealthCheckOk,

    /// A health check failed.
    HealthCheckFailed,

    /// The process was deliberately stopped.
    ProcessStopped,

    /// The process exited without being asked to.
    ProcessTerminated,

    /// Removal of the node from the cluster was requested.
    ProcessRemove,

    /// All shards have left the node.
    ProcessRemoved,

    /// Configuration is being reapplied from scratch.
    Reset,
}

impl ProcessEvent {
    /// Upper-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessStarted => "PROCESS_STARTED",
            Self::HealthCheckOk => "HEALTH_CHECK_OK",
            Self::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            Self::ProcessStopped => "PROCESS_STOPPED",
            Self::ProcessTerminated => "PROCESS_TERMINATED",
            Self::ProcessRemove => "PROCESS_REMOVE",
            Self::ProcessRemoved => "PROCESS_REMOVED",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for ProcessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// The event that caused the change.
    pub event: ProcessEvent,

    /// State before the event.
    pub source: ProcessState,

    /// State after the event.
    pub destination: ProcessState,
}

impl Transition {
    /// Whether source and destination are the same state.
    #[must_use]
    pub fn is_reentry(&self) -> bool {
        self.source == self.destination
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} --{}--> {}", self.source, self.event, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessEvent as E;
    use ProcessState as S;

    #[test]
    fn test_happy_path() {
        assert_eq!(S::New.on(E::ProcessStarted), Some(S::Starting));
        assert_eq!(S::Starting.on(E::HealthCheckOk), Some(S::Available));
        assert_eq!(S::Available.on(E::ProcessRemove), Some(S::Removing));
        assert_eq!(S::Removing.on(E::ProcessRemoved), Some(S::Removed));
        assert_eq!(S::Removed.on(E::ProcessStopped), Some(S::Terminated));
        assert_eq!(S::Removing.on(E::ProcessStopped), Some(S::Terminated));
    }

    #[test]
    fn test_terminated_process_can_restart() {
        assert_eq!(S::Terminated.on(E::ProcessStarted), Some(S::Starting));
        assert_eq!(S::Terminated.on(E::ProcessTerminated), None);
        assert_eq!(S::Terminated.on(E::ProcessStopped), None);
    }

    #[test]
    fn test_illegal_events_are_rejected() {
        assert_eq!(S::New.on(E::HealthCheckOk), None);
        assert_eq!(S::New.on(E::ProcessTerminated), None);
        assert_eq!(S::New.on(E::Reset), None);
        assert_eq!(S::Starting.on(E::ProcessRemove), None);
        assert_eq!(S::Available.on(E::ProcessStarted), None);
        assert_eq!(S::Failed.on(E::HealthCheckFailed), None);
        assert_eq!(S::Removing.on(E::HealthCheckOk), None);
        assert_eq!(S::Removed.on(E::ProcessRemove), None);
    }

    #[test]
    fn test_health_transitions() {
        assert_eq!(S::Starting.on(E::HealthCheckFailed), Some(S::Starting));
        assert_eq!(S::Available.on(E::HealthCheckFailed), Some(S::NotResponding));
        assert_eq!(S::NotResponding.on(E::HealthCheckFailed), Some(S::NotResponding));
        assert_eq!(S::NotResponding.on(E::HealthCheckOk), Some(S::Available));
        assert_eq!(S::Failed.on(E::HealthCheckOk), Some(S::Available));
        assert_eq!(S::Available.on(E::HealthCheckOk), Some(S::Available));
    }

    #[test]
    fn test_running_states() {
        assert!(S::Starting.is_running());
        assert!(S::Removing.is_running());
        assert!(!S::New.is_running());
        assert!(!S::Terminated.is_running());
        assert!(!S::Removing.is_health_checked());
    }

    #[test]
    fn test_transition_display() {
        let transition = Transition {
            event: E::HealthCheckOk,
            source: S::Starting,
            destination: S::Available,
        };
        assert_eq!(transition.to_string(), "STARTING --HEALTH_CHECK_OK--> AVAILABLE");
        assert!(!transition.is_reentry());
    }
}
