//! Lifecycle supervision of a search engine node.
//!
//! An [`OpensearchProcess`] wraps the node's OS process in a [`StateMachine`].
//! Behaviour is attached through [`StateMachineTracer`]s:
//!
//! - [`ProcessWatchdog`] restarts the process after unexpected terminations.
//! - [`ClusterRemovalTracer`] drains shards before a node leaves the cluster.
//! - [`TransitionLogger`] logs every state change.
//!
//! A [`HealthChecker`] feeds cluster health into the state machine.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod health;
mod process;
mod removal;
mod state;
mod state_machine;
mod tracer;
mod watchdog;

pub use error::{Error, Result};
pub use health::{DEFAULT_HEALTH_CHECK_INTERVAL, HealthChecker, check_health};
pub use process::{ManagedProcess, OpensearchProcess, OpensearchProcessOptions};
pub use removal::{
    ClusterRemovalOptions, ClusterRemovalTracer, DEFAULT_REMOVAL_POLL_INTERVAL, RemovalStatus,
};
pub use state::{ProcessEvent, ProcessState, Transition};
pub use state_machine::{DEFAULT_HEALTH_CHECK_FAILURE_THRESHOLD, StateMachine};
pub use tracer::{StateMachineTracer, TransitionLogger};
pub use watchdog::{DEFAULT_MAX_RESTARTS, ProcessWatchdog};
