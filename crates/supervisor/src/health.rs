use crate::process::ManagedProcess;
use crate::state::ProcessEvent;

use std::sync::{Arc, Weak};
use std::time::Duration;

use datanode_cluster::ClusterClient;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

/// Default interval between health checks.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically probes the cluster and feeds the result into a process's
/// state machine.
///
/// Checks only run while the process is in a health-checked state, so a
/// stopped or draining node is left alone.
pub struct HealthChecker {
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl HealthChecker {
    /// Starts checking `process` every `interval`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn<P: ManagedProcess, C: ClusterClient>(
        process: &Arc<P>,
        client: Arc<C>,
        interval: Duration,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        task_tracker.spawn(run(
            Arc::downgrade(process),
            client,
            interval,
            shutdown_token.clone(),
        ));
        task_tracker.close();

        Self {
            shutdown_token,
            task_tracker,
        }
    }

    /// Stops checking and waits for an in-flight check to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.wait().await;
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Runs one health check against `process`. Returns the fired event, or
/// `None` if the process is not in a health-checked state.
pub async fn check_health<P: ManagedProcess, C: ClusterClient>(
    process: &P,
    client: &C,
) -> Option<ProcessEvent> {
    let state = process.state();
    if !state.is_health_checked() {
        trace!("skipping health check in state {}", state);
        return None;
    }

    let event = match client.cluster_health().await {
        Ok(health) => {
            trace!(status = ?health.status, "health check ok");
            ProcessEvent::HealthCheckOk
        }
        Err(err) => {
            debug!("health check failed: {}", err);
            ProcessEvent::HealthCheckFailed
        }
    };

    process.on_event(event);
    Some(event)
}

async fn run<P: ManagedProcess, C: ClusterClient>(
    process: Weak<P>,
    client: Arc<C>,
    interval: Duration,
    shutdown_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(process) = process.upgrade() else {
            debug!("process dropped, stopping health checks");
            break;
        };

        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = check_health(process.as_ref(), client.as_ref()) => {}
        }
    }
}
