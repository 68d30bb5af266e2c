use crate::error::{Error, Result};
use crate::process::ManagedProcess;
use crate::state::{ProcessEvent, ProcessState};
use crate::tracer::StateMachineTracer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use datanode_cluster::{ALLOCATION_EXCLUDE_SETTING, ClusterClient, ExcludedNodes};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default interval between shard relocation checks while removing a node.
pub const DEFAULT_REMOVAL_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Options for a [`ClusterRemovalTracer`].
#[derive(Clone, Debug)]
pub struct ClusterRemovalOptions {
    /// Name of this node in the cluster.
    pub node_name: String,

    /// Interval between shard relocation checks.
    pub poll_interval: Duration,
}

impl ClusterRemovalOptions {
    /// Default options for the node called `node_name`.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            poll_interval: DEFAULT_REMOVAL_POLL_INTERVAL,
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Outcome of a single removal check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalStatus {
    /// The node is not yet excluded from allocation, or the cluster could not
    /// be reached.
    Pending,

    /// Shards are still moving.
    Relocating(u32),

    /// All shards left and the process was stopped.
    Completed,
}

struct Inner<P, C> {
    allocation_check_running: AtomicBool,
    allocation_exclude_checked: AtomicBool,
    client: Arc<C>,
    exclude_acknowledged: AtomicBool,
    node_name: String,
    poll_interval: Duration,
    poller: Mutex<Option<CancellationToken>>,
    process: Weak<P>,
    removal_completed: AtomicBool,
    runtime: Handle,
    settings_lock: tokio::sync::Mutex<()>,
}

/// Drains a node's shards before the node is shut down.
///
/// On [`ProcessEvent::ProcessRemove`] the node is appended to the cluster's
/// allocation exclusion list and the cluster is polled until no shards are
/// relocating. The process is then stopped, exactly once.
///
/// When the node becomes available it clears any exclusion of itself left
/// over from an earlier removal so it can hold shards again.
pub struct ClusterRemovalTracer<P, C> {
    inner: Arc<Inner<P, C>>,
}

impl<P: ManagedProcess, C: ClusterClient> ClusterRemovalTracer<P, C> {
    /// Creates a tracer bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside of a tokio runtime.
    pub fn new(
        process: &Arc<P>,
        client: Arc<C>,
        ClusterRemovalOptions {
            node_name,
            poll_interval,
        }: ClusterRemovalOptions,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                allocation_check_running: AtomicBool::new(false),
                allocation_exclude_checked: AtomicBool::new(false),
                client,
                exclude_acknowledged: AtomicBool::new(false),
                node_name,
                poll_interval,
                poller: Mutex::new(None),
                process: Arc::downgrade(process),
                removal_completed: AtomicBool::new(false),
                runtime: Handle::try_current()?,
                settings_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Name of the node being managed.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    /// Whether stale exclusions have been checked since the last removal.
    #[must_use]
    pub fn allocation_exclude_checked(&self) -> bool {
        self.inner.allocation_exclude_checked.load(Ordering::SeqCst)
    }

    /// Whether the removal poll is scheduled.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.poller.lock().is_some()
    }

    /// Whether the last removal finished and stopped the process.
    #[must_use]
    pub fn is_removal_completed(&self) -> bool {
        self.inner.removal_completed.load(Ordering::SeqCst)
    }

    /// Removes this node from the allocation exclusion list if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster could not be read or did not
    /// acknowledge the update. A failed read is retried the next time the
    /// node becomes available.
    pub async fn check_allocation_enabled_status(&self) -> Result<()> {
        self.inner.check_allocation_enabled_status().await
    }

    /// Adds this node to the allocation exclusion list.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster could not be reached or did not
    /// acknowledge the update.
    pub async fn exclude_node(&self) -> Result<()> {
        self.inner.exclude_node().await
    }

    /// Runs one removal check, stopping the process once no shards are
    /// relocating.
    ///
    /// Does nothing and returns [`RemovalStatus::Pending`] unless a removal
    /// is in progress.
    pub async fn check_removal_status(&self) -> RemovalStatus {
        if !self.is_polling() && !self.is_removal_completed() {
            debug!(node = %self.inner.node_name, "no removal in progress");
            return RemovalStatus::Pending;
        }
        self.inner.check_removal_status().await
    }
}

impl<P: ManagedProcess, C: ClusterClient> Inner<P, C> {
    async fn check_allocation_enabled_status(&self) -> Result<()> {
        let _guard = self.settings_lock.lock().await;

        if self.poller.lock().is_some() {
            debug!("removal in progress, keeping allocation exclusion");
            return Ok(());
        }

        let current = self.client.allocation_exclude().await?;
        self.allocation_exclude_checked.store(true, Ordering::SeqCst);

        let mut nodes = ExcludedNodes::parse(current.as_deref());
        if nodes.remove(&self.node_name) {
            info!(
                node = %self.node_name,
                "node still excluded from shard allocation, re-enabling"
            );

            let acknowledged = match nodes.to_setting() {
                Some(remaining) => self.client.set_allocation_exclude(&remaining).await?,
                None => self.client.clear_allocation_exclude().await?,
            };
            if !acknowledged.acknowledged {
                return Err(Error::NotAcknowledged(ALLOCATION_EXCLUDE_SETTING));
            }
        }

        Ok(())
    }

    async fn exclude_node(&self) -> Result<()> {
        let _guard = self.settings_lock.lock().await;

        let current = self.client.allocation_exclude().await?;
        let mut nodes = ExcludedNodes::parse(current.as_deref());

        if nodes.insert(&self.node_name) {
            let setting = nodes.to_setting().unwrap_or_else(|| self.node_name.clone());
            let acknowledged = self.client.set_allocation_exclude(&setting).await?;
            if !acknowledged.acknowledged {
                return Err(Error::NotAcknowledged(ALLOCATION_EXCLUDE_SETTING));
            }
            info!(node = %self.node_name, "excluded node from shard allocation");
        } else {
            debug!(node = %self.node_name, "node already excluded from shard allocation");
        }

        self.exclude_acknowledged.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn check_removal_status(&self) -> RemovalStatus {
        if self.removal_completed.load(Ordering::SeqCst) {
            return RemovalStatus::Completed;
        }

        if !self.exclude_acknowledged.load(Ordering::SeqCst) {
            if let Err(err) = self.exclude_node().await {
                warn!("failed to exclude node from shard allocation, retrying: {}", err);
                return RemovalStatus::Pending;
            }
        }

        match self.client.cluster_health().await {
            Ok(health) if health.relocating_shards > 0 => {
                info!(
                    relocating_shards = health.relocating_shards,
                    "waiting for shards to leave node"
                );
                RemovalStatus::Relocating(health.relocating_shards)
            }
            Ok(_) => {
                self.complete_removal().await;
                RemovalStatus::Completed
            }
            Err(err) => {
                warn!("failed to check shard relocation, retrying: {}", err);
                RemovalStatus::Pending
            }
        }
    }

    async fn complete_removal(&self) {
        if self.removal_completed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_polling();

        let Some(process) = self.process.upgrade() else {
            debug!("process dropped before removal completed");
            return;
        };

        info!(node = %self.node_name, "all shards relocated, stopping process");
        process.on_event(ProcessEvent::ProcessRemoved);
        process.stop().await;
    }

    fn cancel_polling(&self) -> bool {
        self.poller.lock().take().is_some_and(|token| {
            token.cancel();
            true
        })
    }
}

impl<P: ManagedProcess, C: ClusterClient> StateMachineTracer for ClusterRemovalTracer<P, C> {
    fn name(&self) -> &str {
        "cluster-removal"
    }

    fn transition(&self, event: ProcessEvent, _source: ProcessState, destination: ProcessState) {
        match (event, destination) {
            (ProcessEvent::ProcessRemove, ProcessState::Removing) => self.schedule_removal(),
            (ProcessEvent::ProcessStarted, _) | (_, ProcessState::Terminated) => {
                if self.inner.cancel_polling() && !self.is_removal_completed() {
                    warn!(node = %self.inner.node_name, "removal interrupted by {}", event);
                }
            }
            (_, ProcessState::Available) if !self.allocation_exclude_checked() => {
                self.spawn_allocation_check();
            }
            _ => {}
        }
    }
}

impl<P: ManagedProcess, C: ClusterClient> ClusterRemovalTracer<P, C> {
    fn schedule_removal(&self) {
        let token = {
            let mut poller = self.inner.poller.lock();
            if poller.is_some() {
                debug!("removal already scheduled");
                return;
            }
            let token = CancellationToken::new();
            *poller = Some(token.clone());
            token
        };

        self.inner.allocation_exclude_checked.store(false, Ordering::SeqCst);
        self.inner.exclude_acknowledged.store(false, Ordering::SeqCst);
        self.inner.removal_completed.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        info!(
            node = %inner.node_name,
            interval = ?inner.poll_interval,
            "removing node from cluster"
        );

        self.inner.runtime.spawn(async move {
            if let Err(err) = inner.exclude_node().await {
                warn!("failed to exclude node from shard allocation, retrying: {}", err);
            }

            let mut ticker = tokio::time::interval_at(
                Instant::now() + inner.poll_interval,
                inner.poll_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if inner.check_removal_status().await == RemovalStatus::Completed {
                    break;
                }
            }

            debug!("removal poll finished");
        });
    }

    fn spawn_allocation_check(&self) {
        if self
            .inner
            .allocation_check_running
            .swap(true, Ordering::SeqCst)
        {
            return;
        }

        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            if let Err(err) = inner.check_allocation_enabled_status().await {
                warn!("failed to check allocation exclusion: {}", err);
            }
            inner
                .allocation_check_running
                .store(false, Ordering::SeqCst);
        });
    }
}

impl<P, C> std::fmt::Debug for ClusterRemovalTracer<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRemovalTracer")
            .field("node_name", &self.inner.node_name)
            .field("poll_interval", &self.inner.poll_interval)
            .field(
                "allocation_exclude_checked",
                &self.inner.allocation_exclude_checked.load(Ordering::SeqCst),
            )
            .field("polling", &self.inner.poller.lock().is_some())
            .finish_non_exhaustive()
    }
}
