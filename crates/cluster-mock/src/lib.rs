//! In-memory implementation of the cluster administrative API for testing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::sync::Arc;

use async_trait::async_trait;
use datanode_cluster::{Acknowledged, ClusterClient, ClusterHealth, Error, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Calls received by a [`MockClusterClient`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// Number of exclusion reads.
    pub allocation_exclude: usize,

    /// Values passed to every exclusion write, in order.
    pub set_allocation_exclude: Vec<String>,

    /// Number of exclusion clears.
    pub clear_allocation_exclude: usize,

    /// Number of health reads.
    pub cluster_health: usize,
}

impl MockCalls {
    /// Number of setting updates, sets and clears combined.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.set_allocation_exclude.len() + self.clear_allocation_exclude
    }
}

#[derive(Debug)]
struct MockState {
    acknowledge: bool,
    calls: MockCalls,
    exclude: Option<String>,
    failures_remaining: usize,
    health: ClusterHealth,
    reachable: bool,
}

/// Mock cluster holding its settings and health in memory.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Clone, Debug)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClusterClient {
    /// Creates a reachable, green cluster with no exclusions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                acknowledge: true,
                calls: MockCalls::default(),
                exclude: None,
                failures_remaining: 0,
                health: ClusterHealth {
                    cluster_name: "mock-cluster".to_string(),
                    number_of_nodes: 1,
                    number_of_data_nodes: 1,
                    ..ClusterHealth::default()
                },
                reachable: true,
            })),
        }
    }

    /// Current exclusion setting.
    #[must_use]
    pub fn excluded(&self) -> Option<String> {
        self.state.lock().exclude.clone()
    }

    /// Overwrites the exclusion setting without recording a call.
    pub fn set_excluded(&self, nodes: Option<&str>) {
        self.state.lock().exclude = nodes.map(ToString::to_string);
    }

    /// Sets the reported number of relocating shards.
    pub fn set_relocating_shards(&self, relocating_shards: u32) {
        self.state.lock().health.relocating_shards = relocating_shards;
    }

    /// Replaces the reported health.
    pub fn set_health(&self, health: ClusterHealth) {
        self.state.lock().health = health;
    }

    /// Makes every call fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Whether setting updates are acknowledged.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.lock().acknowledge = acknowledge;
    }

    /// Fails the next `count` calls of any kind.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_remaining = count;
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls.clone()
    }

    fn check_available(state: &mut MockState) -> Result<()> {
        if !state.reachable {
            return Err(Error::Unavailable("mock cluster is unreachable".to_string()));
        }

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(Error::Unavailable("mock cluster failure".to_string()));
        }

        Ok(())
    }

    fn acknowledgement(state: &MockState) -> Acknowledged {
        if state.acknowledge {
            Acknowledged::ACCEPTED
        } else {
            Acknowledged::REJECTED
        }
    }
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn allocation_exclude(&self) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.calls.allocation_exclude += 1;
        Self::check_available(&mut state)?;

        Ok(state.exclude.clone())
    }

    async fn set_allocation_exclude(&self, nodes: &str) -> Result<Acknowledged> {
        let mut state = self.state.lock();
        state.calls.set_allocation_exclude.push(nodes.to_string());
        Self::check_available(&mut state)?;

        if state.acknowledge {
            debug!("mock exclude set to {}", nodes);
            state.exclude = Some(nodes.to_string());
        }

        Ok(Self::acknowledgement(&state))
    }

    async fn clear_allocation_exclude(&self) -> Result<Acknowledged> {
        let mut state = self.state.lock();
        state.calls.clear_allocation_exclude += 1;
        Self::check_available(&mut state)?;

        if state.acknowledge {
            debug!("mock exclude cleared");
            state.exclude = None;
        }

        Ok(Self::acknowledgement(&state))
    }

    async fn cluster_health(&self) -> Result<ClusterHealth> {
        let mut state = self.state.lock();
        state.calls.cluster_health += 1;
        Self::check_available(&mut state)?;

        Ok(state.health.clone())
    }
}
