use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Cluster setting listing node names excluded from shard allocation.
pub const ALLOCATION_EXCLUDE_SETTING: &str = "cluster.routing.allocation.exclude._name";

/// Acknowledgement returned by cluster settings updates.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Acknowledged {
    /// Whether the master node accepted the update.
    pub acknowledged: bool,
}

impl Acknowledged {
    /// An accepted update.
    pub const ACCEPTED: Self = Self { acknowledged: true };

    /// A rejected update.
    pub const REJECTED: Self = Self {
        acknowledged: false,
    };
}

/// Overall cluster health colour.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All shards are assigned.
    #[default]
    Green,

    /// All primaries are assigned, some replicas are not.
    Yellow,

    /// At least one primary is unassigned.
    Red,
}

/// Response of the cluster health endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClusterHealth {
    /// Name of the cluster.
    #[serde(default)]
    pub cluster_name: String,

    /// Health colour.
    pub status: HealthStatus,

    /// Whether the request timed out before the wanted status was reached.
    #[serde(default)]
    pub timed_out: bool,

    /// Number of nodes in the cluster.
    #[serde(default)]
    pub number_of_nodes: u32,

    /// Number of data nodes in the cluster.
    #[serde(default)]
    pub number_of_data_nodes: u32,

    /// Number of active shards.
    #[serde(default)]
    pub active_shards: u32,

    /// Number of shards currently moving between nodes.
    #[serde(default)]
    pub relocating_shards: u32,

    /// Number of shards being initialized.
    #[serde(default)]
    pub initializing_shards: u32,

    /// Number of unassigned shards.
    #[serde(default)]
    pub unassigned_shards: u32,
}

/// Response of the cluster settings endpoint with `flat_settings=true`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Settings surviving a full cluster restart.
    #[serde(default)]
    pub persistent: Map<String, Value>,

    /// Settings cleared on a full cluster restart.
    #[serde(default)]
    pub transient: Map<String, Value>,
}

impl ClusterSettings {
    /// Effective value of a setting. Transient settings take precedence.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.transient
            .get(key)
            .and_then(setting_value)
            .or_else(|| self.persistent.get(key).and_then(setting_value))
    }
}

fn setting_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(setting_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

/// Comma separated node list as stored in [`ALLOCATION_EXCLUDE_SETTING`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExcludedNodes(Vec<String>);

impl ExcludedNodes {
    /// Parses a setting value. Blank entries are dropped.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        Self(
            value
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string)
                .collect(),
        )
    }

    /// Whether `node` is excluded.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.0.iter().any(|name| name == node)
    }

    /// Adds `node`. Returns false if it was already present.
    pub fn insert(&mut self, node: &str) -> bool {
        if self.contains(node) {
            return false;
        }
        self.0.push(node.to_string());
        true
    }

    /// Removes `node`. Returns false if it was not present.
    pub fn remove(&mut self, node: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|name| name != node);
        self.0.len() != before
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The setting value, or `None` when nothing is excluded.
    #[must_use]
    pub fn to_setting(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.join(","))
        }
    }
}
