//! Maintainer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpareCapacityConfig {
    /// Delay between maintenance ticks.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Solver iteration budget per top-level `make_room_for` call.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    /// How many co-tenants of a host the solver may disturb in a single
    /// displacement step.
    #[serde(default = "default_max_eviction_subset_size")]
    pub max_eviction_subset_size: usize,
    /// Cap on the tenant list fed to subset enumeration.
    #[serde(default = "default_max_considered_nodes")]
    pub max_considered_nodes: usize,
    /// Whether the surrounding cloud permits shared hosts at all. When it
    /// does not, a tick has nothing to maintain and returns immediately.
    #[serde(default = "default_shared_hosting")]
    pub shared_hosting: bool,
}

fn default_max_iterations() -> u64 {
    10_000
}

fn default_max_eviction_subset_size() -> usize {
    5
}

fn default_max_considered_nodes() -> usize {
    31
}

fn default_shared_hosting() -> bool {
    true
}

impl SpareCapacityConfig {
    pub fn new(period: Duration) -> Self {
        SpareCapacityConfig {
            period,
            max_iterations: default_max_iterations(),
            max_eviction_subset_size: default_max_eviction_subset_size(),
            max_considered_nodes: default_max_considered_nodes(),
            shared_hosting: default_shared_hosting(),
        }
    }
}
