//! Spare-capacity maintenance for a fleet of shared tenant hosts.
//!
//! The crate answers two questions about a fleet snapshot: can the fleet
//! still absorb the loss of any single host ([`checker`]), and if not, what
//! is the shortest chain of tenant relocations that restores the margin
//! ([`solver`])? The [`maintainer`] module ties both into a periodic control
//! loop that dispatches the first move of a mitigation and reports gauges.

pub mod checker;
pub mod config;
pub mod maintainer;
pub mod metrics;
pub mod solver;
pub mod subset;

pub use checker::{CapacityChecker, HostFailurePath};
pub use config::SpareCapacityConfig;
pub use maintainer::{
    Deployer, MaintenanceError, MoveOutcome, Relocation, SnapshotProvider,
    SpareCapacityMaintainer, TickOutcome, TickSummary,
};
pub use metrics::{MetricSink, PrometheusMetricSink};
pub use solver::{CapacitySolver, Move};
pub use subset::SubsetEnumerator;
