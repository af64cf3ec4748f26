//! Metric emission.
//!
//! The maintainer reports through the narrow [`MetricSink`] contract so that
//! embedders can route gauges wherever they like; [`PrometheusMetricSink`]
//! is the default backing.

use once_cell::sync::Lazy;
use prometheus::{register_int_gauge, IntGauge};
use tracing::debug;

/// Gauge: hosts whose children's summed demand exceeds their envelope.
pub const OVERCOMMITTED_HOSTS: &str = "overcommittedHosts";
/// Gauge: hosts the fleet can lose before some tenant becomes unplaceable.
pub const SPARE_HOST_CAPACITY: &str = "spareHostCapacity";

pub trait MetricSink: Send + Sync {
    fn set(&self, name: &str, value: i64);
}

static OVERCOMMITTED_HOSTS_GAUGE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        OVERCOMMITTED_HOSTS,
        "Number of hosts whose children's summed demand exceeds their envelope"
    )
    .expect("failed to define a metric")
});

static SPARE_HOST_CAPACITY_GAUGE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        SPARE_HOST_CAPACITY,
        "Number of hosts the fleet can lose before some tenant becomes unplaceable"
    )
    .expect("failed to define a metric")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetricSink;

impl MetricSink for PrometheusMetricSink {
    fn set(&self, name: &str, value: i64) {
        match name {
            OVERCOMMITTED_HOSTS => OVERCOMMITTED_HOSTS_GAUGE.set(value),
            SPARE_HOST_CAPACITY => SPARE_HOST_CAPACITY_GAUGE.set(value),
            other => debug!(name = other, "ignoring unknown metric"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_gauges_are_set() {
        let sink = PrometheusMetricSink;
        sink.set(OVERCOMMITTED_HOSTS, 3);
        sink.set(SPARE_HOST_CAPACITY, 1);
        assert_eq!(OVERCOMMITTED_HOSTS_GAUGE.get(), 3);
        assert_eq!(SPARE_HOST_CAPACITY_GAUGE.get(), 1);
    }

    #[test]
    fn unknown_names_are_ignored() {
        PrometheusMetricSink.set("notAGauge", 42);
    }
}
