//! The spare-capacity maintenance loop.
//!
//! # Mechanics
//!
//! [`SpareCapacityMaintainer::run`] drives a periodic tick at a configurable
//! `period`. Each tick pulls a fresh fleet snapshot, runs the worst-case
//! host-loss analysis, and reports two gauges: the number of overcommitted
//! hosts and the fleet's spare host capacity (how many hosts can be lost
//! before some tenant becomes unplaceable).
//!
//! # Mitigation
//!
//! When the analysis finds a host whose loss would strand a tenant right away
//! (zero slack), the tick asks the relocation solver for the shortest chain
//! of tenant moves that frees one of the two best spare hosts for that
//! tenant, and dispatches only the first move of the chain through the
//! deployer. The next tick re-evaluates from scratch against a fresh
//! snapshot, so a multi-move chain completes one move per tick and a failed
//! dispatch retries naturally.
//!
//! While a dispatched move is under way (or when the chain's first tenant is
//! already marked retired, meaning a relocation is in flight), the slack
//! gauge is reported as 1 rather than 0. The mitigation's eventual success
//! has not been observed at that point; reporting 1 anyway suppresses
//! alerting on a condition that is already being handled.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_model::{
    FleetSnapshot, HostCapacity, HostId, NodeRecord, NodeState, SnapshotError, TenantId,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::checker::{CapacityChecker, HostFailurePath};
use crate::config::SpareCapacityConfig;
use crate::metrics::{MetricSink, OVERCOMMITTED_HOSTS, SPARE_HOST_CAPACITY};
use crate::solver::{CapacitySolver, Move};

#[derive(thiserror::Error, Debug)]
pub enum MaintenanceError {
    #[error("fleet snapshot unavailable")]
    SnapshotUnavailable(#[source] anyhow::Error),
    #[error("fleet snapshot violates preconditions")]
    PreconditionViolated(#[from] SnapshotError),
}

/// Supplies the fleet state a tick operates on.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// The current fleet as a flat node list. Called once per tick.
    async fn snapshot(&self) -> anyhow::Result<Vec<NodeRecord>>;
}

/// A tenant relocation, addressed by hostname for the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub tenant: String,
    pub from_host: String,
    pub to_host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Done,
    InProgress,
    Refused,
}

/// Executes relocations on behalf of the maintainer.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn execute_move(
        &self,
        relocation: &Relocation,
        reason: &str,
    ) -> anyhow::Result<MoveOutcome>;
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The surrounding cloud does not share hosts; nothing to maintain.
    SharedHostingDisabled,
    Cancelled,
    Finished(TickSummary),
}

#[derive(Debug)]
pub struct TickSummary {
    pub overcommitted_hosts: usize,
    pub failure_path: Option<HostFailurePath>,
    /// The slack value emitted on the gauge, after any in-progress bump.
    /// `None` when the fleet absorbs every loss sequence.
    pub reported_slack: Option<i64>,
    pub dispatched_move: Option<Relocation>,
}

pub struct SpareCapacityMaintainer {
    config: SpareCapacityConfig,
    provider: Arc<dyn SnapshotProvider>,
    deployer: Arc<dyn Deployer>,
    metrics: Arc<dyn MetricSink>,
}

impl SpareCapacityMaintainer {
    pub fn new(
        config: SpareCapacityConfig,
        provider: Arc<dyn SnapshotProvider>,
        deployer: Arc<dyn Deployer>,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        SpareCapacityMaintainer {
            config,
            provider,
            deployer,
            metrics,
        }
    }

    /// Tick periodically until cancelled. Tick failures are logged and
    /// retried on the next period.
    pub async fn run(&self, cancel: CancellationToken) {
        scopeguard::defer! {
            info!("spare capacity maintenance finishing");
        };

        let mut iteration_no = 0;
        loop {
            iteration_no += 1;
            let start = Instant::now();

            async {
                match self.tick(&cancel).await {
                    Ok(outcome) => debug!(?outcome, "tick finished"),
                    Err(err @ MaintenanceError::PreconditionViolated(_)) => {
                        error!("tick failed: {:#}", anyhow::Error::new(err));
                    }
                    Err(err) => {
                        warn!("tick failed: {:#}", anyhow::Error::new(err));
                    }
                }
            }
            .instrument(tracing::info_span!("iteration", iteration_no))
            .await;

            let sleep_until = start + self.config.period;
            if tokio::time::timeout_at(sleep_until, cancel.cancelled())
                .await
                .is_ok()
            {
                break;
            }
        }
    }

    /// One maintenance pass over a fresh snapshot.
    ///
    /// All analysis happens before any effect: logs are written during the
    /// pass, the dispatch (if any) follows the analysis, and the gauges are
    /// emitted last, `overcommittedHosts` before `spareHostCapacity`. On
    /// cancellation nothing is dispatched and no gauge is emitted.
    #[instrument(skip_all)]
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickOutcome, MaintenanceError> {
        if !self.config.shared_hosting {
            return Ok(TickOutcome::SharedHostingDisabled);
        }

        let nodes = self
            .provider
            .snapshot()
            .await
            .map_err(MaintenanceError::SnapshotUnavailable)?;
        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }
        let snapshot = FleetSnapshot::build(nodes)?;

        let checker = CapacityChecker::new(&snapshot);
        let overcommitted = checker.overcommitted_hosts();
        if !overcommitted.is_empty() {
            let hostnames = overcommitted
                .iter()
                .map(|h| snapshot.host(*h).hostname.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(%hostnames, "hosts are overcommitted");
        }

        let failure_path = checker.worst_case_host_loss_leading_to_failure();
        let mut reported_slack = failure_path
            .as_ref()
            .map(|p| p.hosts_causing_failure.len() as i64 - 1);
        let mut dispatched_move = None;

        if reported_slack == Some(0) {
            let offending = failure_path
                .as_ref()
                .and_then(|path| path.offending_tenant);
            if let Some(offending) = offending {
                let mitigation = self.find_mitigation(&snapshot, offending);
                if cancel.is_cancelled() {
                    return Ok(TickOutcome::Cancelled);
                }
                if let Some(first) = mitigation.as_ref().and_then(|plan| plan.first()) {
                    dispatched_move = self.begin_move(&snapshot, first).await;
                    if dispatched_move.is_some() {
                        // the mitigation is under way; report the slack it
                        // will restore rather than alerting meanwhile
                        reported_slack = Some(1);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }
        self.metrics.set(OVERCOMMITTED_HOSTS, overcommitted.len() as i64);
        if let Some(slack) = reported_slack {
            self.metrics.set(SPARE_HOST_CAPACITY, slack);
        }

        Ok(TickOutcome::Finished(TickSummary {
            overcommitted_hosts: overcommitted.len(),
            failure_path,
            reported_slack,
            dispatched_move,
        }))
    }

    /// The shortest relocation chain freeing one of the two best spare hosts
    /// for the offending tenant.
    fn find_mitigation(&self, snapshot: &FleetSnapshot, offending: TenantId) -> Option<Vec<Move>> {
        let capacity = HostCapacity::new(snapshot);
        let tenant = snapshot.tenant(offending);
        let eligible: Vec<HostId> = snapshot
            .hosts()
            .filter(|h| {
                h.state == NodeState::Active
                    && h.id != tenant.parent
                    && h.resources.satisfies(&tenant.resources)
            })
            .map(|h| h.id)
            .collect();
        let spares = capacity.find_spare_hosts(&eligible, 2);
        if spares.is_empty() {
            info!(tenant = %tenant.hostname, "no host is eligible to absorb the tenant");
            return None;
        }
        let candidates: Vec<HostId> = snapshot
            .hosts()
            .filter(|h| h.state == NodeState::Active && !spares.contains(&h.id))
            .map(|h| h.id)
            .collect();

        let mut best: Option<Vec<Move>> = None;
        let mut budget_exhausted = false;
        for spare in spares {
            let mut solver = CapacitySolver::new(snapshot, &self.config);
            let plan = solver.make_room_for(offending, spare, &candidates);
            budget_exhausted |= solver.budget_exhausted();
            debug!(
                tenant = %tenant.hostname,
                spare = %snapshot.host(spare).hostname,
                iterations = solver.iterations(),
                plan_len = plan.as_ref().map(|p| p.len()),
                "searched for mitigation"
            );
            if let Some(plan) = plan {
                if best.as_ref().map_or(true, |b| plan.len() < b.len()) {
                    best = Some(plan);
                }
            }
        }
        if best.is_none() {
            if budget_exhausted {
                info!(
                    tenant = %tenant.hostname,
                    "relocation search budget exhausted before a mitigation was found"
                );
            } else {
                info!(tenant = %tenant.hostname, "no mitigation exists");
            }
        }
        best
    }

    /// Dispatch the first move of a mitigation. Returns the relocation if the
    /// mitigation is now considered under way.
    async fn begin_move(&self, snapshot: &FleetSnapshot, mv: &Move) -> Option<Relocation> {
        let tenant = snapshot.tenant(mv.tenant);
        let relocation = Relocation {
            tenant: tenant.hostname.clone(),
            from_host: snapshot.host(mv.from).hostname.clone(),
            to_host: snapshot.host(mv.to).hostname.clone(),
        };
        if tenant.retired {
            info!(tenant = %relocation.tenant, "relocation already in progress");
            return Some(relocation);
        }
        match self
            .deployer
            .execute_move(&relocation, "restore spare host capacity")
            .await
        {
            Ok(MoveOutcome::Done) | Ok(MoveOutcome::InProgress) => {
                info!(
                    tenant = %relocation.tenant,
                    from = %relocation.from_host,
                    to = %relocation.to_host,
                    "relocation started"
                );
                Some(relocation)
            }
            Ok(MoveOutcome::Refused) => {
                info!(tenant = %relocation.tenant, "deployer refused the relocation");
                None
            }
            Err(err) => {
                warn!(tenant = %relocation.tenant, "deployer failed: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_model::Resources;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticFleet(Vec<NodeRecord>);

    #[async_trait]
    impl SnapshotProvider for StaticFleet {
        async fn snapshot(&self) -> anyhow::Result<Vec<NodeRecord>> {
            Ok(self.0.clone())
        }
    }

    struct UnavailableFleet;

    #[async_trait]
    impl SnapshotProvider for UnavailableFleet {
        async fn snapshot(&self) -> anyhow::Result<Vec<NodeRecord>> {
            anyhow::bail!("fleet registry is down")
        }
    }

    struct RecordingDeployer {
        outcome: MoveOutcome,
        calls: Mutex<Vec<(Relocation, String)>>,
    }

    impl RecordingDeployer {
        fn new(outcome: MoveOutcome) -> Self {
            RecordingDeployer {
                outcome,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Relocation, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Deployer for RecordingDeployer {
        async fn execute_move(
            &self,
            relocation: &Relocation,
            reason: &str,
        ) -> anyhow::Result<MoveOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((relocation.clone(), reason.to_string()));
            Ok(self.outcome)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        values: Mutex<Vec<(String, i64)>>,
    }

    impl RecordingSink {
        fn values(&self) -> Vec<(String, i64)> {
            self.values.lock().unwrap().clone()
        }
    }

    impl MetricSink for RecordingSink {
        fn set(&self, name: &str, value: i64) {
            self.values.lock().unwrap().push((name.to_string(), value));
        }
    }

    fn host_res(cpu: f64, memory_gb: f64) -> Resources {
        Resources::new(cpu, memory_gb, 1000.0, 10.0)
    }

    fn tenant_res(cpu: f64, memory_gb: f64) -> Resources {
        Resources::new(cpu, memory_gb, 100.0, 1.0)
    }

    fn maintainer_over(
        provider: impl SnapshotProvider + 'static,
        outcome: MoveOutcome,
    ) -> (
        SpareCapacityMaintainer,
        Arc<RecordingDeployer>,
        Arc<RecordingSink>,
    ) {
        let deployer = Arc::new(RecordingDeployer::new(outcome));
        let sink = Arc::new(RecordingSink::default());
        let maintainer = SpareCapacityMaintainer::new(
            SpareCapacityConfig::new(Duration::from_secs(60)),
            Arc::new(provider),
            deployer.clone(),
            sink.clone(),
        );
        (maintainer, deployer, sink)
    }

    /// Four identical hosts, one half-size tenant each: two losses are
    /// absorbable, the third strands someone.
    fn safe_fleet() -> Vec<NodeRecord> {
        vec![
            NodeRecord::host("host-a", host_res(8.0, 16.0)),
            NodeRecord::host("host-b", host_res(8.0, 16.0)),
            NodeRecord::host("host-c", host_res(8.0, 16.0)),
            NodeRecord::host("host-d", host_res(8.0, 16.0)),
            NodeRecord::tenant("tenant-a", tenant_res(4.0, 8.0), "host-a"),
            NodeRecord::tenant("tenant-b", tenant_res(4.0, 8.0), "host-b"),
            NodeRecord::tenant("tenant-c", tenant_res(4.0, 8.0), "host-c"),
            NodeRecord::tenant("tenant-d", tenant_res(4.0, 8.0), "host-d"),
        ]
    }

    /// host-d's 8/16 tenant has nowhere to go if host-d is lost; evicting one
    /// 4/8 tenant from a spare host fixes that in one move.
    fn tight_fleet() -> Vec<NodeRecord> {
        vec![
            NodeRecord::host("host-a", host_res(8.0, 16.0)),
            NodeRecord::host("host-b", host_res(8.0, 16.0)),
            NodeRecord::host("host-c", host_res(8.0, 16.0)),
            NodeRecord::host("host-d", host_res(16.0, 32.0)),
            NodeRecord::tenant("tenant-a", tenant_res(4.0, 8.0), "host-a"),
            NodeRecord::tenant("tenant-b", tenant_res(4.0, 8.0), "host-b"),
            NodeRecord::tenant("tenant-c", tenant_res(4.0, 8.0), "host-c"),
            NodeRecord::tenant("tenant-d", tenant_res(8.0, 16.0), "host-d"),
        ]
    }

    #[tokio::test]
    async fn safe_fleet_reports_slack_without_dispatching() {
        let (maintainer, deployer, sink) =
            maintainer_over(StaticFleet(safe_fleet()), MoveOutcome::Done);

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();

        let TickOutcome::Finished(summary) = outcome else {
            panic!("expected a finished tick, got {outcome:?}");
        };
        assert_eq!(summary.reported_slack, Some(2));
        assert!(summary.dispatched_move.is_none());
        assert!(deployer.calls().is_empty());
        assert_eq!(
            sink.values(),
            vec![
                (OVERCOMMITTED_HOSTS.to_string(), 0),
                (SPARE_HOST_CAPACITY.to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn zero_slack_dispatches_first_move_and_bumps_the_gauge() {
        let (maintainer, deployer, sink) =
            maintainer_over(StaticFleet(tight_fleet()), MoveOutcome::Done);

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();

        let TickOutcome::Finished(summary) = outcome else {
            panic!("expected a finished tick, got {outcome:?}");
        };
        let expected = Relocation {
            tenant: "tenant-a".to_string(),
            from_host: "host-a".to_string(),
            to_host: "host-c".to_string(),
        };
        assert_eq!(summary.dispatched_move, Some(expected.clone()));
        assert_eq!(summary.reported_slack, Some(1));

        let calls = deployer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, expected);
        assert_eq!(calls[0].1, "restore spare host capacity");
        assert_eq!(
            sink.values(),
            vec![
                (OVERCOMMITTED_HOSTS.to_string(), 0),
                (SPARE_HOST_CAPACITY.to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn refused_dispatch_keeps_slack_at_zero() {
        let (maintainer, deployer, sink) =
            maintainer_over(StaticFleet(tight_fleet()), MoveOutcome::Refused);

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();

        let TickOutcome::Finished(summary) = outcome else {
            panic!("expected a finished tick, got {outcome:?}");
        };
        assert!(summary.dispatched_move.is_none());
        assert_eq!(summary.reported_slack, Some(0));
        assert_eq!(deployer.calls().len(), 1);
        assert_eq!(
            sink.values(),
            vec![
                (OVERCOMMITTED_HOSTS.to_string(), 0),
                (SPARE_HOST_CAPACITY.to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn retired_tenant_counts_as_relocation_in_progress() {
        let mut nodes = tight_fleet();
        // tenant-a is the first move of the mitigation; mark it retired
        let tenant_a = nodes
            .iter_mut()
            .find(|n| n.hostname == "tenant-a")
            .unwrap();
        tenant_a.retired = true;

        let (maintainer, deployer, sink) =
            maintainer_over(StaticFleet(nodes), MoveOutcome::Done);

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();

        let TickOutcome::Finished(summary) = outcome else {
            panic!("expected a finished tick, got {outcome:?}");
        };
        assert_eq!(summary.reported_slack, Some(1));
        assert!(summary.dispatched_move.is_some());
        // the in-flight relocation is not re-dispatched
        assert!(deployer.calls().is_empty());
        assert_eq!(
            sink.values(),
            vec![
                (OVERCOMMITTED_HOSTS.to_string(), 0),
                (SPARE_HOST_CAPACITY.to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn overcommitted_hosts_are_counted() {
        let nodes = vec![
            NodeRecord::host("host-a", host_res(8.0, 16.0)),
            NodeRecord::host("host-b", host_res(8.0, 16.0)),
            NodeRecord::tenant("tenant-a1", tenant_res(6.0, 12.0), "host-a"),
            NodeRecord::tenant("tenant-a2", tenant_res(6.0, 12.0), "host-a"),
            NodeRecord::tenant("tenant-b1", tenant_res(4.0, 8.0), "host-b"),
        ];
        let (maintainer, _deployer, sink) =
            maintainer_over(StaticFleet(nodes), MoveOutcome::Done);

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();

        let TickOutcome::Finished(summary) = outcome else {
            panic!("expected a finished tick, got {outcome:?}");
        };
        assert_eq!(summary.overcommitted_hosts, 1);
        // the fleet cannot absorb any host loss, and no mitigation exists
        assert_eq!(summary.reported_slack, Some(0));
        assert_eq!(
            sink.values(),
            vec![
                (OVERCOMMITTED_HOSTS.to_string(), 1),
                (SPARE_HOST_CAPACITY.to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn disabled_shared_hosting_short_circuits() {
        let deployer = Arc::new(RecordingDeployer::new(MoveOutcome::Done));
        let sink = Arc::new(RecordingSink::default());
        let mut config = SpareCapacityConfig::new(Duration::from_secs(60));
        config.shared_hosting = false;
        let maintainer = SpareCapacityMaintainer::new(
            config,
            Arc::new(UnavailableFleet),
            deployer.clone(),
            sink.clone(),
        );

        let outcome = maintainer.tick(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, TickOutcome::SharedHostingDisabled));
        assert!(sink.values().is_empty());
    }

    #[tokio::test]
    async fn unavailable_snapshot_aborts_without_metrics() {
        let (maintainer, deployer, sink) =
            maintainer_over(UnavailableFleet, MoveOutcome::Done);

        let err = maintainer
            .tick(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::SnapshotUnavailable(_)));
        assert!(sink.values().is_empty());
        assert!(deployer.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_snapshot_aborts_without_metrics() {
        let nodes = vec![
            NodeRecord::host("host-a", host_res(8.0, 16.0)),
            NodeRecord::tenant("tenant-a", tenant_res(4.0, 8.0), "host-gone"),
        ];
        let (maintainer, _deployer, sink) =
            maintainer_over(StaticFleet(nodes), MoveOutcome::Done);

        let err = maintainer
            .tick(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::PreconditionViolated(_)));
        assert!(sink.values().is_empty());
    }

    #[tokio::test]
    async fn cancelled_tick_emits_nothing() {
        let (maintainer, deployer, sink) =
            maintainer_over(StaticFleet(tight_fleet()), MoveOutcome::Done);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = maintainer.tick(&cancel).await.unwrap();

        assert!(matches!(outcome, TickOutcome::Cancelled));
        assert!(sink.values().is_empty());
        assert!(deployer.calls().is_empty());
    }

    #[tokio::test]
    async fn identical_snapshots_produce_identical_ticks() {
        let (first, first_deployer, first_sink) =
            maintainer_over(StaticFleet(tight_fleet()), MoveOutcome::Done);
        let (second, second_deployer, second_sink) =
            maintainer_over(StaticFleet(tight_fleet()), MoveOutcome::Done);

        first.tick(&CancellationToken::new()).await.unwrap();
        second.tick(&CancellationToken::new()).await.unwrap();

        assert_eq!(first_sink.values(), second_sink.values());
        assert_eq!(first_deployer.calls(), second_deployer.calls());
    }

    #[tokio::test]
    async fn run_stops_once_cancelled() {
        let (maintainer, _deployer, sink) =
            maintainer_over(StaticFleet(safe_fleet()), MoveOutcome::Done);

        let cancel = CancellationToken::new();
        cancel.cancel();
        // one iteration runs (and emits nothing, being cancelled), then the
        // sleep resolves immediately and the loop exits
        maintainer.run(cancel).await;
        assert!(sink.values().is_empty());
    }
}
