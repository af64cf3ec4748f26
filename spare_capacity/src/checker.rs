//! Worst-case host-loss analysis.
//!
//! The checker answers one question per tick: which host's loss is the first
//! to strand a tenant, and how many losses does the fleet absorb before that
//! happens? Losses are simulated greedily: a removed host's tenants are
//! reassigned, largest first, each to the remaining host with the most free
//! capacity that can take it. The simulation then keeps removing whichever
//! remaining host would be most damaging until some tenant has nowhere to
//! go. The shortest failure sequence over all starting hosts is the fleet's
//! worst case; its length minus one is the slack the maintainer reports.

use fleet_model::{FleetSnapshot, HostCapacity, HostId, NodeState, Resources, TenantId};
use tracing::debug;

/// The hosts whose simultaneous loss first creates an unplaceable tenant, in
/// the order they would fail, together with that tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailurePath {
    pub hosts_causing_failure: Vec<HostId>,
    pub offending_tenant: Option<TenantId>,
}

pub struct CapacityChecker<'a> {
    snapshot: &'a FleetSnapshot,
    capacity: HostCapacity<'a>,
}

impl<'a> CapacityChecker<'a> {
    pub fn new(snapshot: &'a FleetSnapshot) -> Self {
        CapacityChecker {
            snapshot,
            capacity: HostCapacity::new(snapshot),
        }
    }

    /// Hosts whose children's summed demand exceeds the envelope on some
    /// scalar axis. An anomaly worth reporting, not an error.
    pub fn overcommitted_hosts(&self) -> Vec<HostId> {
        self.snapshot
            .hosts()
            .filter(|host| {
                let used = self.capacity.used_capacity_of(host.id);
                used.cpu > host.resources.cpu
                    || used.memory_gb > host.resources.memory_gb
                    || used.disk_gb > host.resources.disk_gb
                    || used.bandwidth_gbps > host.resources.bandwidth_gbps
                    || used.gpu > host.resources.gpu
            })
            .map(|host| host.id)
            .collect()
    }

    /// The shortest failure path over all starting hosts, or `None` if the
    /// fleet absorbs any sequence of losses (no tenant is ever stranded).
    pub fn worst_case_host_loss_leading_to_failure(&self) -> Option<HostFailurePath> {
        let mut starts: Vec<HostId> = self
            .snapshot
            .hosts()
            .filter(|h| h.state == NodeState::Active)
            .map(|h| h.id)
            .collect();
        starts.sort_by(|a, b| {
            self.capacity
                .free_capacity_of(*b)
                .cmp_size(&self.capacity.free_capacity_of(*a))
                .then_with(|| {
                    self.snapshot
                        .host(*a)
                        .hostname
                        .cmp(&self.snapshot.host(*b).hostname)
                })
        });

        let mut shortest: Option<HostFailurePath> = None;
        for start in starts {
            let Some(path) = self.failure_path_from(start) else {
                continue;
            };
            debug!(
                start = %self.snapshot.host(start).hostname,
                length = path.hosts_causing_failure.len(),
                "failure path found"
            );
            let is_shorter = shortest.as_ref().map_or(true, |s| {
                path.hosts_causing_failure.len() < s.hosts_causing_failure.len()
            });
            if is_shorter {
                let done = path.hosts_causing_failure.len() == 1;
                shortest = Some(path);
                if done {
                    break;
                }
            }
        }
        shortest
    }

    fn failure_path_from(&self, start: HostId) -> Option<HostFailurePath> {
        let mut sim = RemovalSim::new(self.snapshot, self.capacity);
        let mut path = vec![start];
        let mut unplaced = sim.remove_host(start);

        while unplaced.is_empty() {
            let Some(next) = self.most_damaging_host(&sim) else {
                // every host could be removed without stranding anyone
                return None;
            };
            path.push(next);
            unplaced = sim.remove_host(next);
        }

        Some(HostFailurePath {
            hosts_causing_failure: path,
            offending_tenant: Some(unplaced[0]),
        })
    }

    /// The remaining host whose loss would strand the most tenants, ties
    /// broken by descending summed tenant size, then hostname ascending.
    fn most_damaging_host(&self, sim: &RemovalSim<'a>) -> Option<HostId> {
        let mut best: Option<(usize, Resources, HostId)> = None;
        for host in self.snapshot.hosts() {
            if host.state != NodeState::Active || sim.is_removed(host.id) {
                continue;
            }
            let stranded = sim.clone().remove_host(host.id).len();
            let size = sum_sizes(
                sim.tenants_of(host.id)
                    .iter()
                    .map(|t| self.snapshot.tenant(*t).resources),
            );
            let better = match &best {
                None => true,
                Some((best_stranded, best_size, _)) => {
                    stranded > *best_stranded
                        || (stranded == *best_stranded
                            && size.cmp_size(best_size) == std::cmp::Ordering::Greater)
                }
            };
            // hosts iterate hostname-ascending, so ties keep the earlier one
            if better {
                best = Some((stranded, size, host.id));
            }
        }
        best.map(|(_, _, host)| host)
    }
}

/// Scalar sum of a set of demands, for ranking only.
fn sum_sizes(resources: impl Iterator<Item = Resources>) -> Resources {
    let mut total = Resources::new(0.0, 0.0, 0.0, 0.0);
    for r in resources {
        total.cpu += r.cpu;
        total.memory_gb += r.memory_gb;
        total.disk_gb += r.disk_gb;
        total.bandwidth_gbps += r.bandwidth_gbps;
        total.gpu += r.gpu;
    }
    total
}

/// Mutable what-if state for a sequence of host removals.
#[derive(Clone)]
struct RemovalSim<'a> {
    snapshot: &'a FleetSnapshot,
    free: Vec<Resources>,
    /// Tenants relocated onto each host during the simulation.
    assigned: Vec<Vec<TenantId>>,
    removed: Vec<bool>,
}

impl<'a> RemovalSim<'a> {
    fn new(snapshot: &'a FleetSnapshot, capacity: HostCapacity<'a>) -> Self {
        RemovalSim {
            snapshot,
            free: snapshot
                .hosts()
                .map(|h| capacity.free_capacity_of(h.id))
                .collect(),
            assigned: vec![Vec::new(); snapshot.host_count()],
            removed: vec![false; snapshot.host_count()],
        }
    }

    fn is_removed(&self, host: HostId) -> bool {
        self.removed[host.0 as usize]
    }

    /// All tenants currently on `host`: its snapshot children plus anything
    /// relocated here, descending size then hostname.
    fn tenants_of(&self, host: HostId) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .snapshot
            .children(host)
            .iter()
            .copied()
            .chain(self.assigned[host.0 as usize].iter().copied())
            .collect();
        tenants.sort_by(|a, b| {
            let ta = self.snapshot.tenant(*a);
            let tb = self.snapshot.tenant(*b);
            tb.resources
                .cmp_size(&ta.resources)
                .then_with(|| ta.hostname.cmp(&tb.hostname))
        });
        tenants
    }

    /// Remove `host` and reassign its tenants. Returns the tenants that
    /// could not be placed anywhere, in processing order.
    fn remove_host(&mut self, host: HostId) -> Vec<TenantId> {
        self.removed[host.0 as usize] = true;
        let mut unplaced = Vec::new();
        for tenant in self.tenants_of(host) {
            if !self.place(tenant) {
                unplaced.push(tenant);
            }
        }
        unplaced
    }

    /// Place one tenant on the active host with the most free capacity that
    /// satisfies it, ties by hostname ascending.
    fn place(&mut self, tenant: TenantId) -> bool {
        let required = self.snapshot.tenant(tenant).resources;
        let mut best: Option<HostId> = None;
        for host in self.snapshot.hosts() {
            if host.state != NodeState::Active || self.is_removed(host.id) {
                continue;
            }
            let free = &self.free[host.id.0 as usize];
            if !free.satisfies(&required) {
                continue;
            }
            // hosts iterate hostname-ascending, so ties keep the earlier one
            let better = match best {
                None => true,
                Some(b) => {
                    free.cmp_size(&self.free[b.0 as usize]) == std::cmp::Ordering::Greater
                }
            };
            if better {
                best = Some(host.id);
            }
        }
        let Some(target) = best else {
            return false;
        };
        self.free[target.0 as usize] = self.free[target.0 as usize]
            .subtract(&required)
            .expect("placement target satisfied the tenant's demand");
        self.assigned[target.0 as usize].push(tenant);
        true
    }
}
