//! The relocation solver.
//!
//! Given a tenant that cannot be placed and a designated target host,
//! [`CapacitySolver::make_room_for`] searches for the shortest sequence of
//! tenant relocations that leaves the target with enough free capacity. A
//! relocation may itself require further relocations to make room at its own
//! destination, so the search is recursive: each candidate move re-enters the
//! solver with the moved tenant as the new "incoming" tenant.
//!
//! Three mechanisms keep the search finite and affordable:
//! - a memo table keyed by the full search position (tenant, target, moves
//!   considered, moves made), where a negative answer is cached as well;
//! - a cycle guard: a tenant may appear at most once as the moved tenant
//!   across the considered and made move lists;
//! - a global iteration budget per top-level call. Once the budget is spent,
//!   remaining branches resolve to "no solution" and nothing further is
//!   cached, but a solution found before exhaustion is still returned.

use std::collections::HashMap;

use fleet_model::{FleetSnapshot, HostCapacity, HostId, Resources, TenantId};
use tracing::trace;

use crate::config::SpareCapacityConfig;
use crate::subset::SubsetEnumerator;

/// Relocation of one tenant between two hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub tenant: TenantId,
    pub from: HostId,
    pub to: HostId,
}

/// A search position. The move lists are order-sensitive sequences; equal
/// positions are reached through different branch orders often enough that
/// memoising on the full position pays for itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SolutionKey {
    tenant: TenantId,
    target: HostId,
    considered: Vec<Move>,
    made: Vec<Move>,
}

pub struct CapacitySolver<'a> {
    snapshot: &'a FleetSnapshot,
    capacity: HostCapacity<'a>,
    max_iterations: u64,
    max_subset_size: usize,
    max_considered_nodes: usize,
    iterations: u64,
    exhausted: bool,
    solutions: HashMap<SolutionKey, Option<Vec<Move>>>,
}

impl<'a> CapacitySolver<'a> {
    pub fn new(snapshot: &'a FleetSnapshot, config: &SpareCapacityConfig) -> Self {
        CapacitySolver {
            snapshot,
            capacity: HostCapacity::new(snapshot),
            max_iterations: config.max_iterations,
            max_subset_size: config.max_eviction_subset_size,
            max_considered_nodes: config.max_considered_nodes,
            iterations: 0,
            exhausted: false,
            solutions: HashMap::new(),
        }
    }

    /// The shortest sequence of moves which, executed in order, leaves
    /// `target` with enough free capacity to host `tenant`, or `None` if no
    /// such sequence was found within the iteration budget.
    ///
    /// Every move relocates a tenant between hosts in `hosts`; no move lands
    /// on `target`, at any depth of the chain. An empty sequence means the
    /// target already has room.
    pub fn make_room_for(
        &mut self,
        tenant: TenantId,
        target: HostId,
        hosts: &[HostId],
    ) -> Option<Vec<Move>> {
        // a chain that parks a displaced tenant on `target` consumes the very
        // room it is freeing; bar the target as a destination outright
        let hosts: Vec<HostId> = hosts.iter().copied().filter(|&h| h != target).collect();
        self.solve(tenant, target, &hosts, &[], &[])
    }

    /// Recursive invocations performed so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Whether the iteration budget was spent. A `None` result with the
    /// budget exhausted means "not found", not "proven impossible".
    pub fn budget_exhausted(&self) -> bool {
        self.exhausted
    }

    fn solve(
        &mut self,
        tenant: TenantId,
        target: HostId,
        hosts: &[HostId],
        considered: &[Move],
        made: &[Move],
    ) -> Option<Vec<Move>> {
        let key = SolutionKey {
            tenant,
            target,
            considered: considered.to_vec(),
            made: made.to_vec(),
        };
        if let Some(solution) = self.solutions.get(&key) {
            return solution.clone();
        }
        let solution = self.find_room_for(tenant, target, hosts, considered, made);
        // an answer computed with a spent budget reflects the cutoff, not the
        // search space, and must not poison the cache
        if !self.budget_exhausted() {
            self.solutions.insert(key, solution.clone());
        }
        solution
    }

    fn find_room_for(
        &mut self,
        tenant: TenantId,
        target: HostId,
        hosts: &[HostId],
        considered: &[Move],
        made: &[Move],
    ) -> Option<Vec<Move>> {
        if self.iterations >= self.max_iterations {
            // budget spent; resolve this branch (and everything after it)
            // without searching
            self.exhausted = true;
            return None;
        }
        self.iterations += 1;

        let required = self.snapshot.tenant(tenant).resources;
        // no amount of eviction helps a host whose whole envelope is too small
        // or categorically wrong for the tenant
        if !self.snapshot.host(target).resources.satisfies(&required) {
            return None;
        }

        let free = self.free_capacity_with(made, target);
        if free.satisfies(&required) {
            return Some(made.to_vec());
        }

        let children = self.snapshot.children(target).to_vec();
        let mut shortest: Option<Vec<Move>> = None;
        for subset in
            SubsetEnumerator::new(&children, self.max_subset_size, self.max_considered_nodes)
        {
            if !self.could_fit_evicting(&free, &subset, &required) {
                continue;
            }
            let Some(moves) = self.move_all(&subset, target, hosts, considered, made) else {
                continue;
            };
            if shortest.as_ref().map_or(true, |s| moves.len() < s.len()) {
                shortest = Some(moves);
            }
        }
        if shortest.is_none() {
            trace!(%tenant, %target, "no eviction subset makes room");
        }
        shortest
    }

    /// Lower bound check: would evicting the whole subset make room at all?
    fn could_fit_evicting(
        &self,
        free: &Resources,
        subset: &[TenantId],
        required: &Resources,
    ) -> bool {
        let mut would_free = *free;
        for tenant in subset {
            would_free = would_free
                .add(&self.snapshot.tenant(*tenant).resources)
                .expect("children are validated compatible at snapshot build");
        }
        would_free.satisfies(required)
    }

    /// Relocate every tenant of `subset` off `target`, threading the
    /// accumulating move list. Fails if any one of them cannot be placed.
    fn move_all(
        &mut self,
        subset: &[TenantId],
        target: HostId,
        hosts: &[HostId],
        considered: &[Move],
        made: &[Move],
    ) -> Option<Vec<Move>> {
        let mut moves_so_far = made.to_vec();
        for tenant in subset {
            moves_so_far = self.move_one(*tenant, target, hosts, considered, &moves_so_far)?;
        }
        Some(moves_so_far)
    }

    /// Find the cheapest placement for one tenant somewhere in `hosts`,
    /// recursing into the solver to make room at the chosen destination.
    fn move_one(
        &mut self,
        tenant: TenantId,
        from: HostId,
        hosts: &[HostId],
        considered: &[Move],
        made: &[Move],
    ) -> Option<Vec<Move>> {
        // each tenant is disturbed at most once per solution
        if considered
            .iter()
            .chain(made.iter())
            .any(|m| m.tenant == tenant)
        {
            return None;
        }

        let mut shortest: Option<Vec<Move>> = None;
        for &destination in hosts {
            if destination == from {
                continue;
            }
            let mv = Move {
                tenant,
                from,
                to: destination,
            };
            let mut considered_with = considered.to_vec();
            considered_with.push(mv);
            let Some(moves) = self.solve(tenant, destination, hosts, &considered_with, made)
            else {
                continue;
            };
            let mut candidate = moves;
            candidate.push(mv);
            if shortest.as_ref().map_or(true, |s| candidate.len() < s.len()) {
                shortest = Some(candidate);
            }
        }
        shortest
    }

    /// Free capacity of `host` adjusted for moves already made: resources of
    /// tenants moved off are credited back, resources of tenants moved onto
    /// it are charged.
    fn free_capacity_with(&self, made: &[Move], host: HostId) -> Resources {
        let mut free = self.capacity.free_capacity_of(host);
        for mv in made {
            let resources = self.snapshot.tenant(mv.tenant).resources;
            if mv.from == host {
                free = free
                    .add(&resources)
                    .expect("moved tenants were validated compatible with their host");
            } else if mv.to == host {
                free = free
                    .subtract(&resources)
                    .expect("move destinations satisfied the tenant's envelope");
            }
        }
        free
    }
}
