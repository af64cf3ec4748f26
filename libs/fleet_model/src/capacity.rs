//! Free-capacity accounting over a fleet snapshot.

use itertools::Itertools;

use crate::node::{HostId, Tenant};
use crate::resources::Resources;
use crate::snapshot::FleetSnapshot;

/// A pure view answering capacity questions about a [`FleetSnapshot`].
///
/// Nothing here mutates; all answers are deterministic functions of the
/// snapshot.
#[derive(Clone, Copy)]
pub struct HostCapacity<'a> {
    snapshot: &'a FleetSnapshot,
}

impl<'a> HostCapacity<'a> {
    pub fn new(snapshot: &'a FleetSnapshot) -> Self {
        HostCapacity { snapshot }
    }

    /// The summed demand of the host's children, with the host's categorical
    /// axes. Children occupy capacity regardless of their own state.
    pub fn used_capacity_of(&self, host: HostId) -> Resources {
        let envelope = self.snapshot.host(host).resources;
        let mut used = Resources {
            cpu: 0.0,
            memory_gb: 0.0,
            disk_gb: 0.0,
            bandwidth_gbps: 0.0,
            gpu: 0.0,
            disk_speed: envelope.disk_speed,
            storage_type: envelope.storage_type,
        };
        for tenant in self.children_of(host) {
            used.cpu += tenant.resources.cpu;
            used.memory_gb += tenant.resources.memory_gb;
            used.disk_gb += tenant.resources.disk_gb;
            used.bandwidth_gbps += tenant.resources.bandwidth_gbps;
            used.gpu += tenant.resources.gpu;
        }
        used
    }

    /// Host envelope minus the children's summed demand, saturating at zero
    /// per scalar axis. An overcommitted axis therefore reads as zero free.
    pub fn free_capacity_of(&self, host: HostId) -> Resources {
        let envelope = self.snapshot.host(host).resources;
        envelope
            .subtract(&self.used_capacity_of(host))
            .expect("used capacity carries the host's own categorical axes")
    }

    /// The `k` eligible hosts with the largest free capacity, ties broken by
    /// hostname ascending. Returns all of them when fewer than `k` exist.
    pub fn find_spare_hosts(&self, eligible: &[HostId], k: usize) -> Vec<HostId> {
        eligible
            .iter()
            .copied()
            .sorted_by(|a, b| {
                self.free_capacity_of(*b)
                    .cmp_size(&self.free_capacity_of(*a))
                    .then_with(|| {
                        self.snapshot
                            .host(*a)
                            .hostname
                            .cmp(&self.snapshot.host(*b).hostname)
                    })
            })
            .take(k)
            .collect()
    }

    /// The host's tenants, hostname ascending.
    pub fn children_of(&self, host: HostId) -> impl Iterator<Item = &'a Tenant> + 'a {
        let snapshot = self.snapshot;
        snapshot
            .children(host)
            .iter()
            .map(move |id| snapshot.tenant(*id))
    }
}
