//! The immutable fleet snapshot a maintenance tick operates on.
//!
//! [`FleetSnapshot::build`] turns the flat node list reported by the fleet
//! management layer into two parallel arenas (hosts and tenants) addressed by
//! [`HostId`] / [`TenantId`] indices, with per-host child lists sorted by
//! hostname. All orderings exposed here are deterministic so that a tick's
//! analysis is reproducible for a given snapshot.

use std::collections::{HashMap, HashSet};

use crate::node::{Host, HostId, NodeRecord, Tenant, TenantId};
use crate::resources::ResourcesError;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("duplicate hostname {0}")]
    DuplicateHostname(String),
    #[error("tenant {tenant} refers to unknown parent host {parent}")]
    UnknownParent { tenant: String, parent: String },
    #[error("tenant {tenant} has non-host parent {parent}")]
    ParentNotHost { tenant: String, parent: String },
    #[error("tenant {tenant} is incompatible with host {host}")]
    IncompatiblePlacement {
        tenant: String,
        host: String,
        #[source]
        source: ResourcesError,
    },
}

#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    hosts: Vec<Host>,
    tenants: Vec<Tenant>,
    /// Children of each host, parallel to `hosts`, hostname ascending.
    children: Vec<Vec<TenantId>>,
}

impl FleetSnapshot {
    /// Index the given node list, validating the snapshot invariants:
    /// hostnames are unique, and every tenant's parent exists and is a host.
    ///
    /// Hosts and tenants are both arena-ordered by hostname, so ids are
    /// stable across rebuilds of the same node list.
    pub fn build(mut nodes: Vec<NodeRecord>) -> Result<FleetSnapshot, SnapshotError> {
        nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        for pair in nodes.windows(2) {
            if pair[0].hostname == pair[1].hostname {
                return Err(SnapshotError::DuplicateHostname(pair[0].hostname.clone()));
            }
        }

        let mut hosts = Vec::new();
        let mut host_by_name = HashMap::new();
        for node in nodes.iter().filter(|n| n.parent_hostname.is_none()) {
            let id = HostId(hosts.len() as u32);
            host_by_name.insert(node.hostname.clone(), id);
            hosts.push(Host {
                id,
                hostname: node.hostname.clone(),
                resources: node.resources,
                state: node.state,
            });
        }

        let tenant_names: HashSet<&str> = nodes
            .iter()
            .filter(|n| n.parent_hostname.is_some())
            .map(|n| n.hostname.as_str())
            .collect();

        let mut tenants = Vec::new();
        let mut children = vec![Vec::new(); hosts.len()];
        for node in nodes.iter() {
            let Some(parent_hostname) = &node.parent_hostname else {
                continue;
            };
            let parent = *host_by_name.get(parent_hostname).ok_or_else(|| {
                if tenant_names.contains(parent_hostname.as_str()) {
                    SnapshotError::ParentNotHost {
                        tenant: node.hostname.clone(),
                        parent: parent_hostname.clone(),
                    }
                } else {
                    SnapshotError::UnknownParent {
                        tenant: node.hostname.clone(),
                        parent: parent_hostname.clone(),
                    }
                }
            })?;
            // Capacity arithmetic later subtracts tenant demand from host
            // envelopes; a categorical mismatch there is a precondition
            // violation of the snapshot, caught here.
            let host = &hosts[parent.0 as usize];
            if let Err(source) = host.resources.subtract(&node.resources) {
                return Err(SnapshotError::IncompatiblePlacement {
                    tenant: node.hostname.clone(),
                    host: host.hostname.clone(),
                    source,
                });
            }
            let id = TenantId(tenants.len() as u32);
            tenants.push(Tenant {
                id,
                hostname: node.hostname.clone(),
                resources: node.resources,
                parent,
                state: node.state,
                retired: node.retired,
                owner: node.owner.clone(),
            });
            // nodes are hostname-sorted, so child lists come out sorted too
            children[parent.0 as usize].push(id);
        }

        Ok(FleetSnapshot {
            hosts,
            tenants,
            children,
        })
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0 as usize]
    }

    pub fn tenant(&self, id: TenantId) -> &Tenant {
        &self.tenants[id.0 as usize]
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    pub fn tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.tenants.iter()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Tenants placed on `host`, hostname ascending.
    pub fn children(&self, host: HostId) -> &[TenantId] {
        &self.children[host.0 as usize]
    }

    pub fn host_by_hostname(&self, hostname: &str) -> Option<&Host> {
        self.hosts
            .binary_search_by(|h| h.hostname.as_str().cmp(hostname))
            .ok()
            .map(|i| &self.hosts[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Resources;

    fn res(cpu: f64, memory_gb: f64) -> Resources {
        Resources::new(cpu, memory_gb, 100.0, 1.0)
    }

    #[test]
    fn builds_arenas_and_sorted_children() {
        let snapshot = FleetSnapshot::build(vec![
            NodeRecord::host("host-b", res(8.0, 16.0)),
            NodeRecord::host("host-a", res(8.0, 16.0)),
            NodeRecord::tenant("tenant-z", res(2.0, 4.0), "host-a"),
            NodeRecord::tenant("tenant-a", res(2.0, 4.0), "host-a"),
        ])
        .unwrap();

        assert_eq!(snapshot.host_count(), 2);
        assert_eq!(snapshot.tenant_count(), 2);
        assert_eq!(snapshot.host(HostId(0)).hostname, "host-a");
        assert_eq!(snapshot.host(HostId(1)).hostname, "host-b");

        let children: Vec<&str> = snapshot
            .children(HostId(0))
            .iter()
            .map(|t| snapshot.tenant(*t).hostname.as_str())
            .collect();
        assert_eq!(children, vec!["tenant-a", "tenant-z"]);
        assert!(snapshot.children(HostId(1)).is_empty());
    }

    #[test]
    fn rejects_unknown_parent() {
        let err = FleetSnapshot::build(vec![
            NodeRecord::host("host-a", res(8.0, 16.0)),
            NodeRecord::tenant("tenant-a", res(2.0, 4.0), "host-x"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SnapshotError::UnknownParent {
                tenant: "tenant-a".to_string(),
                parent: "host-x".to_string(),
            }
        );
    }

    #[test]
    fn rejects_tenant_parented_on_tenant() {
        let err = FleetSnapshot::build(vec![
            NodeRecord::host("host-a", res(8.0, 16.0)),
            NodeRecord::tenant("tenant-a", res(2.0, 4.0), "host-a"),
            NodeRecord::tenant("tenant-b", res(2.0, 4.0), "tenant-a"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            SnapshotError::ParentNotHost {
                tenant: "tenant-b".to_string(),
                parent: "tenant-a".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_hostnames() {
        let err = FleetSnapshot::build(vec![
            NodeRecord::host("host-a", res(8.0, 16.0)),
            NodeRecord::host("host-a", res(4.0, 8.0)),
        ])
        .unwrap_err();
        assert_eq!(err, SnapshotError::DuplicateHostname("host-a".to_string()));
    }

    #[test]
    fn rejects_categorically_incompatible_placement() {
        use crate::resources::DiskSpeed;
        let err = FleetSnapshot::build(vec![
            NodeRecord::host("host-a", res(8.0, 16.0).with_disk_speed(DiskSpeed::Slow)),
            NodeRecord::tenant(
                "tenant-a",
                res(2.0, 4.0).with_disk_speed(DiskSpeed::Fast),
                "host-a",
            ),
        ])
        .unwrap_err();
        assert!(matches!(err, SnapshotError::IncompatiblePlacement { .. }));
    }

    #[test]
    fn hostname_lookup() {
        let snapshot = FleetSnapshot::build(vec![
            NodeRecord::host("host-a", res(8.0, 16.0)),
            NodeRecord::host("host-b", res(8.0, 16.0)),
        ])
        .unwrap();
        assert_eq!(snapshot.host_by_hostname("host-b").unwrap().id, HostId(1));
        assert!(snapshot.host_by_hostname("host-c").is_none());
    }

    #[test]
    fn node_records_deserialize_with_defaults() {
        let record: NodeRecord = serde_json::from_str(
            r#"{
                "hostname": "tenant-a",
                "resources": {"cpu": 2.0, "memory_gb": 4.0, "disk_gb": 50.0, "bandwidth_gbps": 0.3},
                "parent_hostname": "host-a"
            }"#,
        )
        .unwrap();
        assert_eq!(record.parent_hostname.as_deref(), Some("host-a"));
        assert_eq!(record.state, crate::node::NodeState::Active);
        assert!(!record.retired);
        assert_eq!(record.resources.disk_speed, crate::resources::DiskSpeed::Any);
    }
}
