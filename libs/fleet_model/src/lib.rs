//! Data model shared by the node-repository maintenance components: resource
//! vectors, node records, the immutable fleet snapshot, and the capacity view
//! over it.

pub mod capacity;
pub mod node;
pub mod resources;
pub mod snapshot;

pub use capacity::HostCapacity;
pub use node::{Host, HostId, NodeRecord, NodeState, Tenant, TenantId};
pub use resources::{DiskSpeed, Resources, ResourcesError, StorageType};
pub use snapshot::{FleetSnapshot, SnapshotError};
