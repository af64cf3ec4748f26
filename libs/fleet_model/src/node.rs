//! Node records and the arena indices the rest of the system refers to
//! nodes by.

use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// Index of a host in a [`crate::FleetSnapshot`]'s host arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

/// Index of a tenant in a [`crate::FleetSnapshot`]'s tenant arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub u32);

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tenant#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Active,
    Reserved,
    Failed,
}

/// One node as reported by the surrounding fleet management layer.
///
/// A node with no parent is a host; a node with a parent is a tenant placed
/// on that parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub hostname: String,
    pub resources: Resources,
    #[serde(default)]
    pub parent_hostname: Option<String>,
    #[serde(default)]
    pub state: NodeState,
    /// Set while a relocation of this node is being executed.
    #[serde(default)]
    pub retired: bool,
    #[serde(default)]
    pub owner: Option<String>,
}

impl NodeRecord {
    pub fn host(hostname: impl Into<String>, resources: Resources) -> Self {
        NodeRecord {
            hostname: hostname.into(),
            resources,
            parent_hostname: None,
            state: NodeState::Active,
            retired: false,
            owner: None,
        }
    }

    pub fn tenant(
        hostname: impl Into<String>,
        resources: Resources,
        parent: impl Into<String>,
    ) -> Self {
        NodeRecord {
            hostname: hostname.into(),
            resources,
            parent_hostname: Some(parent.into()),
            state: NodeState::Active,
            retired: false,
            owner: None,
        }
    }

    pub fn with_state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub fn retired(mut self) -> Self {
        self.retired = true;
        self
    }
}

/// A host entry in the snapshot arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub hostname: String,
    pub resources: Resources,
    pub state: NodeState,
}

/// A tenant entry in the snapshot arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: TenantId,
    pub hostname: String,
    pub resources: Resources,
    pub parent: HostId,
    pub state: NodeState,
    pub retired: bool,
    pub owner: Option<String>,
}
