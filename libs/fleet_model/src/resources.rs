//! Resource vectors and the arithmetic the capacity analysis is built on.
//!
//! A [`Resources`] value is either a host's envelope or a tenant's demand.
//! The scalar axes form a component-wise partial order; the categorical axes
//! (disk speed, storage type) form a small lattice where `Any` is the top
//! element and matches everything. Arithmetic on incompatible categorical
//! axes is a programmer error and is reported as a [`ResourcesError`] rather
//! than silently coerced.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSpeed {
    Fast,
    Slow,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    Remote,
    #[default]
    Any,
}

impl DiskSpeed {
    pub fn compatible_with(self, other: DiskSpeed) -> bool {
        self == DiskSpeed::Any || other == DiskSpeed::Any || self == other
    }

    /// The most specific speed covering both, if they are compatible.
    fn combine(self, other: DiskSpeed) -> Option<DiskSpeed> {
        match (self, other) {
            (DiskSpeed::Any, other) => Some(other),
            (this, DiskSpeed::Any) => Some(this),
            (this, other) if this == other => Some(this),
            _ => None,
        }
    }
}

impl StorageType {
    pub fn compatible_with(self, other: StorageType) -> bool {
        self == StorageType::Any || other == StorageType::Any || self == other
    }

    fn combine(self, other: StorageType) -> Option<StorageType> {
        match (self, other) {
            (StorageType::Any, other) => Some(other),
            (this, StorageType::Any) => Some(this),
            (this, other) if this == other => Some(this),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcesError {
    #[error("incompatible disk speeds {0:?} and {1:?}")]
    IncompatibleDiskSpeed(DiskSpeed, DiskSpeed),
    #[error("incompatible storage types {0:?} and {1:?}")]
    IncompatibleStorageType(StorageType, StorageType),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub memory_gb: f64,
    pub disk_gb: f64,
    pub bandwidth_gbps: f64,
    #[serde(default)]
    pub gpu: f64,
    #[serde(default)]
    pub disk_speed: DiskSpeed,
    #[serde(default)]
    pub storage_type: StorageType,
}

impl Resources {
    pub fn new(cpu: f64, memory_gb: f64, disk_gb: f64, bandwidth_gbps: f64) -> Self {
        Resources {
            cpu,
            memory_gb,
            disk_gb,
            bandwidth_gbps,
            gpu: 0.0,
            disk_speed: DiskSpeed::Any,
            storage_type: StorageType::Any,
        }
    }

    pub fn with_disk_speed(mut self, disk_speed: DiskSpeed) -> Self {
        self.disk_speed = disk_speed;
        self
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn with_gpu(mut self, gpu: f64) -> Self {
        self.gpu = gpu;
        self
    }

    /// Whether these resources are enough to cover `required`.
    ///
    /// Every scalar axis of `self` must be at least as large as the
    /// corresponding axis of `required`; on the categorical axes `Any` on
    /// either side matches, otherwise the values must be equal.
    pub fn satisfies(&self, required: &Resources) -> bool {
        self.cpu >= required.cpu
            && self.memory_gb >= required.memory_gb
            && self.disk_gb >= required.disk_gb
            && self.bandwidth_gbps >= required.bandwidth_gbps
            && self.gpu >= required.gpu
            && self.disk_speed.compatible_with(required.disk_speed)
            && self.storage_type.compatible_with(required.storage_type)
    }

    /// Component-wise sum. The categorical axes of the result are the most
    /// specific values covering both operands.
    pub fn add(&self, other: &Resources) -> Result<Resources, ResourcesError> {
        let disk_speed = self
            .disk_speed
            .combine(other.disk_speed)
            .ok_or(ResourcesError::IncompatibleDiskSpeed(
                self.disk_speed,
                other.disk_speed,
            ))?;
        let storage_type = self.storage_type.combine(other.storage_type).ok_or(
            ResourcesError::IncompatibleStorageType(self.storage_type, other.storage_type),
        )?;
        Ok(Resources {
            cpu: self.cpu + other.cpu,
            memory_gb: self.memory_gb + other.memory_gb,
            disk_gb: self.disk_gb + other.disk_gb,
            bandwidth_gbps: self.bandwidth_gbps + other.bandwidth_gbps,
            gpu: self.gpu + other.gpu,
            disk_speed,
            storage_type,
        })
    }

    /// Component-wise difference, saturating at zero per scalar axis.
    ///
    /// The categorical axes of the result are kept from `self`; subtracting a
    /// demand whose categorical axes conflict with `self` is an error.
    pub fn subtract(&self, other: &Resources) -> Result<Resources, ResourcesError> {
        if !self.disk_speed.compatible_with(other.disk_speed) {
            return Err(ResourcesError::IncompatibleDiskSpeed(
                self.disk_speed,
                other.disk_speed,
            ));
        }
        if !self.storage_type.compatible_with(other.storage_type) {
            return Err(ResourcesError::IncompatibleStorageType(
                self.storage_type,
                other.storage_type,
            ));
        }
        Ok(Resources {
            cpu: (self.cpu - other.cpu).max(0.0),
            memory_gb: (self.memory_gb - other.memory_gb).max(0.0),
            disk_gb: (self.disk_gb - other.disk_gb).max(0.0),
            bandwidth_gbps: (self.bandwidth_gbps - other.bandwidth_gbps).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
            disk_speed: self.disk_speed,
            storage_type: self.storage_type,
        })
    }

    /// Total order on the scalar axes, for ranking free capacities.
    ///
    /// Lexicographic over (cpu, memory, disk, bandwidth, gpu) with
    /// `f64::total_cmp`, so sorts are deterministic even in the presence of
    /// equal leading axes.
    pub fn cmp_size(&self, other: &Resources) -> Ordering {
        self.cpu
            .total_cmp(&other.cpu)
            .then(self.memory_gb.total_cmp(&other.memory_gb))
            .then(self.disk_gb.total_cmp(&other.disk_gb))
            .then(self.bandwidth_gbps.total_cmp(&other.bandwidth_gbps))
            .then(self.gpu.total_cmp(&other.gpu))
    }
}
