//! `WorkerPool` and its launch configuration (SPEC_FULL.md §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::store::definitions::{ObjectKey, StorableObject};
use crate::types::NULL_PROVIDER_ID;

/// Errors raised validating a [`WorkerPoolConfig`] before it is accepted.
#[derive(Debug, Snafu)]
pub enum PoolError {
    #[snafu(display("minCapacity ({min}) must not exceed maxCapacity ({max})"))]
    CapacityRange { min: i64, max: i64 },

    #[snafu(display("worker pool must declare at least one launch config"))]
    NoLaunchConfigs,

    #[snafu(display("launch config capacityPerInstance must be positive, got {value}"))]
    NonPositiveCapacityPerInstance { value: i64 },
}

/// VM shape for one launch config: just the Azure `vmSize`, the one field
/// every other profile decision hangs off of.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub vm_size: String,
}

/// OS + data disk shape for one launch config. Both fields are passed
/// through to the ARM request body largely unexamined; the Step Engine
/// only reads enough of `os_disk` to name the created managed disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageProfile {
    pub os_disk: serde_json::Value,
    #[serde(default)]
    pub data_disks: Vec<serde_json::Value>,
}

/// One of the possible VM shapes a pool may launch; `checkWorker`'s
/// provisioner and `provision()` pick among a pool's launch configs by
/// remaining capacity headroom (SPEC_FULL.md §4.9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub capacity_per_instance: i64,
    pub subnet_id: String,
    pub location: String,
    pub hardware_profile: HardwareProfile,
    pub storage_profile: StorageProfile,
    #[serde(default)]
    pub os_profile: serde_json::Value,
    #[serde(default)]
    pub network_profile: serde_json::Value,
    #[serde(default)]
    pub billing_profile: serde_json::Value,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub worker_config: BTreeMap<String, serde_json::Value>,
}

/// Registration/re-registration grace periods; absent means "use the
/// provider-wide default" (SPEC_FULL.md §4.8).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub registration_timeout_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reregistration_timeout_ms: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub min_capacity: i64,
    pub max_capacity: i64,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    pub launch_configs: Vec<LaunchConfig>,
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_capacity > self.max_capacity {
            return Err(PoolError::CapacityRange {
                min: self.min_capacity,
                max: self.max_capacity,
            });
        }
        if self.launch_configs.is_empty() {
            return Err(PoolError::NoLaunchConfigs);
        }
        for lc in &self.launch_configs {
            if lc.capacity_per_instance <= 0 {
                return Err(PoolError::NonPositiveCapacityPerInstance {
                    value: lc.capacity_per_instance,
                });
            }
        }
        Ok(())
    }
}

/// A pool of workers sharing one provider config. `provider_id` holding
/// [`NULL_PROVIDER_ID`] marks the pool as scheduled for deletion: no new
/// workers are provisioned for it and existing ones are wound down
/// (SPEC_FULL.md §4.9, §9.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerPool {
    pub worker_pool_id: String,
    pub provider_id: String,
    pub config: WorkerPoolConfig,
    pub owner: String,
    /// Provider ids this pool has previously been assigned to, most recent
    /// first; retained so in-flight workers from a retired provider can
    /// still be reconciled.
    #[serde(default)]
    pub previous_provider_ids: Vec<String>,
}

impl WorkerPool {
    pub fn new(
        worker_pool_id: impl Into<String>,
        provider_id: impl Into<String>,
        config: WorkerPoolConfig,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            worker_pool_id: worker_pool_id.into(),
            provider_id: provider_id.into(),
            config,
            owner: owner.into(),
            previous_provider_ids: Vec::new(),
        }
    }

    /// `true` once `provider_id` has been retired to the null sentinel.
    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.provider_id == NULL_PROVIDER_ID
    }

    /// Retire the current provider id, pushing it to the front of
    /// `previous_provider_ids`. A no-op if already retired.
    pub fn retire_provider(&mut self) {
        if !self.is_scheduled_for_deletion() {
            let retired = std::mem::replace(&mut self.provider_id, NULL_PROVIDER_ID.to_string());
            self.previous_provider_ids.insert(0, retired);
        }
    }
}

/// Key identifying one [`WorkerPool`]: `worker-pool/<poolId>`.
#[derive(Clone, Debug)]
pub struct PoolKey(pub String);

impl PoolKey {
    pub fn new(worker_pool_id: impl Into<String>) -> Self {
        Self(worker_pool_id.into())
    }
}

impl ObjectKey for PoolKey {
    fn key(&self) -> String {
        format!("worker-pool/{}", self.0)
    }
}

impl StorableObject for WorkerPool {
    type Key = PoolKey;

    fn object_key(&self) -> Self::Key {
        PoolKey::new(self.worker_pool_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_config() -> LaunchConfig {
        LaunchConfig {
            capacity_per_instance: 1,
            subnet_id: "subnet".into(),
            location: "eastus".into(),
            hardware_profile: HardwareProfile {
                vm_size: "Standard_D2s_v3".into(),
            },
            storage_profile: StorageProfile::default(),
            os_profile: serde_json::Value::Null,
            network_profile: serde_json::Value::Null,
            billing_profile: serde_json::Value::Null,
            tags: BTreeMap::new(),
            worker_config: BTreeMap::new(),
        }
    }

    #[test]
    fn retire_provider_moves_to_history() {
        let mut pool = WorkerPool::new(
            "pool-a",
            "azure-east",
            WorkerPoolConfig {
                min_capacity: 0,
                max_capacity: 10,
                lifecycle: Lifecycle::default(),
                launch_configs: vec![launch_config()],
            },
            "owner-team",
        );
        pool.retire_provider();
        assert!(pool.is_scheduled_for_deletion());
        assert_eq!(pool.previous_provider_ids, vec!["azure-east".to_string()]);

        // Retiring again is a no-op.
        pool.retire_provider();
        assert_eq!(pool.previous_provider_ids.len(), 1);
    }

    #[test]
    fn validate_rejects_inverted_capacity() {
        let config = WorkerPoolConfig {
            min_capacity: 5,
            max_capacity: 1,
            lifecycle: Lifecycle::default(),
            launch_configs: vec![launch_config()],
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::CapacityRange { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_launch_configs() {
        let config = WorkerPoolConfig {
            min_capacity: 0,
            max_capacity: 1,
            lifecycle: Lifecycle::default(),
            launch_configs: vec![],
        };
        assert!(matches!(config.validate(), Err(PoolError::NoLaunchConfigs)));
    }
}
