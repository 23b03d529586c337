//! Provisioner (`provision`/`deprovision`, SPEC_FULL.md §4.9): creates
//! "empty" worker rows whose pipelines the Scanner later drives.

use chrono::{Duration as ChronoDuration, Utc};
use common_lib::types::{AzureProviderData, ResourceRef, VmRef, Worker, WorkerPool, WorkerState};
use rand::seq::SliceRandom;
use tracing::{info, instrument};

use common_lib::store::Store;

use crate::estimator::{Estimator, WorkerInfo};
use crate::nicer_id::nicer_id;

const DEFAULT_REGISTRATION_TIMEOUT_MS: i64 = 15 * 60 * 1_000;
const DEFAULT_EXPIRES_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1_000;

fn fresh_worker(pool: &WorkerPool, launch_config: &common_lib::types::LaunchConfig) -> Worker {
    let vm_name: String = format!("vm-{}-{}", nicer_id(16), nicer_id(16))
        .chars()
        .take(38)
        .collect();
    let ip_name: String = format!("pip-{}", nicer_id(20)).chars().take(24).collect();
    let nic_name: String = format!("nic-{}", nicer_id(20)).chars().take(24).collect();
    let computer_name: String = nicer_id(15);

    let now = Utc::now();
    let registration_timeout_ms = pool
        .config
        .lifecycle
        .registration_timeout_ms
        .unwrap_or(DEFAULT_REGISTRATION_TIMEOUT_MS);

    Worker {
        worker_pool_id: pool.worker_pool_id.clone(),
        worker_group: launch_config.location.clone(),
        worker_id: vm_name.clone(),
        state: WorkerState::Requested,
        created: now,
        last_modified: now,
        last_checked: now,
        expires: now + ChronoDuration::milliseconds(DEFAULT_EXPIRES_WINDOW_MS),
        capacity: launch_config.capacity_per_instance,
        provider_data: AzureProviderData {
            location: launch_config.location.clone(),
            resource_group_name: String::new(),
            subnet_id: launch_config.subnet_id.clone(),
            tags: launch_config.tags.clone(),
            vm: VmRef {
                name: vm_name,
                computer_name,
                config: serde_json::json!({
                    "hardwareProfile": launch_config.hardware_profile,
                    "storageProfile": launch_config.storage_profile,
                    "osProfile": launch_config.os_profile,
                    "networkProfile": launch_config.network_profile,
                }),
                operation: None,
                id: None,
                vm_id: None,
            },
            ip: ResourceRef::new(ip_name),
            nic: ResourceRef::new(nic_name),
            disks: Vec::new(),
            disk: None,
            terminate_after: Some(now + ChronoDuration::milliseconds(registration_timeout_ms)),
            reregistration_timeout_ms: pool.config.lifecycle.reregistration_timeout_ms,
            worker_config: launch_config.worker_config.clone(),
        },
    }
}

/// `provision(pool, workerInfo)` (SPEC_FULL.md §4.9): ask the estimator
/// how much capacity to add, then create that many empty worker rows,
/// sampling a launch config per worker.
#[instrument(skip(store, estimator, pool), fields(worker_pool_id = %pool.worker_pool_id))]
pub async fn provision<S: Store>(
    store: &S,
    estimator: &dyn Estimator,
    pool: &WorkerPool,
    info: WorkerInfo,
) -> Result<usize, common_lib::error::StoreError> {
    if pool.is_scheduled_for_deletion() {
        return Ok(0);
    }

    let mut to_spawn = estimator.estimate(pool, info);
    let mut spawned = 0usize;
    let mut rng = rand::thread_rng();

    while to_spawn > 0 {
        let Some(launch_config) = pool.config.launch_configs.choose(&mut rng) else {
            break;
        };
        let worker = fresh_worker(pool, launch_config);
        store.put_obj(&worker).await?;
        info!(event = "workerRequested", worker_id = %worker.worker_id, "provisioned worker row");
        to_spawn -= launch_config.capacity_per_instance;
        spawned += 1;
    }

    Ok(spawned)
}

/// `deprovision(pool)`: a no-op, workers terminate themselves and are
/// reaped by the Scanner/Removal Pipeline (SPEC_FULL.md §4.9).
pub fn deprovision(_pool: &WorkerPool) {}

#[cfg(test)]
mod tests {
    use super::*;
    use common_lib::store::MemStore;
    use common_lib::types::{HardwareProfile, Lifecycle, StorageProfile, WorkerPoolConfig};

    fn launch_config() -> common_lib::types::LaunchConfig {
        common_lib::types::LaunchConfig {
            capacity_per_instance: 1,
            subnet_id: "subnet-a".into(),
            location: "eastus".into(),
            hardware_profile: HardwareProfile {
                vm_size: "Standard_D2s_v3".into(),
            },
            storage_profile: StorageProfile::default(),
            os_profile: serde_json::Value::Null,
            network_profile: serde_json::Value::Null,
            billing_profile: serde_json::Value::Null,
            tags: Default::default(),
            worker_config: Default::default(),
        }
    }

    #[tokio::test]
    async fn provision_spawns_requested_capacity() {
        let store = MemStore::new();
        let pool = WorkerPool::new(
            "pool-a",
            "azure-east",
            WorkerPoolConfig {
                min_capacity: 0,
                max_capacity: 10,
                lifecycle: Lifecycle::default(),
                launch_configs: vec![launch_config()],
            },
            "owner",
        );
        let estimator = crate::estimator::FixedWindowEstimator;
        let info = WorkerInfo {
            existing_capacity: 0,
            requested_capacity: 3,
        };
        let spawned = provision(&store, &estimator, &pool, info).await.unwrap();
        assert_eq!(spawned, 3);

        let workers: Vec<Worker> = store
            .list_prefix(&common_lib::types::worker::worker_pool_prefix("pool-a"))
            .await
            .unwrap();
        assert_eq!(workers.len(), 3);
        assert!(workers.iter().all(|w| w.state == WorkerState::Requested));
    }

    #[tokio::test]
    async fn provision_is_noop_for_retired_pool() {
        let store = MemStore::new();
        let mut pool = WorkerPool::new(
            "pool-b",
            "azure-east",
            WorkerPoolConfig {
                min_capacity: 0,
                max_capacity: 10,
                lifecycle: Lifecycle::default(),
                launch_configs: vec![launch_config()],
            },
            "owner",
        );
        pool.retire_provider();
        let estimator = crate::estimator::FixedWindowEstimator;
        let info = WorkerInfo {
            existing_capacity: 0,
            requested_capacity: 5,
        };
        let spawned = provision(&store, &estimator, &pool, info).await.unwrap();
        assert_eq!(spawned, 0);
    }
}
