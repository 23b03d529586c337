//! Provision Pipeline (SPEC_FULL.md §4.4): IP → NIC → VM → disks, each
//! invocation of [`advance`] driving the pipeline forward by zero-or-one
//! resource step.

use std::collections::BTreeMap;

use common_lib::types::{DiskRef, Worker, WorkerPool, RESERVED_TAG_KEYS};
use serde_json::{json, Value};
use tracing::instrument;

use crate::client::{encode_custom_data, ArmClient};
use crate::error::StepError;
use crate::nicer_id::nicer_id;
use crate::password::generate_admin_password;
use crate::steps::{self, ResourceKind};

const CONTROLLER_IDENTITY: &str = "azure-provider";

/// Reserved tag values for `worker` (SPEC_FULL.md §3, testable property 6),
/// always overwriting any user-supplied tag of the same key.
fn reserved_tags(pool: &WorkerPool, worker: &Worker, root_url: &str) -> BTreeMap<&'static str, String> {
    RESERVED_TAG_KEYS
        .iter()
        .map(|&key| {
            let value = match key {
                "created-by" => CONTROLLER_IDENTITY.to_string(),
                "managed-by" => CONTROLLER_IDENTITY.to_string(),
                "provider-id" => pool.provider_id.clone(),
                "worker-group" => worker.worker_group.clone(),
                "worker-pool-id" => worker.worker_pool_id.clone(),
                "root-url" => root_url.to_string(),
                "owner" => pool.owner.clone(),
                other => unreachable!("unhandled reserved tag key {other}"),
            };
            (key, value)
        })
        .collect()
}

fn build_ip_config(worker: &Worker) -> Value {
    json!({
        "location": worker.provider_data.location,
        "tags": worker.provider_data.tags,
    })
}

fn build_nic_config(worker: &Worker) -> Value {
    json!({
        "location": worker.provider_data.location,
        "tags": worker.provider_data.tags,
        "ipConfigurations": [{
            "name": "ipconfig1",
            "properties": {
                "privateIPAllocationMethod": "Dynamic",
                "subnet": { "id": worker.provider_data.subnet_id },
                "publicIPAddress": { "id": worker.provider_data.ip.id },
            }
        }]
    })
}

/// Record the newly-created NIC's id into `vm.config.networkProfile`, the
/// modify hook run once after the NIC step confirms creation
/// (SPEC_FULL.md §4.4 step 2).
fn record_nic_in_vm_config(worker: &mut Worker) {
    let nic_id = worker.provider_data.nic.id.clone();
    let config = &mut worker.provider_data.vm.config;
    if !config.is_object() {
        *config = json!({});
    }
    config["networkProfile"] = json!({
        "networkInterfaces": [{ "id": nic_id }]
    });
}

/// Strip any user-supplied disk names so the cloud-generated ones are
/// authoritative (SPEC_FULL.md §4.4, testable property 7).
fn strip_disk_names(config: &mut Value) {
    if let Some(os_disk) = config.pointer_mut("/storageProfile/osDisk") {
        if let Some(obj) = os_disk.as_object_mut() {
            obj.remove("name");
        }
    }
    if let Some(data_disks) = config.pointer_mut("/storageProfile/dataDisks") {
        if let Some(arr) = data_disks.as_array_mut() {
            for disk in arr {
                if let Some(obj) = disk.as_object_mut() {
                    obj.remove("name");
                }
            }
        }
    }
}

fn build_vm_config(pool: &WorkerPool, worker: &Worker, root_url: &str) -> Value {
    let mut config = worker.provider_data.vm.config.clone();
    if !config.is_object() {
        config = json!({});
    }
    strip_disk_names(&mut config);

    config["location"] = json!(worker.provider_data.location);
    config["tags"] = json!(worker.provider_data.tags);

    let os_profile = config
        .get("osProfile")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let mut os_profile = os_profile;
    os_profile["computerName"] = json!(worker.provider_data.vm.computer_name);
    os_profile["adminUsername"] = json!("azureuser");
    os_profile["adminPassword"] = json!(generate_admin_password());

    let custom_data_payload = json!({
        "workerPoolId": pool.worker_pool_id,
        "providerId": pool.provider_id,
        "workerGroup": worker.worker_group,
        "rootUrl": root_url,
        "workerConfig": worker.provider_data.worker_config,
    });
    os_profile["customData"] = json!(encode_custom_data(&custom_data_payload));
    config["osProfile"] = os_profile;

    config
}

/// After the VM is confirmed created, read back the disk names Azure
/// generated and persist them into `providerData.disks` (SPEC_FULL.md
/// §4.4 step 3). A no-op if disks are already recorded.
async fn populate_disks(client: &ArmClient, worker: &mut Worker) -> Result<(), StepError> {
    if !worker.provider_data.disks.is_empty() {
        return Ok(());
    }
    let vm = client
        .get_virtual_machine(&worker.provider_data.vm.name)
        .await
        .map_err(|source| StepError::Gateway { source })?;
    let Some(storage) = vm.properties.storage_profile else {
        return Ok(());
    };

    let mut disks = Vec::new();
    let mut os_disk = DiskRef::new(storage.os_disk.name.clone());
    os_disk.id = storage
        .os_disk
        .managed_disk
        .as_ref()
        .and_then(|m| m.id.clone());
    disks.push(os_disk);

    for data_disk in &storage.data_disks {
        let mut disk = DiskRef::new(data_disk.name.clone());
        disk.id = data_disk.managed_disk.as_ref().and_then(|m| m.id.clone());
        disks.push(disk);
    }

    worker.provider_data.disks = disks;
    Ok(())
}

/// Advance the provision pipeline for `worker` by at most one resource
/// step.
#[instrument(skip(client, pool, worker), fields(worker_id = %worker.worker_id))]
pub async fn advance(
    client: &ArmClient,
    pool: &WorkerPool,
    worker: &mut Worker,
    root_url: &str,
) -> Result<(), StepError> {
    let tags = reserved_tags(pool, worker, root_url);
    worker.provider_data.apply_reserved_tags(tags);

    if worker.provider_data.ip.id.is_none() {
        let config = build_ip_config(worker);
        steps::provision_resource(client, worker, ResourceKind::Ip, config, |_| {}).await?;
        return Ok(());
    }

    if worker.provider_data.nic.id.is_none() {
        let config = build_nic_config(worker);
        steps::provision_resource(client, worker, ResourceKind::Nic, config, record_nic_in_vm_config)
            .await?;
        return Ok(());
    }

    if worker.provider_data.vm.id.is_none() {
        let config = build_vm_config(pool, worker, root_url);
        steps::provision_resource(client, worker, ResourceKind::Vm, config, |_| {}).await?;
        if worker.provider_data.vm.id.is_some() {
            populate_disks(client, worker).await?;
        }
        return Ok(());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_disk_names_removes_os_and_data_disk_names() {
        let mut config = json!({
            "storageProfile": {
                "osDisk": { "name": "user-chosen", "createOption": "FromImage" },
                "dataDisks": [{ "name": "also-user-chosen", "lun": 0 }]
            }
        });
        strip_disk_names(&mut config);
        assert!(config["storageProfile"]["osDisk"].get("name").is_none());
        assert!(config["storageProfile"]["dataDisks"][0].get("name").is_none());
        assert_eq!(config["storageProfile"]["osDisk"]["createOption"], "FromImage");
    }
}
