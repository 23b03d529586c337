//! End-to-end scenario tests driving the Provision and Removal pipelines
//! against a fake ARM backend (`wiremock`) and an in-memory store, the way
//! the teacher's reconciler tests drive a poll loop against a stand-in
//! for the cloud API rather than mocking individual client methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use azure_provider::client::ArmClient;
use azure_provider::config::{ProviderConfig, RateLimits};
use azure_provider::error::StepError;
use azure_provider::gateway::Gateway;
use azure_provider::pipeline;
use common_lib::types::{
    AzureProviderData, DiskRef, HardwareProfile, LaunchConfig, Lifecycle, ResourceRef,
    StorageProfile, VmRef, Worker, WorkerPool, WorkerPoolConfig, WorkerState,
};

const SUBSCRIPTION: &str = "sub-1";
const RESOURCE_GROUP: &str = "rg-1";

async fn mock_client(server: &MockServer) -> ArmClient {
    Mock::given(method("POST"))
        .and(path("/tenant-a/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fake-token",
            "expires_in": "3600",
        })))
        .mount(server)
        .await;

    let config = ProviderConfig {
        client_id: "client-a".into(),
        secret: "secret-a".into(),
        domain: "tenant-a".into(),
        subscription_id: SUBSCRIPTION.into(),
        resource_group_name: RESOURCE_GROUP.into(),
        storage_account_name: "storagea".into(),
        root_url: "https://control-plane.example.invalid".into(),
        api_rate_limits: RateLimits::default(),
        backoff_delay_ms: 1,
        ca_directory: "/nonexistent".into(),
    };
    let gateway = Arc::new(Gateway::new(&config.api_rate_limits, std::time::Duration::from_millis(1)));
    ArmClient::new(config, gateway)
        .unwrap()
        .with_bases(server.uri(), server.uri())
}

fn launch_config() -> LaunchConfig {
    LaunchConfig {
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
        tags: BTreeMap::new(),
        worker_config: BTreeMap::new(),
    }
}

fn fresh_pool() -> WorkerPool {
    WorkerPool::new(
        "pool-a",
        "azure-east",
        WorkerPoolConfig {
            min_capacity: 0,
            max_capacity: 10,
            lifecycle: Lifecycle::default(),
            launch_configs: vec![launch_config()],
        },
        "owner-team",
    )
}

fn fresh_worker(pool: &WorkerPool) -> Worker {
    let now = chrono::Utc::now();
    Worker {
        worker_pool_id: pool.worker_pool_id.clone(),
        worker_group: "eastus".into(),
        worker_id: "vm-1".into(),
        state: WorkerState::Requested,
        created: now,
        last_modified: now,
        last_checked: now,
        expires: now + chrono::Duration::days(7),
        capacity: 1,
        provider_data: AzureProviderData {
            location: "eastus".into(),
            resource_group_name: RESOURCE_GROUP.into(),
            subnet_id: "subnet-a".into(),
            tags: BTreeMap::new(),
            vm: VmRef {
                name: "vm-1".into(),
                computer_name: "vm1".into(),
                config: json!({ "hardwareProfile": { "vmSize": "Standard_D2s_v3" } }),
                operation: None,
                id: None,
                vm_id: None,
            },
            ip: ResourceRef::new("ip-1"),
            nic: ResourceRef::new("nic-1"),
            disks: Vec::new(),
            disk: None,
            terminate_after: None,
            reregistration_timeout_ms: None,
            worker_config: BTreeMap::new(),
        },
    }
}

fn resource_path(resource: &str, name: &str) -> String {
    format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/{RESOURCE_GROUP}/providers/{resource}/{name}")
}

/// S1: a brand-new worker's IP, NIC and VM each go through the
/// not-found → begin-create → confirmed-created dance, and the VM's disks
/// are populated once it is confirmed created.
#[tokio::test]
async fn s1_successful_provisioning_creates_ip_nic_vm_and_populates_disks() {
    let server = MockServer::start().await;
    let client = mock_client(&server).await;

    let ip_path = resource_path("Microsoft.Network/publicIPAddresses", "ip-1");
    let nic_path = resource_path("Microsoft.Network/networkInterfaces", "nic-1");
    let vm_path = resource_path("Microsoft.Compute/virtualMachines", "vm-1");

    // Fallback GET responses (resource confirmed created), mounted first so
    // the bounded not-found mocks below, mounted after, take priority while
    // still active and fall through to these once exhausted.
    Mock::given(method("GET"))
        .and(path(ip_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/ip/ip-1", "name": "ip-1",
            "properties": { "provisioningState": "Succeeded" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(nic_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/nic/nic-1", "name": "nic-1",
            "properties": { "provisioningState": "Succeeded", "ipConfigurations": [] },
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(vm_path.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/vm/vm-1", "name": "vm-1",
            "properties": {
                "provisioningState": "Succeeded",
                "vmId": "11111111-1111-1111-1111-111111111111",
                "storageProfile": {
                    "osDisk": { "name": "vm-1-osdisk", "managedDisk": { "id": "/disks/vm-1-osdisk" } },
                    "dataDisks": [],
                },
            },
        })))
        .mount(&server)
        .await;

    // First GET on each resource: not found. Mounted after the fallback
    // above and bounded to one use, so it is tried first and then falls
    // through to the fallback on the second request.
    for p in [&ip_path, &nic_path, &vm_path] {
        Mock::given(method("GET"))
            .and(path(p.clone()))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }

    for p in [&ip_path, &nic_path, &vm_path] {
        Mock::given(method("PUT"))
            .and(path(p.clone()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&server)
            .await;
    }

    let pool = fresh_pool();
    let mut worker = fresh_worker(&pool);

    for _ in 0..8 {
        if worker.provider_data.vm.id.is_some() {
            break;
        }
        pipeline::provision::advance(&client, &pool, &mut worker, "https://control-plane.example.invalid")
            .await
            .unwrap();
    }

    assert!(worker.provider_data.ip.id.is_some());
    assert!(worker.provider_data.nic.id.is_some());
    assert_eq!(worker.provider_data.vm.id.as_deref(), Some("/vm/vm-1"));
    assert_eq!(worker.provider_data.disks.len(), 1);
    assert_eq!(worker.provider_data.disks[0].name, "vm-1-osdisk");
    assert_eq!(
        worker.provider_data.disks[0].id.as_deref(),
        Some("/disks/vm-1-osdisk")
    );
}

/// S2: the IP address enters a failed provisioning state; the pipeline
/// surfaces an error rather than treating it as created.
#[tokio::test]
async fn s2_ip_failure_surfaces_as_step_error() {
    let server = MockServer::start().await;
    let client = mock_client(&server).await;

    let ip_path = resource_path("Microsoft.Network/publicIPAddresses", "ip-1");
    Mock::given(method("GET"))
        .and(path(ip_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/ip/ip-1", "name": "ip-1",
            "properties": { "provisioningState": "Failed" },
        })))
        .mount(&server)
        .await;

    let pool = fresh_pool();
    let mut worker = fresh_worker(&pool);

    let result = pipeline::provision::advance(&client, &pool, &mut worker, "https://control-plane.example.invalid").await;
    match result {
        Err(StepError::UnexpectedState { reason }) => {
            assert!(reason.contains("Failed"), "unexpected reason: {reason}");
        }
        other => panic!("expected UnexpectedState, got {other:?}"),
    }
    assert!(worker.provider_data.ip.id.is_none());
}

/// S3: a fully-provisioned worker is torn down VM → NIC → IP, each
/// resource going through its own delete → confirmed-gone dance.
#[tokio::test]
async fn s3_full_removal_deletes_vm_then_nic_then_ip() {
    let server = MockServer::start().await;
    let client = mock_client(&server).await;

    let ip_path = resource_path("Microsoft.Network/publicIPAddresses", "ip-1");
    let nic_path = resource_path("Microsoft.Network/networkInterfaces", "nic-1");
    let vm_path = resource_path("Microsoft.Compute/virtualMachines", "vm-1");

    for p in [&ip_path, &nic_path, &vm_path] {
        Mock::given(method("DELETE"))
            .and(path(p.clone()))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(p.clone()))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "gone" })))
            .mount(&server)
            .await;
    }

    let pool = fresh_pool();
    let mut worker = fresh_worker(&pool);
    worker.provider_data.vm.id = Some("/vm/vm-1".into());
    worker.provider_data.nic.id = Some("/nic/nic-1".into());
    worker.provider_data.ip.id = Some("/ip/ip-1".into());

    let mut errors = Vec::new();
    let mut done = false;
    for _ in 0..12 {
        done = pipeline::removal::advance(&client, &mut worker, &mut errors).await;
        if done {
            break;
        }
    }

    assert!(done, "removal pipeline did not converge: errors={errors:?}");
    assert!(errors.is_empty());
    assert_eq!(worker.state, WorkerState::Stopped);
    assert!(worker.provider_data.vm.id.is_none());
    assert!(worker.provider_data.nic.id.is_none());
    assert!(worker.provider_data.ip.id.is_none());
}

/// S6: a worker persisted under the legacy singular `disk` field is
/// migrated to `disks` the first time it is touched, and the migration is
/// idempotent on every pass after that.
#[test]
fn s6_legacy_disk_field_migrates_once() {
    let pool = fresh_pool();
    let mut worker = fresh_worker(&pool);
    worker.provider_data.disk = Some(DiskRef::new("legacy-disk"));

    assert!(worker.provider_data.migrate_legacy_disk());
    assert_eq!(worker.provider_data.disks.len(), 1);
    assert_eq!(worker.provider_data.disks[0].name, "legacy-disk");
    assert!(worker.provider_data.disk.is_none());

    assert!(!worker.provider_data.migrate_legacy_disk());
    assert_eq!(worker.provider_data.disks.len(), 1);
}
