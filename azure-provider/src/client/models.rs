//! Azure ARM request/response shapes needed by the Step Engine. Only the
//! fields the reconciler actually reads or writes are modeled; everything
//! else round-trips through `serde_json::Value`. Field names follow
//! Azure's actual camelCase wire casing explicitly rather than via a
//! blanket `rename_all`, since ARM's own casing is inconsistent
//! (`publicIPAddress`, not `publicIpAddress`).
//!
//! *Caveat:* SPEC_FULL.md scopes this provider to a single cloud (Azure);
//! a multi-cloud provider would pull these shapes and their `rename`s out
//! behind a per-cloud trait instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Generic envelope every ARM resource (VM, NIC, public IP, disk) is
/// wrapped in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArmResource<P> {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub properties: P,
}

/// `provisioningState` values the scanner and step engine classify
/// against (SPEC_FULL.md §4.3, §4.7).
pub const FAIL_PROVISIONING_STATES: &[&str] =
    &["Failed", "Deleting", "Canceled", "Deallocating"];

pub const HEALTHY_PROVISIONING_STATES: &[&str] = &["Succeeded", "Creating", "Updating"];

pub const DELETING_PROVISIONING_STATES: &[&str] = &["Deleting", "Deallocating", "Deallocated"];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublicIpProperties {
    #[serde(
        rename = "publicIPAllocationMethod",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub public_ip_allocation_method: Option<String>,
    #[serde(rename = "provisioningState", skip_serializing_if = "Option::is_none", default)]
    pub provisioning_state: Option<String>,
}

pub type PublicIpAddress = ArmResource<PublicIpProperties>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IpConfigurationProperties {
    #[serde(
        rename = "privateIPAllocationMethod",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub private_ip_allocation_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subnet: Option<SubResource>,
    #[serde(
        rename = "publicIPAddress",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub public_ip_address: Option<SubResource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub name: String,
    pub properties: IpConfigurationProperties,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkInterfaceProperties {
    #[serde(rename = "provisioningState", skip_serializing_if = "Option::is_none", default)]
    pub provisioning_state: Option<String>,
    #[serde(rename = "ipConfigurations", default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

pub type NetworkInterface = ArmResource<NetworkInterfaceProperties>;

/// A reference by resource id, the shape Azure uses everywhere it embeds
/// one resource inside another (`subnet`, `publicIPAddress`, `networkInterfaces`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagedDiskParameters {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OsDisk {
    pub name: String,
    #[serde(rename = "managedDisk", skip_serializing_if = "Option::is_none", default)]
    pub managed_disk: Option<ManagedDiskParameters>,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataDisk {
    pub name: String,
    #[serde(rename = "managedDisk", skip_serializing_if = "Option::is_none", default)]
    pub managed_disk: Option<ManagedDiskParameters>,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageProfile {
    #[serde(rename = "osDisk")]
    pub os_disk: OsDisk,
    #[serde(rename = "dataDisks", default)]
    pub data_disks: Vec<DataDisk>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkInterfaceReference {
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(rename = "networkInterfaces", default)]
    pub network_interfaces: Vec<NetworkInterfaceReference>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub code: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceStatus>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VmProperties {
    #[serde(rename = "provisioningState", skip_serializing_if = "Option::is_none", default)]
    pub provisioning_state: Option<String>,
    #[serde(rename = "vmId", skip_serializing_if = "Option::is_none", default)]
    pub vm_id: Option<String>,
    #[serde(rename = "storageProfile", skip_serializing_if = "Option::is_none", default)]
    pub storage_profile: Option<StorageProfile>,
    #[serde(rename = "networkProfile", skip_serializing_if = "Option::is_none", default)]
    pub network_profile: Option<NetworkProfile>,
    #[serde(rename = "instanceView", skip_serializing_if = "Option::is_none", default)]
    pub instance_view: Option<InstanceView>,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

pub type VirtualMachine = ArmResource<VmProperties>;

/// Shape of an async-operation poll response (SPEC_FULL.md §4.6).
#[derive(Clone, Debug, Deserialize)]
pub struct OperationStatusBody {
    pub status: String,
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OperationError {
    pub message: String,
}
