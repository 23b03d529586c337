//! Azure-specific `providerData` bag for a [`crate::types::worker::Worker`].
//!
//! The original system models `providerData` as a free-form object; here it
//! is a typed struct per the Azure variant, with the reserved fields named
//! explicitly and only `tags`/`workerConfig` left as opaque maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// The HTTP method that started an in-flight async operation, needed to
/// make sense of the operation's poll semantics.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OperationMethod {
    Create,
    Delete,
}

/// A handle to an Azure async-operation (the `Azure-AsyncOperation` header
/// value returned by `begin*` calls). Stored verbatim; see the Open
/// Question in SPEC_FULL.md §9.1 about why it is never consulted on
/// deletion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationHandle {
    pub url: Url,
    pub method: OperationMethod,
}

/// Identity + provisioning state tracked for a single non-VM resource (IP
/// address or NIC).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    /// Stable name, assigned once at worker creation; the idempotency key
    /// for every cloud call against this resource.
    pub name: String,
    /// Present only while a create/delete is in flight.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation: Option<OperationHandle>,
    /// Present once the resource is confirmed to exist.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: None,
            id: None,
        }
    }

    /// `id` present ⇒ resource exists and is fully created.
    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    /// `operation` present and `id` absent ⇒ a create/delete is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.operation.is_some() && self.id.is_none()
    }
}

/// A managed disk attached to the VM. Disks are only known once the VM
/// creation response is read back (see SPEC_FULL.md §4.4 step 3), so there
/// is no meaningful "name assigned before VM creation" phase the way there
/// is for IP/NIC.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation: Option<OperationHandle>,
}

impl DiskRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            operation: None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }
}

/// The VM resource itself. `config` is the opaque launch-config-derived ARM
/// request body (hardware/storage/os/network profiles); admin credentials
/// are generated fresh on every provisioning attempt and never persisted
/// here (SPEC_FULL.md §4.4).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmRef {
    pub name: String,
    pub computer_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation: Option<OperationHandle>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    /// Azure's `vmId` (a UUID distinct from the ARM resource id), populated
    /// once observed via a GET; this is what `registerWorker` matches
    /// against the attested-data document's payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vm_id: Option<String>,
}

impl VmRef {
    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }
}

/// Everything the Azure provider needs to remember about one worker's cloud
/// resources. One instance per [`crate::types::worker::Worker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AzureProviderData {
    pub location: String,
    pub resource_group_name: String,
    pub subnet_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub vm: VmRef,
    pub ip: ResourceRef,
    pub nic: ResourceRef,
    #[serde(default)]
    pub disks: Vec<DiskRef>,

    /// Legacy singular disk field kept only so the scanner's one-time
    /// migration (SPEC_FULL.md §4.7 step 1 / scenario S6) has something to
    /// migrate away; new code must never populate this.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub disk: Option<DiskRef>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub terminate_after: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reregistration_timeout_ms: Option<i64>,
    #[serde(default)]
    pub worker_config: BTreeMap<String, serde_json::Value>,
}

impl AzureProviderData {
    /// Apply the reserved tags, unconditionally overwriting any
    /// user-supplied value with the same key (SPEC_FULL.md §3, testable
    /// property 6).
    pub fn apply_reserved_tags(&mut self, reserved: BTreeMap<&'static str, String>) {
        for (key, value) in reserved {
            self.tags.insert(key.to_string(), value);
        }
    }

    /// Migrate the legacy singular `disk` field into `disks`, per
    /// SPEC_FULL.md §4.7 step 1. Idempotent: a no-op once `disks` is
    /// non-empty or `disk` was never set.
    ///
    /// Returns `true` if a migration actually happened.
    pub fn migrate_legacy_disk(&mut self) -> bool {
        if self.disks.is_empty() {
            if let Some(disk) = self.disk.take() {
                self.disks.push(disk);
                return true;
            }
        }
        false
    }
}
