pub mod azure;
pub mod pool;
pub mod worker;

pub use azure::{AzureProviderData, DiskRef, OperationHandle, OperationMethod, ResourceRef, VmRef};
pub use pool::{
    HardwareProfile, LaunchConfig, Lifecycle, PoolError, StorageProfile, WorkerPool, WorkerPoolConfig,
};
pub use worker::{Worker, WorkerKey, WorkerState};

/// Sentinel `providerId` meaning "this pool's provider is scheduled for
/// deletion" (see [`WorkerPool`]).
pub const NULL_PROVIDER_ID: &str = "null-provider";

/// Reserved tag keys that always overwrite any user-supplied value of the
/// same name when a worker's VM is created.
pub const RESERVED_TAG_KEYS: &[&str] = &[
    "created-by",
    "managed-by",
    "provider-id",
    "worker-group",
    "worker-pool-id",
    "root-url",
    "owner",
];
