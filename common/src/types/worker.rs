use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::azure::AzureProviderData;
use crate::store::definitions::{ObjectKey, StorableObject};

/// Lifecycle state of a worker (SPEC_FULL.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    Requested,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    /// `stopped` is terminal; no field mutates further.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped)
    }
}

/// One VM + its IP, NIC and disks, plus the persistent record tracking
/// them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub worker_pool_id: String,
    /// Azure location; the original system reuses this field name for both
    /// concepts.
    pub worker_group: String,
    /// The VM name, and the worker's own identity.
    pub worker_id: String,

    pub state: WorkerState,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub capacity: i64,

    pub provider_data: AzureProviderData,
}

impl Worker {
    /// `workerId` must be ≤ 38 chars and match
    /// `[a-z]([-a-z0-9]*[a-z0-9])?` (SPEC_FULL.md §3).
    pub fn is_valid_worker_id(id: &str) -> bool {
        if id.is_empty() || id.len() > 38 {
            return false;
        }
        let chars: Vec<char> = id.chars().collect();
        if !chars[0].is_ascii_lowercase() {
            return false;
        }
        if chars.len() == 1 {
            return true;
        }
        let last = chars[chars.len() - 1];
        if !(last.is_ascii_lowercase() || last.is_ascii_digit()) {
            return false;
        }
        chars[1..chars.len() - 1]
            .iter()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
    }

    /// A worker in `stopping` has had at least one delete requested;
    /// transition to `stopped` requires all four resource classes
    /// verified gone.
    pub fn all_resources_gone(&self) -> bool {
        self.provider_data.vm.id.is_none()
            && self.provider_data.nic.id.is_none()
            && self.provider_data.ip.id.is_none()
            && self.provider_data.disks.iter().all(|d| d.id.is_none())
    }
}

/// Key identifying one [`Worker`]: `worker/<poolId>/<workerId>`.
#[derive(Clone, Debug)]
pub struct WorkerKey {
    pub worker_pool_id: String,
    pub worker_id: String,
}

impl WorkerKey {
    pub fn new(worker_pool_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            worker_pool_id: worker_pool_id.into(),
            worker_id: worker_id.into(),
        }
    }
}

impl ObjectKey for WorkerKey {
    fn key(&self) -> String {
        format!("worker/{}/{}", self.worker_pool_id, self.worker_id)
    }
}

impl StorableObject for Worker {
    type Key = WorkerKey;

    fn object_key(&self) -> Self::Key {
        WorkerKey::new(self.worker_pool_id.clone(), self.worker_id.clone())
    }
}

/// Key prefix under which every worker of a pool lives, for `listByPool`.
pub fn worker_pool_prefix(worker_pool_id: &str) -> String {
    format!("worker/{}/", worker_pool_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_worker_ids() {
        assert!(Worker::is_valid_worker_id("a"));
        assert!(Worker::is_valid_worker_id("vm-abc123"));
        assert!(Worker::is_valid_worker_id("a1"));
        assert!(Worker::is_valid_worker_id(&"a".repeat(38)));
    }

    #[test]
    fn invalid_worker_ids() {
        assert!(!Worker::is_valid_worker_id(""));
        assert!(!Worker::is_valid_worker_id(&"a".repeat(39)));
        assert!(!Worker::is_valid_worker_id("Abc"));
        assert!(!Worker::is_valid_worker_id("1abc"));
        assert!(!Worker::is_valid_worker_id("abc-"));
        assert!(!Worker::is_valid_worker_id("abc_def"));
    }
}
