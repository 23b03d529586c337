//! Removal Pipeline (`removeWorker`, SPEC_FULL.md §4.5): reverse-order
//! deletion VM → NIC → IP → disks. Errors during deletion are appended to
//! the caller's per-pool error list rather than aborting the pipeline —
//! the next scanner pass retries.

use chrono::Utc;
use common_lib::types::{Worker, WorkerState};
use tracing::{info, instrument};

use crate::client::ArmClient;
use crate::steps::{self, ResourceKind};

/// Advance the removal pipeline for `worker` by as many steps as are
/// currently unblocked (each step still individually gated on the
/// previous resource class being verified gone). Returns `true` once the
/// worker has reached `stopped`. Deletion errors are pushed onto `errors`
/// and stop this pass's progress without returning an `Err`, matching
/// SPEC_FULL.md §4.5's "retried next pass" policy.
#[instrument(skip(client, worker, errors), fields(worker_id = %worker.worker_id))]
pub async fn advance(client: &ArmClient, worker: &mut Worker, errors: &mut Vec<String>) -> bool {
    if worker.state == WorkerState::Stopped {
        return true;
    }
    worker.state = WorkerState::Stopping;

    macro_rules! step {
        ($kind:expr, $id_getter:expr) => {{
            match steps::remove_resource(client, worker, $kind).await {
                Ok(gone) => {
                    if !gone || $id_getter(worker).is_some() {
                        return false;
                    }
                }
                Err(e) => {
                    errors.push(e.to_string());
                    return false;
                }
            }
        }};
    }

    step!(ResourceKind::Vm, |w: &Worker| w.provider_data.vm.id.clone());
    step!(ResourceKind::Nic, |w: &Worker| w.provider_data.nic.id.clone());
    step!(ResourceKind::Ip, |w: &Worker| w.provider_data.ip.id.clone());

    let disk_count = worker.provider_data.disks.len();
    for i in 0..disk_count {
        match steps::remove_resource(client, worker, ResourceKind::Disk(i)).await {
            Ok(gone) => {
                if !gone || worker.provider_data.disks[i].id.is_some() {
                    return false;
                }
            }
            Err(e) => {
                errors.push(e.to_string());
                return false;
            }
        }
    }

    worker.state = WorkerState::Stopped;
    worker.last_modified = Utc::now();
    worker.last_checked = Utc::now();
    info!(event = "workerRemoved", worker_id = %worker.worker_id, "worker fully deprovisioned");
    true
}
