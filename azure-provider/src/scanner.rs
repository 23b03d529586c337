//! Scanner (`checkWorker`, SPEC_FULL.md §4.7): per-scan-pass classification
//! and transition driver. Workers are dispatched concurrently with a
//! bounded fan-out (SPEC_FULL.md §4.7.1); the per-pool `seen`/`errors`
//! maps are updated atomically per key.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common_lib::store::Store;
use common_lib::types::{Worker, WorkerKey, WorkerPool, WorkerState};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::client::models::{FAIL_PROVISIONING_STATES, HEALTHY_PROVISIONING_STATES};
use crate::client::ArmClient;
use crate::notify::{NotifyHook, PoolErrorReport};
use crate::pipeline;
use crate::store_ext;

const DEFAULT_SCAN_CONCURRENCY: usize = 32;
const DEFAULT_REGISTRATION_WINDOW_MS: i64 = 96 * 60 * 60 * 1_000;

fn expiry_extension() -> chrono::Duration {
    chrono::Duration::weeks(1)
}

fn expiry_refresh_threshold() -> chrono::Duration {
    chrono::Duration::days(1)
}

/// Per-pass `seen`/`errors` accumulators, reset by [`scan_prepare`] and
/// drained by [`scan_cleanup`].
#[derive(Default)]
pub struct ScanAccumulator {
    seen: Mutex<HashMap<String, i64>>,
    errors: Mutex<HashMap<String, Vec<String>>>,
}

impl ScanAccumulator {
    pub fn record_seen(&self, pool_id: &str, capacity: i64) {
        *self.seen.lock().entry(pool_id.to_string()).or_insert(0) += capacity;
        debug!(event = "scanSeen", worker_pool_id = %pool_id, capacity, "healthy worker counted toward pool capacity");
    }

    pub fn record_error(&self, pool_id: &str, message: String) {
        self.errors
            .lock()
            .entry(pool_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn seen_for(&self, pool_id: &str) -> i64 {
        self.seen.lock().get(pool_id).copied().unwrap_or(0)
    }
}

/// `scanPrepare()`: a fresh per-pass accumulator.
pub fn scan_prepare() -> ScanAccumulator {
    ScanAccumulator::default()
}

/// `scanCleanup()`: report every accumulated error to its still-extant
/// pool via the notify hook.
pub async fn scan_cleanup<S: Store>(store: &S, notify: &dyn NotifyHook, accumulator: &ScanAccumulator) {
    let errors = std::mem::take(&mut *accumulator.errors.lock());
    for (pool_id, messages) in errors {
        let key = common_lib::types::pool::PoolKey::new(pool_id.clone());
        if store.get_obj::<WorkerPool>(&key).await.is_err() {
            continue;
        }
        for message in messages {
            notify
                .notify_pool_error(PoolErrorReport {
                    worker_pool_id: pool_id.clone(),
                    worker_id: None,
                    kind: "scan-error",
                    reason: message,
                })
                .await;
        }
    }
}

fn power_state_codes(iv: &crate::client::models::InstanceView) -> Vec<String> {
    iv.statuses
        .iter()
        .filter(|s| s.code.starts_with("PowerState/"))
        .map(|s| s.code.clone())
        .collect()
}

/// `checkWorker` for one worker (SPEC_FULL.md §4.7).
#[instrument(skip(client, store, pool, accumulator), fields(worker_id = %worker_key.worker_id))]
async fn check_worker<S: Store>(
    client: &ArmClient,
    store: &S,
    pool: &WorkerPool,
    worker_key: &WorkerKey,
    accumulator: &ScanAccumulator,
    root_url: &str,
) {
    let pool_id = pool.worker_pool_id.clone();
    let result = store_ext::update_async(store, worker_key, |mut worker: Worker| {
        let pool_id = pool_id.clone();
        async move {
            if worker.state == WorkerState::Stopped {
                return worker;
            }

            if worker.provider_data.migrate_legacy_disk() {
                debug!(worker_id = %worker.worker_id, "migrated legacy disk field");
            }

            let prior_state = worker.state;
            let vm_name = worker.provider_data.vm.name.clone();
            match client.get_virtual_machine(&vm_name).await {
                Ok(vm) => {
                    let provisioning_state =
                        vm.properties.provisioning_state.clone().unwrap_or_default();
                    let power_states = match client.get_virtual_machine_instance_view(&vm_name).await {
                        Ok(iv) => power_state_codes(&iv),
                        Err(_) => Vec::new(),
                    };

                    let healthy = HEALTHY_PROVISIONING_STATES.contains(&provisioning_state.as_str())
                        && power_states
                            .iter()
                            .any(|s| s == "PowerState/running" || s == "PowerState/starting");
                    let failed = FAIL_PROVISIONING_STATES.contains(&provisioning_state.as_str())
                        || power_states.iter().any(|s| {
                            matches!(
                                s.as_str(),
                                "PowerState/stopping"
                                    | "PowerState/stopped"
                                    | "PowerState/deallocating"
                                    | "PowerState/deallocated"
                            )
                        });

                    if healthy {
                        accumulator.record_seen(&pool_id, worker.capacity);
                        let now = Utc::now();
                        if worker.expires - now < expiry_refresh_threshold() {
                            worker.expires = now + expiry_extension();
                        }
                        let past_terminate_after = worker
                            .provider_data
                            .terminate_after
                            .map(|t| t <= now)
                            .unwrap_or(false);
                        if past_terminate_after {
                            let mut errors = Vec::new();
                            pipeline::removal::advance(client, &mut worker, &mut errors).await;
                            for message in errors {
                                accumulator.record_error(&pool_id, message);
                            }
                        }
                    } else if failed {
                        let mut errors = Vec::new();
                        pipeline::removal::advance(client, &mut worker, &mut errors).await;
                        for message in errors {
                            accumulator.record_error(&pool_id, message);
                        }
                    } else {
                        accumulator.record_error(
                            &pool_id,
                            format!(
                                "worker {} in unexpected state: provisioningState={} powerStates={:?}",
                                worker.worker_id, provisioning_state, power_states
                            ),
                        );
                    }
                }
                Err(e) if e.is_not_found() => match worker.state {
                    WorkerState::Requested => {
                        if let Err(err) = pipeline::provision::advance(client, pool, &mut worker, root_url).await
                        {
                            accumulator.record_error(&pool_id, err.to_string());
                            let mut errors = Vec::new();
                            pipeline::removal::advance(client, &mut worker, &mut errors).await;
                            for message in errors {
                                accumulator.record_error(&pool_id, message);
                            }
                        }
                    }
                    _ => {
                        let mut errors = Vec::new();
                        pipeline::removal::advance(client, &mut worker, &mut errors).await;
                        for message in errors {
                            accumulator.record_error(&pool_id, message);
                        }
                    }
                },
                Err(e) => {
                    warn!(worker_id = %worker.worker_id, error = %e, "unexpected error checking worker");
                    accumulator.record_error(&pool_id, e.to_string());
                }
            }

            let now = Utc::now();
            worker.last_checked = now;
            if worker.state != prior_state {
                worker.last_modified = now;
            }
            worker
        }
    })
    .await;

    if let Err(e) = result {
        warn!(worker_id = %worker_key.worker_id, error = %e, "store error during checkWorker");
    }
}

/// One full scan pass: fan out `check_worker` over every worker of every
/// pool, bounded to `concurrency` concurrent workers
/// (SPEC_FULL.md §4.7.1).
pub async fn scan_all<S: Store>(
    client: Arc<ArmClient>,
    store: Arc<S>,
    accumulator: &ScanAccumulator,
    root_url: &str,
    concurrency: Option<usize>,
) {
    let pools: Vec<WorkerPool> = match store.list_prefix("worker-pool/").await {
        Ok(pools) => pools,
        Err(e) => {
            warn!(error = %e, "failed to list worker pools for scan");
            return;
        }
    };

    let mut work = Vec::new();
    for pool in pools {
        let prefix = common_lib::types::worker::worker_pool_prefix(&pool.worker_pool_id);
        let workers: Vec<Worker> = match store.list_prefix(&prefix).await {
            Ok(workers) => workers,
            Err(e) => {
                warn!(worker_pool_id = %pool.worker_pool_id, error = %e, "failed to list workers");
                continue;
            }
        };
        for worker in workers {
            work.push((pool.clone(), WorkerKey::new(worker.worker_pool_id, worker.worker_id)));
        }
    }

    stream::iter(work)
        .for_each_concurrent(concurrency.unwrap_or(DEFAULT_SCAN_CONCURRENCY), |(pool, key)| {
            let client = client.clone();
            let store = store.clone();
            async move {
                check_worker(&client, &*store, &pool, &key, accumulator, root_url).await;
            }
        })
        .await;
}

pub const DEFAULT_REGISTRATION_WINDOW: i64 = DEFAULT_REGISTRATION_WINDOW_MS;
