//! `NotifyHook`: the injected singleton that `creation-error`/`operation-error`
//! reports flow through (SPEC_FULL.md §7.1). The real notification service
//! is an out-of-scope external collaborator; the default implementation
//! just logs.

use async_trait::async_trait;
use tracing::error;

/// A pool-scoped error report, surfaced by the Scanner and Removal Pipeline
/// via `scanCleanup` (SPEC_FULL.md §4.7, §4.5).
#[derive(Clone, Debug)]
pub struct PoolErrorReport {
    pub worker_pool_id: String,
    pub worker_id: Option<String>,
    pub kind: &'static str,
    pub reason: String,
}

#[async_trait]
pub trait NotifyHook: Send + Sync {
    async fn notify_pool_error(&self, report: PoolErrorReport);
}

/// Logs the report at `error` level with the structured fields named in
/// SPEC_FULL.md §6 (`registrationErrorWarning` and friends share this
/// shape).
pub struct TracingNotifyHook;

#[async_trait]
impl NotifyHook for TracingNotifyHook {
    async fn notify_pool_error(&self, report: PoolErrorReport) {
        error!(
            worker_pool_id = %report.worker_pool_id,
            worker_id = report.worker_id.as_deref().unwrap_or("-"),
            kind = report.kind,
            reason = %report.reason,
            "pool error reported"
        );
    }
}
