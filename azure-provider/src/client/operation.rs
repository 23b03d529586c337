//! Operation Poller (`handleOperation`, SPEC_FULL.md §4.6): resolves an
//! Azure async-operation URL to one of "still running" / "done" / "gone".

use common_lib::types::OperationHandle;
use tracing::warn;

use super::ArmClient;
use crate::gateway::Bucket;

/// Outcome of polling one [`OperationHandle`].
#[derive(Debug, Eq, PartialEq)]
pub enum PollOutcome {
    InProgress,
    /// The operation finished (successfully or with a reported error, which
    /// has already been appended to the pool's error list by the caller).
    Done,
    /// 404 on the poll URL itself: treated as gone per SPEC_FULL.md §4.6.
    Gone,
}

impl ArmClient {
    /// Poll `handle`, returning the outcome and, if the operation body
    /// reported an error, that error's message for the caller to attach to
    /// the pool's error list.
    pub async fn poll_operation(
        &self,
        handle: &OperationHandle,
    ) -> (PollOutcome, Option<String>) {
        let result = self
            .gateway
            .enqueue(Bucket::OpRead, || self.get_raw(handle.url.as_str()))
            .await;

        match result {
            Err(err) if err.is_not_found() => (PollOutcome::Gone, None),
            Err(err) => {
                // A transport or unexpected-status error while polling is
                // treated conservatively as "still running" so the caller
                // retries next pass rather than acting on a guess.
                warn!(%err, url = %handle.url, "operation poll failed, assuming in-progress");
                (PollOutcome::InProgress, None)
            }
            Ok(body) => {
                let status: super::models::OperationStatusBody =
                    match serde_json::from_str(&body) {
                        Ok(s) => s,
                        Err(_) => return (PollOutcome::Done, None),
                    };
                if status.status == "InProgress" {
                    (PollOutcome::InProgress, None)
                } else if let Some(error) = status.error {
                    (PollOutcome::Done, Some(error.message))
                } else {
                    (PollOutcome::Done, None)
                }
            }
        }
    }
}
