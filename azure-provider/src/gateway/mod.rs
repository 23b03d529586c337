//! Rate-Limited Cloud Gateway (SPEC_FULL.md §4.1): every outgoing cloud
//! call is wrapped in a named token bucket and a bounded retry-with-backoff
//! loop, the way the Step Engine and the Registration Verifier's VM GET
//! both need to without duplicating retry logic.

pub mod backoff;

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tracing::{debug, warn};

use crate::config::RateLimits;
use crate::error::GatewayError;
use backoff::Classification;

/// The token buckets every cloud call is filed under (SPEC_FULL.md §4.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Bucket {
    Query,
    Get,
    List,
    OpRead,
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DEFAULT_REFILL: Duration = Duration::from_secs(100);
const DEFAULT_CAP: u32 = 2_000;
const DEFAULT_MAX_TRIES: u32 = 5;

fn build_limiter(cap: Option<u32>) -> Limiter {
    let burst = NonZeroU32::new(cap.unwrap_or(DEFAULT_CAP)).unwrap_or_else(|| NonZeroU32::new(DEFAULT_CAP).unwrap());
    let quota = Quota::with_period(DEFAULT_REFILL)
        .expect("refill period is non-zero")
        .allow_burst(burst);
    RateLimiter::direct(quota)
}

/// The rate-limited cloud gateway, held in [`crate::context::Context`] the
/// same way the teacher holds its `Registry` as shared process state.
pub struct Gateway {
    query: Limiter,
    get: Limiter,
    list: Limiter,
    op_read: Limiter,
    backoff_base: Duration,
    max_tries: u32,
}

impl Gateway {
    pub fn new(limits: &RateLimits, backoff_base: Duration) -> Self {
        Self {
            query: build_limiter(limits.query),
            get: build_limiter(limits.get),
            list: build_limiter(limits.list),
            op_read: build_limiter(limits.op_read),
            backoff_base,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    fn limiter(&self, bucket: Bucket) -> &Limiter {
        match bucket {
            Bucket::Query => &self.query,
            Bucket::Get => &self.get,
            Bucket::List => &self.list,
            Bucket::OpRead => &self.op_read,
        }
    }

    /// Run `thunk` through `bucket`'s token bucket and the backoff
    /// classifier, retrying transient failures up to `max_tries` times.
    /// 4xx errors other than 429 are never retried, so the Step Engine can
    /// tell 404 (resource-absent) apart from real failures.
    #[tracing::instrument(skip(self, thunk), fields(bucket = ?bucket))]
    pub async fn enqueue<T, F, Fut>(&self, bucket: Bucket, mut thunk: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut tries = 0u32;
        loop {
            self.limiter(bucket).until_ready().await;
            match thunk().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(status) = err.status() else {
                        return Err(err);
                    };
                    tries += 1;
                    if tries >= self.max_tries {
                        warn!(tries, status, "cloud call exhausted retries");
                        return Err(err);
                    }
                    match backoff::classify(status, tries, self.backoff_base) {
                        Classification::Retry(delay) => {
                            debug!(?delay, tries, status, "retrying cloud call after backoff");
                            tokio::time::sleep(delay).await;
                        }
                        Classification::Propagate => return Err(err),
                    }
                }
            }
        }
    }
}
