//! `Estimator`: the injected singleton `provision()` asks for `toSpawn`
//! (SPEC_FULL.md §4.9.1). The real estimator service is an out-of-scope
//! external collaborator; `FixedWindowEstimator` is the reference
//! implementation used by default and by tests.

use common_lib::types::WorkerPool;

/// Capacity currently observed for a pool versus what's been requested of
/// it, as gathered by the Scanner's per-pass `seen` accumulator.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerInfo {
    pub existing_capacity: i64,
    pub requested_capacity: i64,
}

pub trait Estimator: Send + Sync {
    /// How much additional capacity to spawn for `pool`, given `info`.
    /// May be negative in principle but `provision()` treats anything
    /// `<= 0` as "nothing to do".
    fn estimate(&self, pool: &WorkerPool, info: WorkerInfo) -> i64;
}

/// `estimate = requestedCapacity - existingCapacity`, clamped to the
/// pool's `maxCapacity`.
pub struct FixedWindowEstimator;

impl Estimator for FixedWindowEstimator {
    fn estimate(&self, pool: &WorkerPool, info: WorkerInfo) -> i64 {
        let wanted = info
            .requested_capacity
            .saturating_sub(info.existing_capacity)
            .max(0);
        wanted.min(pool.config.max_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_lib::types::{Lifecycle, WorkerPoolConfig};

    fn pool(max_capacity: i64) -> WorkerPool {
        WorkerPool::new(
            "pool-a",
            "azure-east",
            WorkerPoolConfig {
                min_capacity: 0,
                max_capacity,
                lifecycle: Lifecycle::default(),
                launch_configs: vec![],
            },
            "owner",
        )
    }

    #[test]
    fn estimate_clamps_to_max_capacity() {
        let estimator = FixedWindowEstimator;
        let info = WorkerInfo {
            existing_capacity: 0,
            requested_capacity: 100,
        };
        assert_eq!(estimator.estimate(&pool(10), info), 10);
    }

    #[test]
    fn estimate_never_negative() {
        let estimator = FixedWindowEstimator;
        let info = WorkerInfo {
            existing_capacity: 20,
            requested_capacity: 5,
        };
        assert_eq!(estimator.estimate(&pool(10), info), 0);
    }
}
