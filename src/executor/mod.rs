//! Block execution strategies.
//!
//! This module provides the [`BlockRunner`] trait and implementations for
//! executing a [`Workload`] block by block. Every runner starts from the
//! workload's genesis state and chains each block's pending overlay into the
//! next block, so all runners are comparable on their final state.

mod parallel;
mod sequential;

pub use parallel::GroupedRunner;
pub use sequential::SequentialRunner;

use crate::Workload;
use group_executor::{BlockExecutionError, StateSnapshot};
use std::time::Duration;

/// Result of executing a workload.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Number of mined transactions.
    pub successful: usize,
    /// Number of failed transactions (reverted, unroutable or cancelled).
    pub failed: usize,
    /// Number of transactions demoted by conflict resolution.
    pub conflicted: usize,
    /// Number of blocks executed.
    pub blocks: usize,
    /// Number of groups executed in parallel phases.
    pub groups: usize,
    /// Number of groups rejected by conflict resolution.
    pub conflicting_groups: usize,
    /// Time spent executing blocks.
    pub duration: Duration,
}

impl ExecutionResult {
    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.conflicted
    }

    /// Transactions per second over the execution time.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total() as f64 / secs
        } else {
            0.0
        }
    }
}

/// Trait for different block execution strategies.
///
/// # Implementing a New Runner
///
/// ```ignore
/// use block_exec::{BlockRunner, ExecutionResult, Workload};
/// use group_executor::{BlockExecutionError, StateSnapshot};
///
/// pub struct ReplayRunner;
///
/// impl BlockRunner for ReplayRunner {
///     fn run(
///         &self,
///         workload: &Workload,
///     ) -> Result<(StateSnapshot, ExecutionResult), BlockExecutionError> {
///         // Your implementation here
///         todo!()
///     }
/// }
/// ```
pub trait BlockRunner {
    /// Executes every block of the workload on top of its genesis state.
    ///
    /// # Returns
    /// A tuple of (final state, execution result).
    fn run(&self, workload: &Workload)
        -> Result<(StateSnapshot, ExecutionResult), BlockExecutionError>;

    /// Returns a human-readable name for this runner.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResourceGrouper, SenderGrouper, WorkloadConfig};
    use group_executor::{ExecutorConfig, SerialGrouper};
    use proptest::prelude::*;

    fn workload(conflict_factor: f64, seed: u64) -> Workload {
        Workload::generate(WorkloadConfig {
            num_accounts: 30,
            num_transactions: 120,
            transactions_per_block: 40,
            conflict_factor,
            unroutable_ratio: 0.05,
            system_ratio: 0.05,
            seed,
        })
    }

    #[test]
    fn test_serial_grouper_matches_sequential() {
        let workload = workload(0.5, 7);
        let (expected, baseline) = SequentialRunner::new().run(&workload).unwrap();
        let (state, result) = GroupedRunner::new(ExecutorConfig { num_threads: 4 }, SerialGrouper)
            .run(&workload)
            .unwrap();

        assert_eq!(state, expected);
        assert_eq!(result.conflicted, 0);
        assert_eq!(result.groups, 0);
        // The only difference: unroutable calls fail with a different message.
        assert_eq!(result.successful, baseline.successful);
        assert_eq!(result.total(), 120);
    }

    #[test]
    fn test_sender_grouper_accounts_for_every_transaction() {
        let workload = workload(0.9, 3);
        let (_, result) = GroupedRunner::new(ExecutorConfig { num_threads: 4 }, SenderGrouper)
            .run(&workload)
            .unwrap();

        assert_eq!(result.total(), 120);
        assert_eq!(result.blocks, 3);
        assert!(result.conflicting_groups <= result.groups);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn resource_grouping_matches_sequential(
            conflict_factor in 0.0f64..1.0,
            seed in any::<u64>(),
            num_threads in 1usize..6,
        ) {
            let workload = workload(conflict_factor, seed);
            let (expected, baseline) = SequentialRunner::new().run(&workload).unwrap();
            let (state, result) =
                GroupedRunner::new(ExecutorConfig { num_threads }, ResourceGrouper)
                    .run(&workload)
                    .unwrap();

            prop_assert_eq!(state, expected);
            prop_assert_eq!(result.conflicted, 0);
            prop_assert_eq!(result.successful, baseline.successful);
            prop_assert_eq!(result.failed, baseline.failed);
        }
    }
}
