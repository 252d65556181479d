//! Sequential block runner.
//!
//! This module provides the baseline runner that executes every block in
//! order with a single [`TokenVm`] invocation.

use super::{BlockRunner, ExecutionResult};
use crate::{TokenVm, Workload};
use group_executor::{
    BlockExecutionError, CancellationToken, PartialStateOverlay, SequentialExecutor,
    StateSnapshot, TransactionStatus,
};
use std::time::Instant;
use tracing::debug;

/// Runner that executes each block's transactions one at a time.
///
/// # Example
///
/// ```
/// use block_exec::{BlockRunner, SequentialRunner, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig::default());
///
/// let (_state, result) = SequentialRunner::new().run(&workload).unwrap();
///
/// println!("Successful: {}, Failed: {}", result.successful, result.failed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialRunner {
    vm: TokenVm,
}

impl SequentialRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockRunner for SequentialRunner {
    fn run(
        &self,
        workload: &Workload,
    ) -> Result<(StateSnapshot, ExecutionResult), BlockExecutionError> {
        let genesis = workload.genesis();
        let cancel = CancellationToken::new();
        let mut overlay = PartialStateOverlay::new();
        let mut result = ExecutionResult::default();

        let start = Instant::now();
        for block in &workload.blocks {
            let records = self
                .vm
                .execute(&block.transactions, &genesis, &overlay, &cancel)
                .map_err(BlockExecutionError::Serial)?;

            for record in &records {
                match record.status {
                    TransactionStatus::Mined => result.successful += 1,
                    _ => result.failed += 1,
                }
            }
            overlay = PartialStateOverlay::merge(Some(&overlay), &records);
            result.blocks += 1;
            debug!(height = block.header.height, txs = records.len(), "block executed");
        }
        result.duration = start.elapsed();

        Ok((genesis.apply(&overlay), result))
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
