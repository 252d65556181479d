//! Grouped parallel block runner.

use super::{BlockRunner, ExecutionResult};
use crate::{TokenVm, Workload};
use group_executor::{
    BlockExecutionError, CancellationToken, ExecutorConfig, Grouper, ParallelExecutor,
    PartialStateOverlay, StateSnapshot, TransactionStatus,
};
use std::time::Instant;
use tracing::{debug, warn};

/// Runner that executes each block through a grouper and the
/// [`ParallelExecutor`].
///
/// Each block runs on top of the pending overlay left by the previous ones.
pub struct GroupedRunner<G> {
    executor: ParallelExecutor<G, TokenVm>,
}

impl<G: Grouper> GroupedRunner<G> {
    pub fn new(config: ExecutorConfig, grouper: G) -> Self {
        Self {
            executor: ParallelExecutor::new(config, grouper, TokenVm::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.executor.config()
    }
}

impl<G: Grouper> BlockRunner for GroupedRunner<G> {
    fn run(
        &self,
        workload: &Workload,
    ) -> Result<(StateSnapshot, ExecutionResult), BlockExecutionError> {
        let genesis = workload.genesis();
        let cancel = CancellationToken::new();
        let mut overlay: Option<PartialStateOverlay> = None;
        let mut result = ExecutionResult::default();

        let start = Instant::now();
        for block in &workload.blocks {
            let outcome = self.executor.execute_block(
                block.transactions.clone(),
                &block.header,
                &genesis,
                overlay.as_ref(),
                &cancel,
            )?;

            result.successful += outcome.count_status(TransactionStatus::Mined);
            result.failed += outcome.count_status(TransactionStatus::Failed);
            result.conflicted += outcome.conflicting;
            result.groups += outcome.groups;
            result.conflicting_groups += outcome.conflicting_groups;
            result.blocks += 1;

            if outcome.conflicting > 0 {
                warn!(
                    height = block.header.height,
                    conflicting = outcome.conflicting,
                    "block left conflicting transactions unexecuted"
                );
            }
            debug!(
                height = block.header.height,
                accepted = outcome.accepted,
                serial = outcome.serial,
                elapsed_us = outcome.latency_us(),
                "block executed"
            );

            overlay = Some(outcome.state_overlay(overlay.as_ref()));
        }
        result.duration = start.elapsed();

        let state = match &overlay {
            Some(overlay) => genesis.apply(overlay),
            None => genesis,
        };
        Ok((state, result))
    }

    fn name(&self) -> &'static str {
        "grouped"
    }
}
