//! Grouped parallel block executor.
//!
//! A block runs through a fixed sequence of phases:
//!
//! ```text
//! group ─► serial phase ─► merge overlay ─► parallel groups ─► resolve ─► assemble
//! ```
//!
//! Non-parallelizable transactions run first, against the caller's pending
//! overlay. Their effects are folded into a new overlay that every group then
//! executes against concurrently; groups never see each other's writes. The
//! conflict resolver accepts or rejects each group in grouper order and the
//! final record list is assembled as serial, accepted, unroutable, conflicting.

use crate::aggregator::GroupOutcome;
use crate::error::{BlockExecutionError, ExecutionError, Result};
use crate::overlay::{PartialStateOverlay, StateView};
use crate::resolver::resolve;
use crate::scheduler::{Scheduler, Task};
use crate::traits::{GroupedTransactions, Grouper, SequentialExecutor};
use crate::types::{
    BlockHeader, ChainContext, EffectRecord, Transaction, TransactionStatus, TxId,
    EXECUTION_CANCELLED, INVALID_CONTRACT_ADDRESS,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn, Level};

/// Configuration for parallel execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of worker threads for the parallel phase.
    pub num_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

/// Result of executing one block.
#[derive(Debug, Clone, Default)]
pub struct BlockExecutionResult {
    /// One record per input transaction: serial, accepted, unroutable, conflicting.
    pub records: Vec<EffectRecord>,
    /// Number of records from the serial phase.
    pub serial: usize,
    /// Number of records from accepted groups.
    pub accepted: usize,
    /// Number of auto-failed unroutable transactions.
    pub unroutable: usize,
    /// Number of records demoted to [`TransactionStatus::Conflict`].
    pub conflicting: usize,
    /// Number of groups executed in the parallel phase.
    pub groups: usize,
    /// Number of groups rejected by the resolver.
    pub conflicting_groups: usize,
    /// Number of groups failed because of cancellation.
    pub cancelled_groups: usize,
    /// Wall-clock execution time.
    pub duration: Duration,
}

impl BlockExecutionResult {
    /// Number of records with the given status.
    pub fn count_status(&self, status: TransactionStatus) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .count()
    }

    /// Execution time in whole microseconds, saturating at `u64::MAX`.
    pub fn latency_us(&self) -> u64 {
        u64::try_from(self.duration.as_micros()).unwrap_or(u64::MAX)
    }

    /// Pending state after this block: its effects folded on top of `prior`.
    ///
    /// Conflicting records contribute nothing.
    pub fn state_overlay(&self, prior: Option<&PartialStateOverlay>) -> PartialStateOverlay {
        PartialStateOverlay::merge(prior, &self.records)
    }
}

/// Executes blocks by running grouper-approved groups concurrently and
/// resolving conflicts between their outcomes afterwards.
pub struct ParallelExecutor<G, E> {
    config: ExecutorConfig,
    grouper: G,
    executor: E,
}

impl<G, E> ParallelExecutor<G, E>
where
    G: Grouper,
    E: SequentialExecutor,
{
    /// Creates a new parallel executor.
    pub fn new(config: ExecutorConfig, grouper: G, executor: E) -> Self {
        Self {
            config,
            grouper,
            executor,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn grouper(&self) -> &G {
        &self.grouper
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Executes a block of transactions.
    ///
    /// `base` is the committed state of the parent block and `prior` the
    /// pending changes on top of it, if any. Per-transaction failures are
    /// reported in the returned records; an error means the block could not
    /// be built at all.
    #[instrument(level = Level::DEBUG, skip_all, fields(
        height = header.height,
        tx_count = transactions.len(),
        latency_us = tracing::field::Empty,
    ))]
    pub fn execute_block(
        &self,
        transactions: Vec<Transaction>,
        header: &BlockHeader,
        base: &dyn StateView,
        prior: Option<&PartialStateOverlay>,
        cancel: &CancellationToken,
    ) -> Result<BlockExecutionResult> {
        let start = Instant::now();
        let expected = transactions.len();
        if cancel.is_cancelled() {
            return Err(BlockExecutionError::Cancelled);
        }

        let ctx = ChainContext::from_header(header);
        let input_ids: Vec<TxId> = transactions.iter().map(Transaction::id).collect();
        let grouped = self.grouper.group(&ctx, transactions);
        validate_partition(&input_ids, &grouped)?;
        debug!(
            serial = grouped.serial.len(),
            groups = grouped.groups.len(),
            unroutable = grouped.unroutable.len(),
            "grouped transactions"
        );

        let serial_records = self.execute_serial(&grouped.serial, base, prior, cancel)?;
        trace!(count = serial_records.len(), "executed non-parallelizable transactions");

        let merged = PartialStateOverlay::merge(prior, &serial_records);
        let (outcomes, cancelled_groups) =
            self.execute_groups(&grouped.groups, base, &merged, cancel)?;
        trace!(groups = outcomes.len(), "executed parallelizable groups");

        let resolution = resolve(outcomes);
        trace!(
            accepted = resolution.accepted_groups.len(),
            conflicting = resolution.conflicting_groups.len(),
            read_only_keys = resolution.read_only_keys.len(),
            "merged results from parallelizable groups"
        );

        let unroutable_records: Vec<EffectRecord> = grouped
            .unroutable
            .iter()
            .map(|tx| {
                debug!(tx = %tx.id(), to = %tx.to(), "{}", INVALID_CONTRACT_ADDRESS);
                EffectRecord::failed(tx.id(), INVALID_CONTRACT_ADDRESS)
            })
            .collect();

        let mut result = BlockExecutionResult {
            records: Vec::new(),
            serial: serial_records.len(),
            accepted: resolution.accepted.len(),
            unroutable: unroutable_records.len(),
            conflicting: resolution.conflicting.len(),
            groups: grouped.groups.len(),
            conflicting_groups: resolution.conflicting_groups.len(),
            cancelled_groups,
            duration: Duration::ZERO,
        };
        result.records = assemble(
            serial_records,
            resolution.accepted,
            unroutable_records,
            resolution.conflicting,
            expected,
        )?;

        result.duration = start.elapsed();
        tracing::Span::current().record("latency_us", result.latency_us());
        if result.conflicting > 0 {
            warn!(
                conflicting = result.conflicting,
                groups = result.conflicting_groups,
                "transactions demoted by parallel conflict"
            );
        }
        Ok(result)
    }

    fn execute_serial(
        &self,
        transactions: &[Transaction],
        base: &dyn StateView,
        prior: Option<&PartialStateOverlay>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EffectRecord>> {
        if transactions.is_empty() {
            return Ok(Vec::new());
        }

        let empty = PartialStateOverlay::new();
        let overlay = prior.unwrap_or(&empty);
        let records = match self.executor.execute(transactions, base, overlay, cancel) {
            Ok(records) => records,
            Err(ExecutionError::Cancelled) => {
                warn!("cancelled during serial phase");
                return Err(BlockExecutionError::Cancelled);
            }
            Err(err) => return Err(BlockExecutionError::Serial(err)),
        };
        check_records("serial phase", transactions, &records)?;
        Ok(records)
    }

    /// Runs every group on the worker pool and returns their outcomes in
    /// grouper order, plus the number of cancelled groups.
    fn execute_groups(
        &self,
        groups: &[Vec<Transaction>],
        base: &dyn StateView,
        overlay: &PartialStateOverlay,
        cancel: &CancellationToken,
    ) -> Result<(Vec<GroupOutcome>, usize)> {
        if groups.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        let scheduler = Scheduler::new(&sizes);
        let slots: Vec<Mutex<Option<GroupRun>>> = groups.iter().map(|_| Mutex::new(None)).collect();
        let num_workers = self.config.num_threads.clamp(1, groups.len());

        crossbeam::thread::scope(|scope| {
            for worker_id in 0..num_workers {
                let scheduler = &scheduler;
                let slots = &slots;
                scope.spawn(move |_| {
                    self.worker_loop(worker_id, scheduler, slots, groups, base, overlay, cancel)
                });
            }
        })
        .map_err(|_| BlockExecutionError::WorkerPanicked)?;

        let skipped = scheduler.remaining();
        if skipped > 0 {
            debug!(skipped, "groups not started after halt");
        }

        let runs: Vec<Option<GroupRun>> = slots.into_iter().map(|slot| slot.into_inner()).collect();

        // Groups left in the queue after a halt never ran, so which fatal
        // errors were observed depends on timing. Report the lowest group index
        // among them.
        if let Some((group, err)) = runs.iter().enumerate().find_map(|(idx, run)| match run {
            Some(Err(err @ ExecutionError::Fatal(_))) => Some((idx, err.clone())),
            _ => None,
        }) {
            return Err(BlockExecutionError::Group { group, source: err });
        }

        let mut outcomes = Vec::with_capacity(groups.len());
        let mut cancelled = 0;
        for (group_idx, (run, transactions)) in runs.into_iter().zip(groups).enumerate() {
            let records = match run {
                Some(Ok(records)) => {
                    check_records(&format!("group {group_idx}"), transactions, &records)?;
                    records
                }
                Some(Err(ExecutionError::Cancelled)) => {
                    cancelled += 1;
                    transactions
                        .iter()
                        .map(|tx| EffectRecord::failed(tx.id(), EXECUTION_CANCELLED))
                        .collect()
                }
                Some(Err(err)) => {
                    return Err(BlockExecutionError::Group {
                        group: group_idx,
                        source: err,
                    })
                }
                None => {
                    return Err(BlockExecutionError::Group {
                        group: group_idx,
                        source: ExecutionError::Fatal("group was never executed".to_string()),
                    })
                }
            };
            outcomes.push(GroupOutcome::from_records(group_idx, records));
        }

        if cancelled > 0 {
            warn!(cancelled, "groups failed by cancellation");
        }
        Ok((outcomes, cancelled))
    }

    /// Worker thread main loop.
    #[allow(clippy::too_many_arguments)]
    fn worker_loop(
        &self,
        worker_id: usize,
        scheduler: &Scheduler,
        slots: &[Mutex<Option<GroupRun>>],
        groups: &[Vec<Transaction>],
        base: &dyn StateView,
        overlay: &PartialStateOverlay,
        cancel: &CancellationToken,
    ) {
        let mut local_executions = 0;

        while let Task::Execute(group_idx) = scheduler.next_task() {
            local_executions += 1;
            let transactions = &groups[group_idx];

            // A group picked up after cancellation is not started at all.
            let run = if cancel.is_cancelled() {
                Err(ExecutionError::Cancelled)
            } else {
                self.executor.execute(transactions, base, overlay, cancel)
            };

            if let Err(ExecutionError::Fatal(reason)) = &run {
                warn!(worker_id, group = group_idx, %reason, "group failed, halting workers");
                scheduler.halt();
            }

            *slots[group_idx].lock() = Some(run);
        }

        trace!(worker_id, executed = local_executions, "worker done");
    }
}

type GroupRun = std::result::Result<Vec<EffectRecord>, ExecutionError>;

/// Checks that the partition holds exactly the input transactions, each once,
/// and no empty group.
fn validate_partition(input_ids: &[TxId], grouped: &GroupedTransactions) -> Result<()> {
    if let Some(idx) = grouped.groups.iter().position(Vec::is_empty) {
        return Err(BlockExecutionError::GrouperContract(format!("group {idx} is empty")));
    }
    if grouped.len() != input_ids.len() {
        return Err(BlockExecutionError::GrouperContract(format!(
            "partition holds {} transactions, block has {}",
            grouped.len(),
            input_ids.len()
        )));
    }

    let mut remaining: HashMap<TxId, usize> = HashMap::with_capacity(input_ids.len());
    for id in input_ids {
        *remaining.entry(*id).or_insert(0) += 1;
    }
    for tx in grouped.iter() {
        match remaining.get_mut(&tx.id()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                return Err(BlockExecutionError::GrouperContract(format!(
                    "transaction {} is not in the block or appears twice",
                    tx.id()
                )))
            }
        }
    }
    Ok(())
}

/// Orders the block's records as serial, accepted, unroutable, conflicting and
/// checks that every input transaction is accounted for. Conflicting records
/// are demoted only once the totals match.
fn assemble(
    serial: Vec<EffectRecord>,
    accepted: Vec<EffectRecord>,
    unroutable: Vec<EffectRecord>,
    mut conflicting: Vec<EffectRecord>,
    expected: usize,
) -> Result<Vec<EffectRecord>> {
    let accounted = serial.len() + accepted.len() + unroutable.len() + conflicting.len();
    if accounted != expected {
        return Err(BlockExecutionError::AccountingMismatch {
            accounted,
            expected,
        });
    }

    for record in &mut conflicting {
        record.mark_conflict();
    }

    let mut records = Vec::with_capacity(expected);
    records.extend(serial);
    records.extend(accepted);
    records.extend(unroutable);
    records.extend(conflicting);
    Ok(records)
}

/// Checks that an executor returned one record per transaction, in order,
/// and that every changed key is also recorded as accessed.
fn check_records(phase: &str, transactions: &[Transaction], records: &[EffectRecord]) -> Result<()> {
    let contract_error = |reason: String| BlockExecutionError::ExecutorContract {
        phase: phase.to_string(),
        reason,
    };

    if records.len() != transactions.len() {
        return Err(contract_error(format!(
            "{} records for {} transactions",
            records.len(),
            transactions.len()
        )));
    }
    if let Some(pos) = transactions
        .iter()
        .zip(records)
        .position(|(tx, record)| tx.id() != record.tx_id)
    {
        return Err(contract_error(format!("record {pos} belongs to another transaction")));
    }
    if let Some(record) = records.iter().find(|record| !record.is_consistent()) {
        return Err(contract_error(format!(
            "record of {} changes keys it never accessed",
            record.tx_id
        )));
    }
    Ok(())
}
