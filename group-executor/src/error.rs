//! Error types for grouped block execution.

use crate::types::GroupIndex;
use thiserror::Error;

/// Error returned by a sequential executor for a whole batch.
///
/// A single transaction's failure is never reported here; it is captured as
/// a failed [`EffectRecord`](crate::EffectRecord) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The batch observed the cancellation signal and stopped.
    #[error("execution cancelled")]
    Cancelled,
    /// The executor cannot continue at all (e.g. broken state backend).
    #[error("executor failure: {0}")]
    Fatal(String),
}

/// Block-aborting error of [`ParallelExecutor::execute_block`](crate::ParallelExecutor::execute_block).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockExecutionError {
    /// The grouper dropped, duplicated or invented transactions, or emitted an empty group.
    #[error("grouper contract violated: {0}")]
    GrouperContract(String),
    /// An executor invocation returned records that do not match its input.
    #[error("executor contract violated in {phase}: {reason}")]
    ExecutorContract { phase: String, reason: String },
    /// Accepted, serial, unroutable and conflicting records do not add up to the input.
    #[error("accounted for {accounted} of {expected} transactions")]
    AccountingMismatch { accounted: usize, expected: usize },
    /// Cancellation was signalled before the parallel phase started.
    #[error("block execution cancelled")]
    Cancelled,
    /// A group's executor invocation failed unrecoverably.
    #[error("group {group} failed: {source}")]
    Group {
        group: GroupIndex,
        #[source]
        source: ExecutionError,
    },
    /// The serial phase failed unrecoverably.
    #[error("serial phase failed: {0}")]
    Serial(#[source] ExecutionError),
    /// A worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T, E = BlockExecutionError> = std::result::Result<T, E>;
