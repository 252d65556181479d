//! Collaborator contracts consumed by the parallel executor.

use crate::error::ExecutionError;
use crate::overlay::{PartialStateOverlay, StateView};
use crate::types::{ChainContext, EffectRecord, Transaction};
use tokio_util::sync::CancellationToken;

/// Partition of a block's transactions produced by a [`Grouper`].
///
/// Every input transaction appears in exactly one of the three lists, and
/// each list preserves input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedTransactions {
    /// Transactions that must run first, one after another.
    pub serial: Vec<Transaction>,
    /// Non-empty groups that may run concurrently with each other.
    pub groups: Vec<Vec<Transaction>>,
    /// Transactions whose target is not a deployed contract.
    pub unroutable: Vec<Transaction>,
}

impl GroupedTransactions {
    /// Total number of transactions across all three lists.
    pub fn len(&self) -> usize {
        self.serial.len() + self.groups.iter().map(Vec::len).sum::<usize>() + self.unroutable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.serial
            .iter()
            .chain(self.groups.iter().flatten())
            .chain(self.unroutable.iter())
    }
}

/// Static analysis deciding which transactions may run in parallel.
///
/// Implementations must be deterministic and side-effect free: identical
/// input always yields the identical partition, including group order.
pub trait Grouper: Send + Sync {
    fn group(&self, ctx: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions;
}

/// Executes transactions in order against a base snapshot plus a pending overlay.
///
/// Implementations must return one record per input transaction, in input
/// order, and must be deterministic. A failing transaction is reported as a
/// failed record; only batch-wide problems are returned as errors. Neither
/// `base` nor `overlay` is modified. Long-running implementations should poll
/// `cancel` and return [`ExecutionError::Cancelled`] once it fires.
pub trait SequentialExecutor: Send + Sync {
    fn execute(
        &self,
        transactions: &[Transaction],
        base: &dyn StateView,
        overlay: &PartialStateOverlay,
        cancel: &CancellationToken,
    ) -> Result<Vec<EffectRecord>, ExecutionError>;
}

/// Grouper that runs the whole block serially.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialGrouper;

impl Grouper for SerialGrouper {
    fn group(&self, _ctx: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions {
        GroupedTransactions {
            serial: transactions,
            ..Default::default()
        }
    }
}
