//! Scripted collaborators for orchestrator tests.

use crate::error::ExecutionError;
use crate::overlay::{OverlayView, PartialStateOverlay, StateView};
use crate::traits::{GroupedTransactions, Grouper, SequentialExecutor};
use crate::types::{ChainContext, EffectRecord, StateKey, Transaction, TransactionStatus, TxId};
use alloy_primitives::{Address, Bytes};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds a distinct test transaction.
pub(crate) fn tx(n: u8) -> Transaction {
    Transaction::new(
        Address::with_last_byte(n),
        Address::repeat_byte(0xc0),
        "Run",
        Bytes::new(),
        u64::from(n),
    )
}

/// One step of a scripted transaction.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Read(&'static str),
    Write(&'static str, &'static [u8]),
    Delete(&'static str),
    /// Writes without recording the access, breaking the record invariant.
    UntrackedWrite(&'static str, &'static [u8]),
    /// Reads the first key and writes its value (or empty) to the second.
    Copy(&'static str, &'static str),
    /// Reverts the transaction's writes and fails it.
    Fail(&'static str),
}

/// Sequential executor driven by per-transaction scripts.
#[derive(Clone, Default)]
pub(crate) struct ScriptedExecutor {
    scripts: HashMap<TxId, Vec<Op>>,
    fatal_on: HashSet<TxId>,
    cancel_on: Option<TxId>,
    drop_records_of: Option<TxId>,
    executed: Arc<Mutex<HashSet<TxId>>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(mut self, tx: &Transaction, ops: Vec<Op>) -> Self {
        self.scripts.insert(tx.id(), ops);
        self
    }

    /// Fails the whole batch containing `tx`.
    pub(crate) fn fatal_on(mut self, tx: &Transaction) -> Self {
        self.fatal_on.insert(tx.id());
        self
    }

    /// Signals cancellation when `tx` is reached.
    pub(crate) fn cancel_on(mut self, tx: &Transaction) -> Self {
        self.cancel_on = Some(tx.id());
        self
    }

    /// Omits the record of `tx` from the batch output.
    pub(crate) fn drop_records_of(mut self, tx: &Transaction) -> Self {
        self.drop_records_of = Some(tx.id());
        self
    }

    /// Whether `id` was ever handed to this executor.
    pub(crate) fn executed(&self, id: TxId) -> bool {
        self.executed.lock().contains(&id)
    }

    fn read(
        view: &OverlayView<'_>,
        batch: &BTreeMap<StateKey, Option<Bytes>>,
        record: &EffectRecord,
        key: &StateKey,
    ) -> Option<Bytes> {
        if let Some(value) = record.writes.get(key) {
            return Some(value.clone());
        }
        if record.deletes.contains(key) {
            return None;
        }
        match batch.get(key) {
            Some(value) => value.clone(),
            None => view.get(key),
        }
    }
}

impl SequentialExecutor for ScriptedExecutor {
    fn execute(
        &self,
        transactions: &[Transaction],
        base: &dyn StateView,
        overlay: &PartialStateOverlay,
        cancel: &CancellationToken,
    ) -> Result<Vec<EffectRecord>, ExecutionError> {
        let view = OverlayView::new(base, overlay);
        // Effects of earlier transactions in this batch.
        let mut batch: BTreeMap<StateKey, Option<Bytes>> = BTreeMap::new();
        let mut records = Vec::with_capacity(transactions.len());

        for tx in transactions {
            if self.fatal_on.contains(&tx.id()) {
                return Err(ExecutionError::Fatal("scripted failure".to_string()));
            }
            if self.cancel_on == Some(tx.id()) {
                cancel.cancel();
                return Err(ExecutionError::Cancelled);
            }
            self.executed.lock().insert(tx.id());
            if self.drop_records_of == Some(tx.id()) {
                continue;
            }

            let mut record = EffectRecord::new(tx.id());
            let mut failure = None;
            for op in self.scripts.get(&tx.id()).into_iter().flatten() {
                match op {
                    Op::Read(key) => {
                        let key = StateKey::from(*key);
                        let _ = Self::read(&view, &batch, &record, &key);
                        record.record_read(key);
                    }
                    Op::Write(key, value) => {
                        record.record_write(StateKey::from(*key), Bytes::from_static(*value));
                    }
                    Op::Delete(key) => record.record_delete(StateKey::from(*key)),
                    Op::UntrackedWrite(key, value) => {
                        record
                            .writes
                            .insert(StateKey::from(*key), Bytes::from_static(*value));
                    }
                    Op::Copy(from, to) => {
                        let from = StateKey::from(*from);
                        let value = Self::read(&view, &batch, &record, &from).unwrap_or_default();
                        record.record_read(from);
                        record.record_write(StateKey::from(*to), value);
                    }
                    Op::Fail(reason) => {
                        failure = Some(reason.to_string());
                        break;
                    }
                }
            }

            match failure {
                Some(error) => {
                    record.writes.clear();
                    record.deletes.clear();
                    record.finish(TransactionStatus::Failed, Some(error), Bytes::new());
                }
                None => {
                    for (key, value) in &record.writes {
                        batch.insert(key.clone(), Some(value.clone()));
                    }
                    for key in &record.deletes {
                        batch.insert(key.clone(), None);
                    }
                    record.finish(TransactionStatus::Mined, None, Bytes::new());
                }
            }
            records.push(record);
        }

        Ok(records)
    }
}

/// Grouper returning a fixed partition regardless of its input.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedGrouper {
    partition: GroupedTransactions,
}

impl ScriptedGrouper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serial(mut self, transactions: &[&Transaction]) -> Self {
        self.partition
            .serial
            .extend(transactions.iter().map(|tx| (*tx).clone()));
        self
    }

    pub(crate) fn group(mut self, transactions: &[&Transaction]) -> Self {
        self.partition
            .groups
            .push(transactions.iter().map(|tx| (*tx).clone()).collect());
        self
    }

    pub(crate) fn unroutable(mut self, transactions: &[&Transaction]) -> Self {
        self.partition
            .unroutable
            .extend(transactions.iter().map(|tx| (*tx).clone()));
        self
    }
}

impl Grouper for ScriptedGrouper {
    fn group(&self, _ctx: &ChainContext, _transactions: Vec<Transaction>) -> GroupedTransactions {
        self.partition.clone()
    }
}
