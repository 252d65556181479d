//! Core types for grouped parallel execution.

use alloy_primitives::{keccak256, Address, Bloom, BloomInput, Bytes, B256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Content-derived transaction identifier.
pub type TxId = B256;

/// Position of a group in the grouper's output (0-based).
pub type GroupIndex = usize;

/// Opaque state value.
pub type StateValue = Bytes;

/// Error message attached to transactions whose target is not a deployed contract.
pub const INVALID_CONTRACT_ADDRESS: &str = "invalid contract address";

/// Error message attached to transactions demoted by the conflict resolver.
pub const PARALLEL_CONFLICT: &str = "parallel conflict";

/// Error message attached to transactions of a group whose run was cancelled.
pub const EXECUTION_CANCELLED: &str = "execution cancelled";

/// Opaque state key.
///
/// Keys live in one flat namespace: two keys conflict only when their bytes are
/// equal. A logical resource must always be addressed by the same encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(Vec<u8>);

impl StateKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for StateKey {
    fn from(key: &str) -> Self {
        Self::new(key.as_bytes())
    }
}

impl From<String> for StateKey {
    fn from(key: String) -> Self {
        Self::new(key.into_bytes())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// An immutable transaction as handed over by the pool/consensus layer.
///
/// Signatures are validated upstream; only the call itself is carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    from: Address,
    to: Address,
    method: String,
    params: Bytes,
    nonce: u64,
    id: TxId,
}

impl Transaction {
    pub fn new(
        from: Address,
        to: Address,
        method: impl Into<String>,
        params: impl Into<Bytes>,
        nonce: u64,
    ) -> Self {
        let method = method.into();
        let params = params.into();
        let id = Self::compute_id(from, to, &method, &params, nonce);
        Self {
            from,
            to,
            method,
            params,
            nonce,
            id,
        }
    }

    fn compute_id(from: Address, to: Address, method: &str, params: &[u8], nonce: u64) -> TxId {
        let mut data = Vec::with_capacity(20 + 20 + 4 + method.len() + params.len() + 8);
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(to.as_slice());
        // Length prefix keeps (method, params) boundaries unambiguous.
        data.extend_from_slice(&(method.len() as u32).to_be_bytes());
        data.extend_from_slice(method.as_bytes());
        data.extend_from_slice(params);
        data.extend_from_slice(&nonce.to_be_bytes());
        keccak256(&data)
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Bytes {
        &self.params
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Execution status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    /// Not executed yet.
    #[default]
    Pending,
    /// Executed successfully.
    Mined,
    /// Execution failed, or the transaction was never executable.
    Failed,
    /// Executed, but its group overlapped an earlier accepted group.
    Conflict,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Mined => "mined",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Conflict => "conflict",
        };
        f.write_str(name)
    }
}

/// Read or write access to a state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
}

/// User-facing result of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionResult {
    pub tx_id: TxId,
    pub status: TransactionStatus,
    pub error: Option<String>,
    pub return_value: Bytes,
    pub bloom: Bloom,
}

/// Per-transaction outcome produced by a sequential executor.
///
/// Every key in `writes` or `deletes` is also present in `accesses` with
/// [`AccessType::Write`]; the `record_*` mutators keep it that way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectRecord {
    pub tx_id: TxId,
    pub status: TransactionStatus,
    pub writes: BTreeMap<StateKey, StateValue>,
    pub deletes: BTreeSet<StateKey>,
    pub accesses: BTreeMap<StateKey, AccessType>,
    pub bloom: Bloom,
    pub result: TransactionResult,
}

impl EffectRecord {
    /// Creates an empty pending record for a transaction.
    pub fn new(tx_id: TxId) -> Self {
        Self {
            tx_id,
            result: TransactionResult {
                tx_id,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Creates a failed record that touched no state.
    pub fn failed(tx_id: TxId, error: impl Into<String>) -> Self {
        let mut record = Self::new(tx_id);
        record.finish(TransactionStatus::Failed, Some(error.into()), Bytes::new());
        record
    }

    /// Records a read. Never downgrades an existing write access.
    pub fn record_read(&mut self, key: StateKey) {
        self.accesses.entry(key).or_insert(AccessType::Read);
    }

    /// Records a write, superseding any earlier delete of the same key.
    pub fn record_write(&mut self, key: StateKey, value: StateValue) {
        self.deletes.remove(&key);
        self.accesses.insert(key.clone(), AccessType::Write);
        self.writes.insert(key, value);
    }

    /// Records a delete, superseding any earlier write of the same key.
    pub fn record_delete(&mut self, key: StateKey) {
        self.writes.remove(&key);
        self.accesses.insert(key.clone(), AccessType::Write);
        self.deletes.insert(key);
    }

    /// Sets the final status and result, and seals the bloom digest.
    pub fn finish(&mut self, status: TransactionStatus, error: Option<String>, return_value: Bytes) {
        self.status = status;
        self.bloom = self.compute_bloom();
        self.result = TransactionResult {
            tx_id: self.tx_id,
            status,
            error,
            return_value,
            bloom: self.bloom,
        };
    }

    /// Demotes the record to [`TransactionStatus::Conflict`].
    pub fn mark_conflict(&mut self) {
        self.status = TransactionStatus::Conflict;
        self.result.status = TransactionStatus::Conflict;
        self.result.error = Some(PARALLEL_CONFLICT.to_string());
    }

    /// Keys this record wrote or deleted.
    pub fn changed_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.writes.keys().chain(self.deletes.iter())
    }

    /// Keys this record touched in any way.
    pub fn accessed_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.accesses.keys()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.error.as_deref()
    }

    /// Whether every written or deleted key is also an accessed key.
    pub fn is_consistent(&self) -> bool {
        self.changed_keys().all(|key| self.accesses.contains_key(key))
    }

    fn compute_bloom(&self) -> Bloom {
        let mut bloom = Bloom::ZERO;
        for key in self.accesses.keys() {
            bloom.accrue(BloomInput::Raw(key.as_bytes()));
        }
        bloom
    }
}

/// Header of the block being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_block_hash: B256,
}

/// Coordinates of the state the block executes on top of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub block_hash: B256,
    pub block_height: u64,
}

impl ChainContext {
    /// Resolves the base state coordinates: the parent block of `header`.
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            block_hash: header.previous_block_hash,
            block_height: header.height.saturating_sub(1),
        }
    }
}
