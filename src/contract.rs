//! Reference contract interpreter.
//!
//! [`TokenVm`] is a small deterministic key-value VM implementing the
//! [`SequentialExecutor`] contract. It knows two contracts:
//!
//! - the token contract, holding one balance key per owner and a global
//!   `token/config` key that every call reads;
//! - the consensus contract, holding the `consensus/round` counter.
//!
//! Balances and counters are stored as 8-byte big-endian integers. A missing
//! balance reads as zero.

use alloy_primitives::{Address, Bytes};
use group_executor::{
    CancellationToken, EffectRecord, ExecutionError, OverlayView, PartialStateOverlay,
    SequentialExecutor, StateKey, StateValue, StateView, Transaction, TransactionStatus,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

/// Address of the token contract.
pub const TOKEN_CONTRACT: Address = Address::new([0x10; 20]);

/// Address of the consensus contract.
pub const CONSENSUS_CONTRACT: Address = Address::new([0x20; 20]);

/// Chain constant holding the minimum transfer amount.
pub const TOKEN_CONFIG_KEY: &str = "token/config";

/// Consensus round counter.
pub const ROUND_KEY: &str = "consensus/round";

/// Cancellation is polled once per this many transactions.
const CANCEL_CHECK_INTERVAL: usize = 16;

/// State key of an owner's token balance.
pub fn balance_key(owner: Address) -> StateKey {
    StateKey::from(format!("token/balance/{owner}"))
}

/// Encodes an integer state value.
pub fn encode_u64(value: u64) -> StateValue {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Error decoding a transaction into a contract call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("no contract deployed at {0}")]
    UnknownContract(Address),
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("malformed params for {method}: {len} bytes")]
    MalformedParams { method: &'static str, len: usize },
}

/// A decoded contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// Moves `amount` from the sender to `to`.
    Transfer { to: Address, amount: u64 },
    /// Moves the sender's whole balance to `to` and removes the sender's balance entry.
    Sweep { to: Address },
    /// Returns `owner`'s balance.
    GetBalance { owner: Address },
    /// Advances the consensus round.
    NextRound,
}

impl Call {
    pub fn contract(&self) -> Address {
        match self {
            Call::NextRound => CONSENSUS_CONTRACT,
            _ => TOKEN_CONTRACT,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Call::Transfer { .. } => "Transfer",
            Call::Sweep { .. } => "Sweep",
            Call::GetBalance { .. } => "GetBalance",
            Call::NextRound => "NextRound",
        }
    }

    pub fn encode_params(&self) -> Bytes {
        match self {
            Call::Transfer { to, amount } => {
                let mut params = Vec::with_capacity(28);
                params.extend_from_slice(to.as_slice());
                params.extend_from_slice(&amount.to_be_bytes());
                params.into()
            }
            Call::Sweep { to } => Bytes::copy_from_slice(to.as_slice()),
            Call::GetBalance { owner } => Bytes::copy_from_slice(owner.as_slice()),
            Call::NextRound => Bytes::new(),
        }
    }

    /// Builds the transaction invoking this call.
    pub fn into_transaction(self, from: Address, nonce: u64) -> Transaction {
        Transaction::new(from, self.contract(), self.method(), self.encode_params(), nonce)
    }

    /// Decodes the call a transaction makes.
    pub fn decode(tx: &Transaction) -> Result<Self, CallError> {
        let params = tx.params().as_ref();
        let malformed = |method: &'static str| CallError::MalformedParams {
            method,
            len: params.len(),
        };

        let to = tx.to();
        if to == CONSENSUS_CONTRACT {
            return match tx.method() {
                "NextRound" => Ok(Call::NextRound),
                method => Err(CallError::UnknownMethod(method.to_string())),
            };
        }
        if to != TOKEN_CONTRACT {
            return Err(CallError::UnknownContract(to));
        }

        match tx.method() {
            "Transfer" => {
                if params.len() != 28 {
                    return Err(malformed("Transfer"));
                }
                let mut amount = [0u8; 8];
                amount.copy_from_slice(&params[20..]);
                Ok(Call::Transfer {
                    to: Address::from_slice(&params[..20]),
                    amount: u64::from_be_bytes(amount),
                })
            }
            "Sweep" => match params.len() {
                20 => Ok(Call::Sweep {
                    to: Address::from_slice(params),
                }),
                _ => Err(malformed("Sweep")),
            },
            "GetBalance" => match params.len() {
                20 => Ok(Call::GetBalance {
                    owner: Address::from_slice(params),
                }),
                _ => Err(malformed("GetBalance")),
            },
            method => Err(CallError::UnknownMethod(method.to_string())),
        }
    }

    /// Whether the call touches chain-wide system state and must run serially.
    pub fn is_system(&self) -> bool {
        matches!(self, Call::NextRound)
    }

    /// Balance keys the call may read or write when sent by `sender`.
    pub fn resources(&self, sender: Address) -> Vec<StateKey> {
        match self {
            Call::Transfer { to, .. } | Call::Sweep { to } => {
                vec![balance_key(sender), balance_key(*to)]
            }
            Call::GetBalance { owner } => vec![balance_key(*owner)],
            Call::NextRound => vec![StateKey::from(ROUND_KEY)],
        }
    }
}

/// Error raised by a single call; it fails only that transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },
    #[error("amount {amount} below minimum transfer {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },
    #[error("cannot sweep to self")]
    SweepToSelf,
    #[error("balance overflow")]
    Overflow,
    #[error("corrupt value under {0}")]
    CorruptValue(StateKey),
}

/// State seen by one batch: the layered view plus effects of earlier
/// transactions in the same batch.
struct BatchState<'a> {
    view: OverlayView<'a>,
    pending: BTreeMap<StateKey, Option<StateValue>>,
}

impl<'a> BatchState<'a> {
    fn new(view: OverlayView<'a>) -> Self {
        Self {
            view,
            pending: BTreeMap::new(),
        }
    }

    fn get(&self, key: &StateKey) -> Option<StateValue> {
        match self.pending.get(key) {
            Some(value) => value.clone(),
            None => self.view.get(key),
        }
    }

    fn apply(&mut self, record: &EffectRecord) {
        for (key, value) in &record.writes {
            self.pending.insert(key.clone(), Some(value.clone()));
        }
        for key in &record.deletes {
            self.pending.insert(key.clone(), None);
        }
    }
}

/// Execution context of a single transaction.
struct CallContext<'s, 'a> {
    state: &'s BatchState<'a>,
    record: EffectRecord,
}

impl CallContext<'_, '_> {
    fn read(&mut self, key: StateKey) -> Option<StateValue> {
        let value = if let Some(value) = self.record.writes.get(&key) {
            Some(value.clone())
        } else if self.record.deletes.contains(&key) {
            None
        } else {
            self.state.get(&key)
        };
        self.record.record_read(key);
        value
    }

    fn read_u64(&mut self, key: StateKey) -> Result<u64, VmError> {
        match self.read(key.clone()) {
            None => Ok(0),
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| VmError::CorruptValue(key))?;
                Ok(u64::from_be_bytes(bytes))
            }
        }
    }

    fn write_u64(&mut self, key: StateKey, value: u64) {
        self.record.record_write(key, encode_u64(value));
    }

    fn delete(&mut self, key: StateKey) {
        self.record.record_delete(key);
    }
}

/// Deterministic interpreter for the token and consensus contracts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenVm;

impl TokenVm {
    pub fn new() -> Self {
        Self
    }

    fn execute_one(&self, tx: &Transaction, state: &BatchState<'_>) -> EffectRecord {
        let mut ctx = CallContext {
            state,
            record: EffectRecord::new(tx.id()),
        };

        match Self::dispatch(tx, &mut ctx) {
            Ok(return_value) => {
                ctx.record
                    .finish(TransactionStatus::Mined, None, return_value);
            }
            Err(err) => {
                trace!(tx = %tx.id(), %err, "transaction failed");
                // Failed calls commit nothing, but keep what they read.
                ctx.record.writes.clear();
                ctx.record.deletes.clear();
                ctx.record
                    .finish(TransactionStatus::Failed, Some(err.to_string()), Bytes::new());
            }
        }
        ctx.record
    }

    fn dispatch(tx: &Transaction, ctx: &mut CallContext<'_, '_>) -> Result<Bytes, VmError> {
        let call = Call::decode(tx)?;
        if call.contract() == TOKEN_CONTRACT {
            let minimum = ctx.read_u64(StateKey::from(TOKEN_CONFIG_KEY))?;
            if let Call::Transfer { amount, .. } = call {
                if amount < minimum {
                    return Err(VmError::BelowMinimum { amount, minimum });
                }
            }
        }

        match call {
            Call::Transfer { to, amount } => {
                let from_key = balance_key(tx.from());
                let available = ctx.read_u64(from_key.clone())?;
                if available < amount {
                    return Err(VmError::InsufficientBalance {
                        needed: amount,
                        available,
                    });
                }
                ctx.write_u64(from_key, available - amount);

                // Read after the debit so a self-transfer nets to zero.
                let to_key = balance_key(to);
                let received = ctx
                    .read_u64(to_key.clone())?
                    .checked_add(amount)
                    .ok_or(VmError::Overflow)?;
                ctx.write_u64(to_key, received);
                Ok(encode_u64(available - amount))
            }
            Call::Sweep { to } => {
                if to == tx.from() {
                    return Err(VmError::SweepToSelf);
                }
                let from_key = balance_key(tx.from());
                let swept = ctx.read_u64(from_key.clone())?;
                let to_key = balance_key(to);
                let received = ctx
                    .read_u64(to_key.clone())?
                    .checked_add(swept)
                    .ok_or(VmError::Overflow)?;
                ctx.delete(from_key);
                ctx.write_u64(to_key, received);
                Ok(encode_u64(swept))
            }
            Call::GetBalance { owner } => Ok(encode_u64(ctx.read_u64(balance_key(owner))?)),
            Call::NextRound => {
                let key = StateKey::from(ROUND_KEY);
                let round = ctx
                    .read_u64(key.clone())?
                    .checked_add(1)
                    .ok_or(VmError::Overflow)?;
                ctx.write_u64(key, round);
                Ok(encode_u64(round))
            }
        }
    }
}

impl SequentialExecutor for TokenVm {
    fn execute(
        &self,
        transactions: &[Transaction],
        base: &dyn StateView,
        overlay: &PartialStateOverlay,
        cancel: &CancellationToken,
    ) -> Result<Vec<EffectRecord>, ExecutionError> {
        let mut state = BatchState::new(OverlayView::new(base, overlay));
        let mut records = Vec::with_capacity(transactions.len());

        for (idx, tx) in transactions.iter().enumerate() {
            if idx % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let record = self.execute_one(tx, &state);
            state.apply(&record);
            records.push(record);
        }

        Ok(records)
    }
}
