//! Benchmarking harness for grouped parallel block execution.
//!
//! This crate drives the [`group_executor`] engine with a small reference
//! chain: a token contract, a consensus contract and a generated stream of
//! blocks. It compares executing every block sequentially against executing
//! it through a grouper and the parallel executor.
//!
//! # Architecture
//!
//! The harness is organized around three main concepts:
//!
//! - **Workload**: Pre-generated accounts, genesis state and blocks of calls
//! - **Grouper**: Static analysis splitting a block into serial, parallel and unroutable calls
//! - **Runner**: A strategy for executing a workload block by block
//!
//! # Quick Start
//!
//! ```
//! use block_exec::{BlockRunner, GroupedRunner, ResourceGrouper, Workload, WorkloadConfig};
//! use group_executor::ExecutorConfig;
//!
//! let workload = Workload::generate(WorkloadConfig {
//!     num_accounts: 100,
//!     num_transactions: 50,
//!     transactions_per_block: 25,
//!     ..Default::default()
//! });
//!
//! let runner = GroupedRunner::new(ExecutorConfig { num_threads: 2 }, ResourceGrouper);
//! let (_state, result) = runner.run(&workload).unwrap();
//!
//! println!("Successful: {}", result.successful);
//! ```

pub mod contract;
pub mod executor;
pub mod grouper;

pub use contract::{Call, TokenVm};
pub use executor::{BlockRunner, ExecutionResult, GroupedRunner, SequentialRunner};
pub use grouper::{ResourceGrouper, SenderGrouper};

use alloy_primitives::{keccak256, Address, B256};
use contract::{balance_key, encode_u64, ROUND_KEY, TOKEN_CONFIG_KEY};
use group_executor::{BlockHeader, StateSnapshot, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;

/// Balance every account starts with.
pub const INITIAL_BALANCE: u64 = 1_000_000;

/// Minimum transfer amount stored in genesis.
pub const MIN_TRANSFER: u64 = 1;

// ============================================================================
// Accounts
// ============================================================================

/// A workload participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
}

impl Account {
    /// Derives a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let hash = keccak256(seed.to_be_bytes());
        Self {
            address: Address::from_slice(&hash[12..]),
        }
    }
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate across all blocks.
    pub num_transactions: usize,
    /// Maximum number of transactions per block.
    pub transactions_per_block: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transactions touch the same two accounts.
    pub conflict_factor: f64,
    /// Share of calls sent to an address with no contract.
    pub unroutable_ratio: f64,
    /// Share of consensus calls, which always run serially.
    pub system_ratio: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            transactions_per_block: 100,
            conflict_factor: 0.0,
            unroutable_ratio: 0.0,
            system_ratio: 0.0,
            seed: 42,
        }
    }
}

/// One block of the workload.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// A complete benchmark workload.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts participating in this workload.
    pub accounts: Vec<Account>,
    /// Blocks to execute, in chain order.
    pub blocks: Vec<Block>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    pub fn generate(config: WorkloadConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let num_accounts = config.num_accounts.max(2);

        let accounts: Vec<Account> = (0..num_accounts)
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();
        let stray = Account::from_seed(config.seed.wrapping_sub(1)).address;

        // Track nonces per sender so identical calls keep distinct ids.
        let mut nonces: HashMap<Address, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (num_accounts as f64 - 2.0)).max(2.0)
                as usize
        } else {
            num_accounts
        };

        let transactions: Vec<Transaction> = (0..config.num_transactions)
            .map(|_| {
                let use_hot = rng.gen::<f64>() < config.conflict_factor;
                let pool = if use_hot {
                    hot_account_count
                } else {
                    num_accounts
                };
                let from = rng.gen_range(0..pool);
                let mut to = rng.gen_range(0..pool);
                while to == from {
                    to = rng.gen_range(0..pool);
                }
                let (from, to) = (accounts[from].address, accounts[to].address);

                let roll = rng.gen::<f64>();
                let nonce = nonces.entry(from).or_insert(0);
                let tx = if roll < config.system_ratio {
                    Call::NextRound.into_transaction(from, *nonce)
                } else if roll < config.system_ratio + config.unroutable_ratio {
                    let call = Call::Transfer { to, amount: 1 };
                    Transaction::new(from, stray, call.method(), call.encode_params(), *nonce)
                } else {
                    match rng.gen_range(0..20) {
                        0 => Call::GetBalance { owner: to },
                        1 => Call::Sweep { to },
                        _ => Call::Transfer {
                            to,
                            amount: rng.gen_range(MIN_TRANSFER..=100),
                        },
                    }
                    .into_transaction(from, *nonce)
                };
                *nonce += 1;
                tx
            })
            .collect();

        let per_block = config.transactions_per_block.max(1);
        let mut parent = B256::ZERO;
        let blocks = transactions
            .chunks(per_block)
            .enumerate()
            .map(|(idx, chunk)| {
                let height = idx as u64 + 1;
                let header = BlockHeader {
                    height,
                    previous_block_hash: parent,
                };
                parent = keccak256(height.to_be_bytes());
                Block {
                    header,
                    transactions: chunk.to_vec(),
                }
            })
            .collect();

        Self {
            accounts,
            blocks,
            config,
        }
    }

    /// Total number of transactions across all blocks.
    pub fn num_transactions(&self) -> usize {
        self.blocks.iter().map(|block| block.transactions.len()).sum()
    }

    /// Genesis state: chain constants plus a funded balance per account.
    pub fn genesis(&self) -> StateSnapshot {
        let mut state = StateSnapshot::new()
            .with_entry(TOKEN_CONFIG_KEY, encode_u64(MIN_TRANSFER))
            .with_entry(ROUND_KEY, encode_u64(0));
        for account in &self.accounts {
            state.insert(balance_key(account.address), encode_u64(INITIAL_BALANCE));
        }
        state
    }
}

// ============================================================================
// Tests
// ============================================================================
