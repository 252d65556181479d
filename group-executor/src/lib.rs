//! Grouped parallel executor for blockchain transactions.
//!
//! This crate executes a block by splitting its transactions into groups that
//! a static grouper believes to be independent, running those groups
//! concurrently against a common base state, and then validating the
//! assumption with optimistic concurrency control: any group whose key
//! footprint overlaps an earlier accepted group is demoted to `Conflict`.
//!
//! # Core Components
//!
//! - **PartialStateOverlay**: Pending state layered over an immutable snapshot
//! - **GroupOutcome**: Key footprint (all/changed/read keys) of an executed group
//! - **ConflictResolver**: Single-pass, grouper-ordered accept/reject decision
//! - **Scheduler**: Hands groups to worker threads for one fan-out/fan-in round
//! - **ParallelExecutor**: Orchestrates the phases of a block
//!
//! # Algorithm Overview
//!
//! 1. The grouper partitions the block into serial, parallel and unroutable transactions
//! 2. Serial transactions run first, against the caller's pending overlay
//! 3. Their effects are merged into a new overlay shared by every group
//! 4. Groups run concurrently; none observes another group's writes
//! 5. Groups are accepted in grouper order unless they touch a key claimed by an
//!    earlier accepted group (keys only ever read are ignored)
//! 6. Output is serial, accepted, unroutable (failed), then conflicting records
//!
//! The outcome is a pure function of the block, the base state and the
//! collaborators, so every validating node computes the same records.
//!
//! # Example
//!
//! ```rust,ignore
//! use group_executor::{CancellationToken, ExecutorConfig, ParallelExecutor, StateSnapshot};
//!
//! let executor = ParallelExecutor::new(ExecutorConfig::default(), grouper, vm);
//! let result = executor.execute_block(
//!     transactions,
//!     &header,
//!     &StateSnapshot::new(),
//!     None,
//!     &CancellationToken::new(),
//! )?;
//!
//! println!("Accepted: {}, Conflicting: {}", result.accepted, result.conflicting);
//! ```

pub mod aggregator;
pub mod error;
pub mod executor;
pub mod overlay;
pub mod resolver;
pub mod scheduler;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use tokio_util::sync::CancellationToken;
pub use error::{BlockExecutionError, ExecutionError};
pub use executor::{BlockExecutionResult, ExecutorConfig, ParallelExecutor};
pub use overlay::{OverlayView, PartialStateOverlay, StateSnapshot, StateView};
pub use traits::{GroupedTransactions, Grouper, SequentialExecutor, SerialGrouper};
pub use types::{
    AccessType, BlockHeader, ChainContext, EffectRecord, StateKey, StateValue, Transaction,
    TransactionResult, TransactionStatus, TxId,
};
