//! Reference groupers for [`TokenVm`](crate::contract::TokenVm) blocks.
//!
//! Both groupers route the same way before grouping:
//!
//! - calls to an address with no deployed contract are unroutable;
//! - consensus calls and calls that fail to decode run serially;
//! - token calls are grouped.
//!
//! [`ResourceGrouper`] unions token calls by the balance keys they touch, so
//! its groups never conflict. [`SenderGrouper`] only groups by sender and
//! relies on conflict resolution to catch shared recipients.

use crate::contract::{balance_key, Call, CallError};
use group_executor::{ChainContext, GroupedTransactions, Grouper, StateKey, Transaction};
use std::collections::HashMap;
use tracing::debug;

enum Route {
    Serial,
    Unroutable,
    Parallel(Vec<StateKey>),
}

fn classify(tx: &Transaction) -> Route {
    match Call::decode(tx) {
        Err(CallError::UnknownContract(_)) => Route::Unroutable,
        Err(_) => Route::Serial,
        Ok(call) if call.is_system() => Route::Serial,
        Ok(call) => {
            let mut keys = call.resources(tx.from());
            // Keeps each sender's transactions in one group.
            keys.push(balance_key(tx.from()));
            Route::Parallel(keys)
        }
    }
}

/// Splits routed transactions into the serial and unroutable lists and
/// returns the parallel ones, in input order, with their grouping keys.
fn route(
    transactions: Vec<Transaction>,
    partition: &mut GroupedTransactions,
) -> Vec<(Transaction, Vec<StateKey>)> {
    let mut parallel = Vec::new();
    for tx in transactions {
        match classify(&tx) {
            Route::Serial => partition.serial.push(tx),
            Route::Unroutable => partition.unroutable.push(tx),
            Route::Parallel(keys) => parallel.push((tx, keys)),
        }
    }
    parallel
}

/// Disjoint sets over transaction indices.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Collects transactions into groups keyed by `label`, ordered by the input
/// index of each group's first transaction.
fn collect_groups(
    transactions: Vec<Transaction>,
    mut label: impl FnMut(usize) -> usize,
) -> Vec<Vec<Transaction>> {
    let mut slot_of_label: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<Transaction>> = Vec::new();
    for (idx, tx) in transactions.into_iter().enumerate() {
        let slot = *slot_of_label.entry(label(idx)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(tx);
    }
    groups
}

/// Groups token calls into connected components of shared balance keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGrouper;

impl Grouper for ResourceGrouper {
    fn group(&self, ctx: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions {
        let mut partition = GroupedTransactions::default();
        let parallel = route(transactions, &mut partition);

        let mut uf = UnionFind::new(parallel.len());
        let mut first_toucher: HashMap<&StateKey, usize> = HashMap::new();
        for (idx, (_, keys)) in parallel.iter().enumerate() {
            for key in keys {
                match first_toucher.get(key) {
                    Some(&other) => uf.union(idx, other),
                    None => {
                        first_toucher.insert(key, idx);
                    }
                }
            }
        }

        let transactions = parallel.into_iter().map(|(tx, _)| tx).collect();
        partition.groups = collect_groups(transactions, |idx| uf.find(idx));

        debug!(
            parent_height = ctx.block_height,
            serial = partition.serial.len(),
            groups = partition.groups.len(),
            unroutable = partition.unroutable.len(),
            "grouped by resource"
        );
        partition
    }
}

/// Groups token calls by sender only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderGrouper;

impl Grouper for SenderGrouper {
    fn group(&self, ctx: &ChainContext, transactions: Vec<Transaction>) -> GroupedTransactions {
        let mut partition = GroupedTransactions::default();
        let parallel = route(transactions, &mut partition);

        let mut sender_ids = HashMap::new();
        let senders: Vec<usize> = parallel
            .iter()
            .map(|(tx, _)| {
                let next = sender_ids.len();
                *sender_ids.entry(tx.from()).or_insert(next)
            })
            .collect();

        let transactions = parallel.into_iter().map(|(tx, _)| tx).collect();
        partition.groups = collect_groups(transactions, |idx| senders[idx]);

        debug!(
            parent_height = ctx.block_height,
            serial = partition.serial.len(),
            groups = partition.groups.len(),
            unroutable = partition.unroutable.len(),
            "grouped by sender"
        );
        partition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{CONSENSUS_CONTRACT, TOKEN_CONTRACT};
    use alloy_primitives::{Address, Bytes, B256};

    fn ctx() -> ChainContext {
        ChainContext {
            block_hash: B256::ZERO,
            block_height: 0,
        }
    }

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn transfer(from: u8, to: u8, nonce: u64) -> Transaction {
        Call::Transfer {
            to: addr(to),
            amount: 10,
        }
        .into_transaction(addr(from), nonce)
    }

    fn ids(group: &[Transaction]) -> Vec<B256> {
        group.iter().map(Transaction::id).collect()
    }

    #[test]
    fn test_routing() {
        let round = Call::NextRound.into_transaction(addr(1), 0);
        let garbage = Transaction::new(addr(1), TOKEN_CONTRACT, "Transfer", Bytes::new(), 1);
        let stray = Transaction::new(addr(1), addr(0xee), "Transfer", Bytes::new(), 2);
        let token = transfer(1, 2, 3);

        let partition = ResourceGrouper.group(
            &ctx(),
            vec![round.clone(), garbage.clone(), stray.clone(), token.clone()],
        );

        assert_eq!(partition.serial, vec![round, garbage]);
        assert_eq!(partition.unroutable, vec![stray]);
        assert_eq!(partition.groups, vec![vec![token]]);
        assert_eq!(partition.serial[0].to(), CONSENSUS_CONTRACT);
    }

    #[test]
    fn test_resource_grouper_unions_transitively() {
        // 1->2, 3->4, 2->3 chains everything; 5->6 stays alone.
        let txs = vec![
            transfer(1, 2, 0),
            transfer(5, 6, 0),
            transfer(3, 4, 0),
            transfer(2, 3, 0),
        ];
        let partition = ResourceGrouper.group(&ctx(), txs.clone());

        assert_eq!(partition.groups.len(), 2);
        assert_eq!(
            ids(&partition.groups[0]),
            vec![txs[0].id(), txs[2].id(), txs[3].id()]
        );
        assert_eq!(ids(&partition.groups[1]), vec![txs[1].id()]);
    }

    #[test]
    fn test_get_balance_joins_owner_and_sender() {
        let read = Call::GetBalance { owner: addr(2) }.into_transaction(addr(9), 0);
        let txs = vec![transfer(1, 2, 0), transfer(9, 8, 0), read];
        let partition = ResourceGrouper.group(&ctx(), txs);
        assert_eq!(partition.groups.len(), 1);
    }

    #[test]
    fn test_sender_grouper_ignores_recipients() {
        let txs = vec![transfer(1, 3, 0), transfer(2, 3, 0), transfer(1, 4, 1)];
        let partition = SenderGrouper.group(&ctx(), txs.clone());

        assert_eq!(partition.groups.len(), 2);
        assert_eq!(ids(&partition.groups[0]), vec![txs[0].id(), txs[2].id()]);
        assert_eq!(ids(&partition.groups[1]), vec![txs[1].id()]);
    }

    #[test]
    fn test_empty_block() {
        assert!(ResourceGrouper.group(&ctx(), Vec::new()).is_empty());
        assert!(SenderGrouper.group(&ctx(), Vec::new()).is_empty());
    }
}
