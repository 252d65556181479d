//! Optimistic conflict resolution between speculatively executed groups.
//!
//! Groups run concurrently against the same base state and never observe each
//! other's writes. Afterwards the resolver walks the outcomes in grouper order
//! exactly once: a group is accepted when none of its keys (ignoring keys that
//! every group only reads) were touched by an earlier accepted group, and is
//! marked conflicting otherwise. Rejected groups do not claim their keys.
//!
//! There is no retry and no reordering, so every node derives the same
//! accept/reject partition from the same input.

use crate::aggregator::{read_only_keys, GroupOutcome};
use crate::types::{EffectRecord, GroupIndex, StateKey};
use std::collections::BTreeSet;
use tracing::{trace, warn};

/// Accept/reject partition of a block's groups.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Records of accepted groups, in grouper order.
    pub accepted: Vec<EffectRecord>,
    /// Records of conflicting groups, in grouper order.
    pub conflicting: Vec<EffectRecord>,
    pub accepted_groups: Vec<GroupIndex>,
    pub conflicting_groups: Vec<GroupIndex>,
    /// Keys read by some group and changed by none.
    pub read_only_keys: BTreeSet<StateKey>,
}

/// Single-pass conflict resolver.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    read_only_keys: BTreeSet<StateKey>,
    existing_keys: BTreeSet<StateKey>,
    resolution: Resolution,
}

impl ConflictResolver {
    /// Creates a resolver that ignores `read_only_keys`.
    pub fn new(read_only_keys: BTreeSet<StateKey>) -> Self {
        Self {
            read_only_keys,
            ..Default::default()
        }
    }

    /// Admits the next group in grouper order. Returns whether it was accepted.
    pub fn admit(&mut self, outcome: GroupOutcome) -> bool {
        let relevant: BTreeSet<StateKey> = outcome
            .all_keys
            .difference(&self.read_only_keys)
            .cloned()
            .collect();

        if relevant.is_disjoint(&self.existing_keys) {
            trace!(group = outcome.group_idx, keys = relevant.len(), "accepted group");
            self.existing_keys.extend(relevant);
            self.resolution.accepted_groups.push(outcome.group_idx);
            self.resolution.accepted.extend(outcome.records);
            true
        } else {
            let overlap = relevant.intersection(&self.existing_keys).count();
            warn!(
                group = outcome.group_idx,
                txns = outcome.records.len(),
                overlap,
                "group conflicts with an earlier accepted group"
            );
            self.resolution.conflicting_groups.push(outcome.group_idx);
            self.resolution.conflicting.extend(outcome.records);
            false
        }
    }

    /// Finishes the pass.
    ///
    /// Accesses to read-only keys are stripped from every record: they carry
    /// no dependency information and are not persisted as access evidence.
    pub fn finish(mut self) -> Resolution {
        if !self.read_only_keys.is_empty() {
            let read_only = &self.read_only_keys;
            for record in self
                .resolution
                .accepted
                .iter_mut()
                .chain(self.resolution.conflicting.iter_mut())
            {
                record.accesses.retain(|key, _| !read_only.contains(key));
            }
        }
        self.resolution.read_only_keys = self.read_only_keys;
        self.resolution
    }
}

/// Resolves a block's group outcomes, given in grouper order.
pub fn resolve(outcomes: Vec<GroupOutcome>) -> Resolution {
    let mut resolver = ConflictResolver::new(read_only_keys(&outcomes));
    for outcome in outcomes {
        resolver.admit(outcome);
    }
    resolver.finish()
}
