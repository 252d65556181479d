//! Per-group key footprints.

use crate::types::{EffectRecord, GroupIndex, StateKey};
use std::collections::BTreeSet;

/// Records of one executed group together with the keys they touched.
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    pub group_idx: GroupIndex,
    pub records: Vec<EffectRecord>,
    /// Union of every accessed key.
    pub all_keys: BTreeSet<StateKey>,
    /// Union of every written or deleted key.
    pub change_keys: BTreeSet<StateKey>,
    /// `all_keys - change_keys`.
    pub read_keys: BTreeSet<StateKey>,
}

impl GroupOutcome {
    pub fn from_records(group_idx: GroupIndex, records: Vec<EffectRecord>) -> Self {
        let all_keys: BTreeSet<StateKey> = records
            .iter()
            .flat_map(|record| record.accessed_keys())
            .cloned()
            .collect();
        let change_keys: BTreeSet<StateKey> = records
            .iter()
            .flat_map(|record| record.changed_keys())
            .cloned()
            .collect();
        let read_keys = all_keys.difference(&change_keys).cloned().collect();

        Self {
            group_idx,
            records,
            all_keys,
            change_keys,
            read_keys,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Keys that some group read and no group changed.
///
/// Concurrent reads of such a key never conflict, so the resolver ignores them.
pub fn read_only_keys(outcomes: &[GroupOutcome]) -> BTreeSet<StateKey> {
    let changed: BTreeSet<&StateKey> = outcomes
        .iter()
        .flat_map(|outcome| outcome.change_keys.iter())
        .collect();

    outcomes
        .iter()
        .flat_map(|outcome| outcome.read_keys.iter())
        .filter(|key| !changed.contains(key))
        .cloned()
        .collect()
}
