//! Pending state layered over an immutable base snapshot.
//!
//! A [`PartialStateOverlay`] holds key changes and deletions that have been
//! produced by executed transactions but not yet persisted. Execution phases
//! read through an [`OverlayView`], which checks the overlay first and falls
//! through to the base snapshot.
//!
//! Overlays are never mutated once they are handed to an execution phase:
//! [`PartialStateOverlay::merge`] always builds a new one, so the merged
//! overlay can be shared read-only by every concurrently executing group.

use crate::types::{EffectRecord, StateKey, StateValue, TransactionStatus};
use std::collections::{BTreeMap, BTreeSet};

/// Read access to a state snapshot.
pub trait StateView: Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &StateKey) -> Option<StateValue>;
}

/// In-memory immutable state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    entries: BTreeMap<StateKey, StateValue>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry while building the snapshot.
    pub fn with_entry(mut self, key: impl Into<StateKey>, value: impl Into<StateValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: StateKey, value: StateValue) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a new snapshot with the overlay persisted on top of this one.
    pub fn apply(&self, overlay: &PartialStateOverlay) -> Self {
        let mut entries = self.entries.clone();
        for key in &overlay.deletes {
            entries.remove(key);
        }
        for (key, value) in &overlay.changes {
            entries.insert(key.clone(), value.clone());
        }
        Self { entries }
    }
}

impl StateView for StateSnapshot {
    fn get(&self, key: &StateKey) -> Option<StateValue> {
        self.entries.get(key).cloned()
    }
}

/// Result of looking a key up in an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayRead<'a> {
    /// The overlay holds a pending value.
    Changed(&'a StateValue),
    /// The overlay holds a pending deletion.
    Deleted,
    /// The overlay does not know the key; read from the base snapshot.
    Base,
}

/// Pending key changes and deletions.
///
/// A key is never both changed and deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialStateOverlay {
    changes: BTreeMap<StateKey, StateValue>,
    deletes: BTreeSet<StateKey>,
}

impl PartialStateOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change(mut self, key: impl Into<StateKey>, value: impl Into<StateValue>) -> Self {
        self.set(key.into(), value.into());
        self
    }

    pub fn with_delete(mut self, key: impl Into<StateKey>) -> Self {
        self.delete(key.into());
        self
    }

    pub fn changes(&self) -> &BTreeMap<StateKey, StateValue> {
        &self.changes
    }

    pub fn deletes(&self) -> &BTreeSet<StateKey> {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }

    pub fn read(&self, key: &StateKey) -> OverlayRead<'_> {
        if let Some(value) = self.changes.get(key) {
            OverlayRead::Changed(value)
        } else if self.deletes.contains(key) {
            OverlayRead::Deleted
        } else {
            OverlayRead::Base
        }
    }

    fn contains(&self, key: &StateKey) -> bool {
        self.changes.contains_key(key) || self.deletes.contains(key)
    }

    fn set(&mut self, key: StateKey, value: StateValue) {
        self.deletes.remove(&key);
        self.changes.insert(key, value);
    }

    fn delete(&mut self, key: StateKey) {
        self.changes.remove(&key);
        self.deletes.insert(key);
    }

    /// Builds an overlay from executed records, folding them in order.
    ///
    /// Records in [`TransactionStatus::Conflict`] carry no committed effects
    /// and are skipped.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EffectRecord>) -> Self {
        let mut overlay = Self::new();
        for record in records {
            if record.status == TransactionStatus::Conflict {
                continue;
            }
            for (key, value) in &record.writes {
                overlay.set(key.clone(), value.clone());
            }
            for key in &record.deletes {
                overlay.delete(key.clone());
            }
        }
        overlay
    }

    /// Folds `records` on top of `prior`.
    ///
    /// Keys touched by `records` always win; a key from `prior` is carried
    /// over, as a change or a delete, only when the new records left it alone.
    pub fn merge<'a>(
        prior: Option<&PartialStateOverlay>,
        records: impl IntoIterator<Item = &'a EffectRecord>,
    ) -> Self {
        let mut merged = Self::from_records(records);
        let Some(prior) = prior else {
            return merged;
        };

        let mut carried = Self::new();
        for (key, value) in &prior.changes {
            if !merged.contains(key) {
                carried.changes.insert(key.clone(), value.clone());
            }
        }
        for key in &prior.deletes {
            if !merged.contains(key) {
                carried.deletes.insert(key.clone());
            }
        }

        merged.changes.append(&mut carried.changes);
        merged.deletes.append(&mut carried.deletes);
        merged
    }
}

/// Read-through view of an overlay on top of a base snapshot.
#[derive(Clone, Copy)]
pub struct OverlayView<'a> {
    base: &'a dyn StateView,
    overlay: &'a PartialStateOverlay,
}

impl<'a> OverlayView<'a> {
    pub fn new(base: &'a dyn StateView, overlay: &'a PartialStateOverlay) -> Self {
        Self { base, overlay }
    }

    pub fn overlay(&self) -> &'a PartialStateOverlay {
        self.overlay
    }
}

impl StateView for OverlayView<'_> {
    fn get(&self, key: &StateKey) -> Option<StateValue> {
        match self.overlay.read(key) {
            OverlayRead::Changed(value) => Some(value.clone()),
            OverlayRead::Deleted => None,
            OverlayRead::Base => self.base.get(key),
        }
    }
}
