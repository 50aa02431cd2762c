//! Set Replicated Data type
//!
//! A set of [`Value`]s supporting add and remove. Observed-remove semantics
//! (concurrent add and remove of the same element: add wins) are resolved by
//! the replication layer's tag protocol; locally the set tracks which
//! elements were added, removed or cleared since the last flush.

use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, SetDelta};
use crate::error::Result;
use crate::replica::Origin;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    elements: BTreeSet<Value>,
    #[serde(skip)]
    pending: PendingSetDelta,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PendingSetDelta {
    cleared: bool,
    added: BTreeSet<Value>,
    removed: BTreeSet<Value>,
}

impl PendingSetDelta {
    fn is_empty(&self) -> bool {
        !self.cleared && self.added.is_empty() && self.removed.is_empty()
    }
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does this set contain the given element?
    pub fn has(&self, element: &Value) -> bool {
        self.elements.contains(element)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.elements.iter()
    }

    /// A copy of the current elements.
    pub fn elements(&self) -> BTreeSet<Value> {
        self.elements.clone()
    }

    /// Add an element
    pub fn add(&mut self, element: impl Into<Value>) -> &mut Self {
        let element = element.into();
        if !self.elements.contains(&element) {
            // Re-adding an element removed in this cycle cancels the removal
            if !self.pending.removed.remove(&element) {
                self.pending.added.insert(element.clone());
            }
            self.elements.insert(element);
        }
        self
    }

    /// Add several elements
    pub fn add_all<I, V>(&mut self, elements: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for element in elements {
            self.add(element);
        }
        self
    }

    /// Remove an element
    pub fn delete(&mut self, element: &Value) -> &mut Self {
        if self.elements.contains(element) {
            if self.elements.len() == 1 {
                self.clear();
            } else {
                self.elements.remove(element);
                if !self.pending.added.remove(element) {
                    self.pending.removed.insert(element.clone());
                }
            }
        }
        self
    }

    /// Remove all elements
    pub fn clear(&mut self) -> &mut Self {
        self.elements.clear();
        self.pending.cleared = true;
        self.pending.added.clear();
        self.pending.removed.clear();
        self
    }

    pub(crate) fn set_delta(&self) -> Option<SetDelta> {
        if self.pending.is_empty() {
            return None;
        }
        Some(SetDelta {
            cleared: self.pending.cleared,
            removed: self.pending.removed.iter().cloned().collect(),
            added: self.pending.added.iter().cloned().collect(),
        })
    }

    pub(crate) fn set_state(&self) -> SetDelta {
        SetDelta {
            cleared: false,
            removed: Vec::new(),
            added: self.elements.iter().cloned().collect(),
        }
    }

    pub(crate) fn apply_set_delta(&mut self, delta: &SetDelta) {
        if delta.cleared {
            self.elements.clear();
        }
        for element in &delta.removed {
            self.elements.remove(element);
        }
        for element in &delta.added {
            self.elements.insert(element.clone());
        }
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = PendingSetDelta::default();
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl ReplicatedData for Set {
    fn kind(&self) -> DataKind {
        DataKind::Set
    }

    fn has_delta(&self) -> bool {
        self.has_pending()
    }

    fn delta(&self, _origin: &Origin) -> Option<Delta> {
        self.set_delta().map(Delta::Set)
    }

    fn full_state(&self, _origin: &Origin) -> Delta {
        Delta::Set(self.set_state())
    }

    fn reset_delta(&mut self, _origin: &Origin) {
        self.clear_pending();
    }

    fn apply_delta(&mut self, delta: &Delta, _origin: &Origin) -> Result<()> {
        match delta {
            Delta::Set(d) => {
                self.apply_set_delta(d);
                Ok(())
            }
            other => Err(mismatch(DataKind::Set, other)),
        }
    }
}

impl<'a> IntoIterator for &'a Set {
    type Item = &'a Value;
    type IntoIter = std::collections::btree_set::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}
