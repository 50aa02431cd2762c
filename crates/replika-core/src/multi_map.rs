//! MultiMap Replicated Data type
//!
//! A map of keys to sets of values. A key with no values is not present:
//! removing the last value of a key removes the key.

use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, MultiMapDelta, SetDelta};
use crate::error::Result;
use crate::replica::Origin;
use crate::set::Set;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiMap {
    entries: BTreeMap<Value, Set>,
    #[serde(skip)]
    removed: BTreeSet<Value>,
    #[serde(skip)]
    cleared: bool,
}

impl MultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The values at `key`; empty if the key is absent
    pub fn get(&self, key: &Value) -> BTreeSet<Value> {
        self.entries.get(key).map(Set::elements).unwrap_or_default()
    }

    /// Store a key-value pair
    pub fn put(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> &mut Self {
        self.entries.entry(key.into()).or_default().add(value);
        self
    }

    /// Store several values for a key
    pub fn put_all<I, V>(&mut self, key: impl Into<Value>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let key = key.into();
        let mut values = values.into_iter().peekable();
        if values.peek().is_some() {
            self.entries.entry(key).or_default().add_all(values);
        }
        self
    }

    /// Delete a single key-value pair
    pub fn delete(&mut self, key: &Value, value: &Value) -> &mut Self {
        let now_empty = match self.entries.get_mut(key) {
            Some(values) => {
                values.delete(value);
                values.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.delete_all(key);
        }
        self
    }

    /// Delete all values for a key
    pub fn delete_all(&mut self, key: &Value) -> &mut Self {
        if self.entries.remove(key).is_some() {
            self.removed.insert(key.clone());
        }
        self
    }

    /// Whether the key has at least one value
    pub fn has(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the key-value pair is present
    pub fn has_value(&self, key: &Value, value: &Value) -> bool {
        self.entries.get(key).is_some_and(|values| values.has(value))
    }

    /// Total number of values across all keys
    pub fn len(&self) -> usize {
        self.entries.values().map(Set::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys with values
    pub fn keys_len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    /// Iterate over every key-value pair
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k, v)))
    }

    /// Remove all entries
    pub fn clear(&mut self) -> &mut Self {
        self.entries.clear();
        self.removed.clear();
        self.cleared = true;
        self
    }

    fn updated(&self) -> Vec<(Value, SetDelta)> {
        self.entries
            .iter()
            .filter_map(|(k, values)| values.set_delta().map(|d| (k.clone(), d)))
            .collect()
    }
}

impl ReplicatedData for MultiMap {
    fn kind(&self) -> DataKind {
        DataKind::MultiMap
    }

    fn has_delta(&self) -> bool {
        self.cleared || !self.removed.is_empty() || self.entries.values().any(Set::has_pending)
    }

    fn delta(&self, _origin: &Origin) -> Option<Delta> {
        let updated = self.updated();
        if !self.cleared && self.removed.is_empty() && updated.is_empty() {
            return None;
        }
        Some(Delta::MultiMap(MultiMapDelta {
            cleared: self.cleared,
            removed: self.removed.iter().cloned().collect(),
            updated,
        }))
    }

    fn full_state(&self, _origin: &Origin) -> Delta {
        Delta::MultiMap(MultiMapDelta {
            cleared: false,
            removed: Vec::new(),
            updated: self
                .entries
                .iter()
                .map(|(k, values)| (k.clone(), values.set_state()))
                .collect(),
        })
    }

    fn reset_delta(&mut self, _origin: &Origin) {
        self.cleared = false;
        self.removed.clear();
        for values in self.entries.values_mut() {
            values.clear_pending();
        }
    }

    fn apply_delta(&mut self, delta: &Delta, _origin: &Origin) -> Result<()> {
        let Delta::MultiMap(d) = delta else {
            return Err(mismatch(DataKind::MultiMap, delta));
        };
        if d.cleared {
            self.entries.clear();
        }
        for key in &d.removed {
            self.entries.remove(key);
        }
        for (key, change) in &d.updated {
            let values = self.entries.entry(key.clone()).or_default();
            values.apply_set_delta(change);
            if values.is_empty() {
                self.entries.remove(key);
            }
        }
        Ok(())
    }
}
