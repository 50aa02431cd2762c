//! CounterMap Replicated Data type
//!
//! A map of keys to counters. Each counter tracks its own change; the map
//! tracks removed keys and whether it was cleared.

use crate::counter::Counter;
use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{CounterDelta, CounterMapDelta, Delta};
use crate::error::Result;
use crate::replica::Origin;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterMap {
    counters: BTreeMap<Value, Counter>,
    /// Keys created since the last flush
    #[serde(skip)]
    added: BTreeSet<Value>,
    #[serde(skip)]
    removed: BTreeSet<Value>,
    #[serde(skip)]
    cleared: bool,
}

impl CounterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the counter value at `key`
    pub fn get(&self, key: &Value) -> Option<i64> {
        self.counters.get(key).map(Counter::value)
    }

    /// Increment the counter at `key`, creating it at zero if absent
    pub fn increment(&mut self, key: impl Into<Value>, amount: i64) -> Result<&mut Self> {
        self.counter_entry(key.into()).increment(amount)?;
        Ok(self)
    }

    /// Decrement the counter at `key`, creating it at zero if absent
    pub fn decrement(&mut self, key: impl Into<Value>, amount: i64) -> Result<&mut Self> {
        self.counter_entry(key.into()).decrement(amount)?;
        Ok(self)
    }

    fn counter_entry(&mut self, key: Value) -> &mut Counter {
        if !self.counters.contains_key(&key) {
            self.added.insert(key.clone());
        }
        self.counters.entry(key).or_default()
    }

    pub fn has(&self, key: &Value) -> bool {
        self.counters.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.counters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, i64)> {
        self.counters.iter().map(|(k, c)| (k, c.value()))
    }

    /// Delete the counter at `key`
    pub fn delete(&mut self, key: &Value) -> &mut Self {
        if self.counters.remove(key).is_some() {
            self.added.remove(key);
            self.removed.insert(key.clone());
        }
        self
    }

    /// Remove all counters
    pub fn clear(&mut self) -> &mut Self {
        self.counters.clear();
        self.added.clear();
        self.removed.clear();
        self.cleared = true;
        self
    }

    /// Changed counters, plus created ones even if still at zero
    fn updated(&self) -> Vec<(Value, CounterDelta)> {
        self.counters
            .iter()
            .filter_map(|(k, c)| match c.counter_delta() {
                Some(d) => Some((k.clone(), d)),
                None if self.added.contains(k) => Some((k.clone(), CounterDelta::default())),
                None => None,
            })
            .collect()
    }
}

impl ReplicatedData for CounterMap {
    fn kind(&self) -> DataKind {
        DataKind::CounterMap
    }

    fn has_delta(&self) -> bool {
        self.cleared
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || self.counters.values().any(|c| c.has_delta())
    }

    fn delta(&self, _origin: &Origin) -> Option<Delta> {
        let updated = self.updated();
        if !self.cleared && self.removed.is_empty() && updated.is_empty() {
            return None;
        }
        Some(Delta::CounterMap(CounterMapDelta {
            cleared: self.cleared,
            removed: self.removed.iter().cloned().collect(),
            updated,
        }))
    }

    fn full_state(&self, _origin: &Origin) -> Delta {
        Delta::CounterMap(CounterMapDelta {
            cleared: false,
            removed: Vec::new(),
            updated: self
                .counters
                .iter()
                .map(|(k, c)| (k.clone(), c.counter_state()))
                .collect(),
        })
    }

    fn reset_delta(&mut self, _origin: &Origin) {
        self.cleared = false;
        self.added.clear();
        self.removed.clear();
        for counter in self.counters.values_mut() {
            counter.clear_pending();
        }
    }

    fn apply_delta(&mut self, delta: &Delta, _origin: &Origin) -> Result<()> {
        let Delta::CounterMap(d) = delta else {
            return Err(mismatch(DataKind::CounterMap, delta));
        };
        if d.cleared {
            self.counters.clear();
        }
        for key in &d.removed {
            self.counters.remove(key);
        }
        for (key, change) in &d.updated {
            self.counters
                .entry(key.clone())
                .or_default()
                .apply_counter_delta(change)?;
        }
        Ok(())
    }
}
