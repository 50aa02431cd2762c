//! Map Replicated Data type - a heterogeneous map of nested Replicated Data
//!
//! Each key is bound to one [`Replicated`] value, which may itself be a map.
//! Once bound, a key keeps its data type: setting a value of another kind
//! fails with a usage error instead of leaving the map unmergeable.
//!
//! Values bound since the last flush are sent as their full state; values
//! that were already known to other replicas are sent as nested deltas.
//!
//! A default value callback may be installed with [`Map::with_default_value`].
//! It is only ever consulted by [`Map::get_or_create`], which inserts the
//! value it creates: a read through that call is also a write. Use
//! [`Map::has`] to test for absence.

use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, MapDelta};
use crate::error::{DataError, Result};
use crate::replica::Origin;
use crate::replicated::Replicated;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Creates the value bound to an absent key, or `None` to refuse.
pub type DefaultValueFn = Arc<dyn Fn(&Value) -> Option<Replicated> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Map {
    entries: BTreeMap<Value, Replicated>,
    /// Keys bound since the last flush
    added: BTreeSet<Value>,
    /// Keys whose previous value must be discarded by other replicas
    removed: BTreeSet<Value>,
    cleared: bool,
    default_value: Option<DefaultValueFn>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback used by [`Map::get_or_create`].
    pub fn with_default_value<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) -> Option<Replicated> + Send + Sync + 'static,
    {
        self.default_value = Some(Arc::new(callback));
        self
    }

    pub fn has(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Replicated> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Replicated)> {
        self.entries.iter()
    }

    /// The value bound to `key`. Never creates a value.
    pub fn get(&self, key: &Value) -> Option<&Replicated> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &Value) -> Option<&mut Replicated> {
        self.entries.get_mut(key)
    }

    /// The value bound to `key`, creating it with the default value callback
    /// when absent. The created value is inserted into the map and sent to
    /// other replicas on the next flush.
    ///
    /// Fails with `InvalidState` when no callback is installed or the
    /// callback declines to create a value for `key`.
    pub fn get_or_create(&mut self, key: impl Into<Value>) -> Result<&mut Replicated> {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            let callback = self.default_value.as_ref().ok_or_else(|| {
                DataError::InvalidState(format!("no default value callback to create key {}", key))
            })?;
            let value = callback(&key).ok_or_else(|| {
                DataError::InvalidState(format!("no default value for key {}", key))
            })?;
            self.added.insert(key.clone());
            self.entries.insert(key.clone(), value);
        }
        self.entries
            .get_mut(&key)
            .ok_or_else(|| DataError::InvalidState(format!("key {} vanished", key)))
    }

    /// Bind `value` to `key`.
    ///
    /// Replacing a value of the same kind discards the old one on every
    /// replica. Binding a value of a different kind fails with `KindMismatch`
    /// and leaves the map untouched.
    pub fn set(&mut self, key: impl Into<Value>, value: impl Into<Replicated>) -> Result<&mut Self> {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.entries.get(&key) {
            if existing.kind() != value.kind() {
                return Err(DataError::KindMismatch {
                    expected: existing.kind(),
                    found: value.kind(),
                });
            }
            if !self.added.contains(&key) {
                self.removed.insert(key.clone());
            }
        }
        self.added.insert(key.clone());
        self.entries.insert(key, value);
        Ok(self)
    }

    /// Remove the value bound to `key`.
    pub fn delete(&mut self, key: &Value) -> &mut Self {
        if self.entries.remove(key).is_some() {
            // A value other replicas never saw needs no removal
            if !self.added.remove(key) {
                self.removed.insert(key.clone());
            }
        }
        self
    }

    /// Remove every value.
    pub fn clear(&mut self) -> &mut Self {
        self.entries.clear();
        self.added.clear();
        self.removed.clear();
        self.cleared = true;
        self
    }

    fn merge_entry(
        &mut self,
        key: &Value,
        delta: &Delta,
        origin: &Origin,
        restoring: bool,
    ) -> Result<()> {
        if let Some(existing) = self.entries.get_mut(key) {
            return if restoring {
                existing.restore(delta, origin)
            } else {
                existing.apply_delta(delta, origin)
            };
        }
        let value = if restoring {
            Replicated::from_state(delta, origin)?
        } else {
            Replicated::from_delta(delta, origin)?
        };
        self.entries.insert(key.clone(), value);
        Ok(())
    }

    fn merge(&mut self, delta: &Delta, origin: &Origin, restoring: bool) -> Result<()> {
        let Delta::Map(d) = delta else {
            return Err(mismatch(DataKind::Map, delta));
        };
        if d.cleared {
            self.entries.clear();
        }
        for key in &d.removed {
            self.entries.remove(key);
        }
        for (key, change) in &d.updated {
            self.merge_entry(key, change, origin, restoring)?;
        }
        for (key, state) in &d.added {
            // A remote rebinding after removal replaces whatever is here
            if self.entries.get(key).is_some_and(|v| v.kind() != state.kind()) {
                self.entries.remove(key);
            }
            self.merge_entry(key, state, origin, restoring)?;
        }
        Ok(())
    }
}

impl ReplicatedData for Map {
    fn kind(&self) -> DataKind {
        DataKind::Map
    }

    fn has_delta(&self) -> bool {
        self.cleared
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || self.entries.values().any(Replicated::has_delta)
    }

    fn delta(&self, origin: &Origin) -> Option<Delta> {
        let mut updated = Vec::new();
        let mut added = Vec::new();
        for (key, value) in &self.entries {
            if self.added.contains(key) {
                added.push((key.clone(), value.full_state(origin)));
            } else if let Some(delta) = value.delta(origin) {
                updated.push((key.clone(), delta));
            }
        }
        if !self.cleared && self.removed.is_empty() && updated.is_empty() && added.is_empty() {
            return None;
        }
        Some(Delta::Map(MapDelta {
            cleared: self.cleared,
            removed: self.removed.iter().cloned().collect(),
            updated,
            added,
        }))
    }

    fn full_state(&self, origin: &Origin) -> Delta {
        Delta::Map(MapDelta {
            cleared: false,
            removed: Vec::new(),
            updated: Vec::new(),
            added: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.full_state(origin)))
                .collect(),
        })
    }

    fn reset_delta(&mut self, origin: &Origin) {
        self.cleared = false;
        self.added.clear();
        self.removed.clear();
        for value in self.entries.values_mut() {
            value.reset_delta(origin);
        }
    }

    fn discard_delta(&mut self, origin: &Origin) {
        self.cleared = false;
        self.added.clear();
        self.removed.clear();
        for value in self.entries.values_mut() {
            value.discard_delta(origin);
        }
    }

    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()> {
        self.merge(delta, origin, false)
    }

    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        self.merge(state, origin, true)
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("entries", &self.entries)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .field("cleared", &self.cleared)
            .field("default_value", &self.default_value.is_some())
            .finish()
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
            && self.added == other.added
            && self.removed == other.removed
            && self.cleared == other.cleared
    }
}

// Only the entries are serialized; the tracker and callback are local
impl Serialize for Map {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct SerializableMap<'a> {
            entries: Vec<(&'a Value, &'a Replicated)>,
        }

        SerializableMap {
            entries: self.entries.iter().collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Map {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct DeserializableMap {
            entries: Vec<(Value, Replicated)>,
        }

        let helper = DeserializableMap::deserialize(deserializer)?;
        Ok(Map {
            entries: helper.entries.into_iter().collect(),
            ..Map::default()
        })
    }
}
