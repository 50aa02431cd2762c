//! RegisterMap Replicated Data type
//!
//! A map of keys to last-writer-wins registers.
//!
//! The custom auto-increment floor of a key outlives its register: a key
//! deleted and set again must still use a greater clock value.

use crate::clock::Clock;
use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, RegisterDelta, RegisterMapDelta};
use crate::error::Result;
use crate::register::{check_auto_increment, Register};
use crate::replica::Origin;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterMap {
    registers: BTreeMap<Value, Register>,
    #[serde(skip)]
    removed: BTreeSet<Value>,
    #[serde(skip)]
    cleared: bool,
    /// Auto-increment floors of deleted registers
    #[serde(skip)]
    floors: BTreeMap<Value, i64>,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the register value at `key`
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.registers.get(key).map(Register::value)
    }

    /// The register at `key`, for inspecting its clock and stamp
    pub fn register(&self, key: &Value) -> Option<&Register> {
        self.registers.get(key)
    }

    /// Set the register at `key` using `clock`
    pub fn set(
        &mut self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        clock: Clock,
    ) -> Result<&mut Self> {
        let key = key.into();
        match self.registers.get_mut(&key) {
            Some(register) => {
                register.set_with_clock(value, clock)?;
            }
            None => {
                check_auto_increment(self.floors.get(&key).copied(), clock)?;
                self.registers.insert(key, Register::with_clock(value, clock));
            }
        }
        Ok(self)
    }

    fn keep_floor(&mut self, key: &Value, register: &Register) {
        if let Some(last) = register.last_auto_increment() {
            let floor = self.floors.entry(key.clone()).or_insert(last);
            *floor = (*floor).max(last);
        }
    }

    pub fn has(&self, key: &Value) -> bool {
        self.registers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.registers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.registers.iter().map(|(k, r)| (k, r.value()))
    }

    /// Delete the register at `key`
    pub fn delete(&mut self, key: &Value) -> &mut Self {
        if let Some(register) = self.registers.remove(key) {
            self.keep_floor(key, &register);
            self.removed.insert(key.clone());
        }
        self
    }

    /// Remove all registers
    pub fn clear(&mut self) -> &mut Self {
        for (key, register) in std::mem::take(&mut self.registers) {
            self.keep_floor(&key, &register);
        }
        self.removed.clear();
        self.cleared = true;
        self
    }

    fn updated(&self, origin: &Origin) -> Vec<(Value, RegisterDelta)> {
        self.registers
            .iter()
            .filter_map(|(k, r)| r.register_delta(origin).map(|d| (k.clone(), d)))
            .collect()
    }

    fn merge(&mut self, delta: &Delta, origin: &Origin, restoring: bool) -> Result<()> {
        let Delta::RegisterMap(d) = delta else {
            return Err(mismatch(DataKind::RegisterMap, delta));
        };
        if d.cleared {
            self.registers.clear();
        }
        for key in &d.removed {
            self.registers.remove(key);
        }
        for (key, write) in &d.updated {
            match self.registers.get_mut(key) {
                Some(register) => {
                    register.apply_register_delta(write, origin);
                }
                None => {
                    let register = if restoring {
                        Register::from_snapshot(write, origin)
                    } else {
                        Register::from_remote(write, origin)
                    };
                    self.registers.insert(key.clone(), register);
                }
            }
        }
        Ok(())
    }
}

impl ReplicatedData for RegisterMap {
    fn kind(&self) -> DataKind {
        DataKind::RegisterMap
    }

    fn has_delta(&self) -> bool {
        self.cleared || !self.removed.is_empty() || self.registers.values().any(|r| r.has_delta())
    }

    fn delta(&self, origin: &Origin) -> Option<Delta> {
        let updated = self.updated(origin);
        if !self.cleared && self.removed.is_empty() && updated.is_empty() {
            return None;
        }
        Some(Delta::RegisterMap(RegisterMapDelta {
            cleared: self.cleared,
            removed: self.removed.iter().cloned().collect(),
            updated,
        }))
    }

    fn full_state(&self, origin: &Origin) -> Delta {
        Delta::RegisterMap(RegisterMapDelta {
            cleared: false,
            removed: Vec::new(),
            updated: self
                .registers
                .iter()
                .map(|(k, r)| (k.clone(), r.register_state(origin)))
                .collect(),
        })
    }

    fn reset_delta(&mut self, origin: &Origin) {
        self.cleared = false;
        self.removed.clear();
        for register in self.registers.values_mut() {
            register.commit(origin);
        }
    }

    fn discard_delta(&mut self, origin: &Origin) {
        self.cleared = false;
        self.removed.clear();
        for register in self.registers.values_mut() {
            register.discard_delta(origin);
        }
    }

    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()> {
        self.merge(delta, origin, false)
    }

    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        self.merge(state, origin, true)
    }
}
