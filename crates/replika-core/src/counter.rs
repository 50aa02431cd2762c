//! Counter Replicated Data type
//!
//! A signed 64-bit counter that can be incremented and decremented.
//! Local mutations accumulate into a single signed change, which is what a
//! flush sends. Merging a remote delta adds its change to the value.
//!
//! Changes are summed, not deduplicated: correctness relies on the
//! replication layer delivering each delta exactly once.

use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{CounterDelta, Delta};
use crate::error::{DataError, Result};
use crate::replica::Origin;
use serde::{Deserialize, Serialize};

/// A Counter Replicated Data type
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current value
    value: i64,
    /// Sum of local changes since the last flush
    #[serde(skip)]
    pending: i64,
}

impl Counter {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current value
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Increment the counter. A negative amount decrements it.
    pub fn increment(&mut self, amount: i64) -> Result<&mut Self> {
        let value = self.value.checked_add(amount).ok_or_else(|| {
            DataError::OutOfRange(format!("counter {} + {} overflows", self.value, amount))
        })?;
        let pending = self.pending.checked_add(amount).ok_or_else(|| {
            DataError::OutOfRange(format!("counter change {} + {} overflows", self.pending, amount))
        })?;
        self.value = value;
        self.pending = pending;
        Ok(self)
    }

    /// Decrement the counter. A negative amount increments it.
    pub fn decrement(&mut self, amount: i64) -> Result<&mut Self> {
        let negated = amount.checked_neg().ok_or_else(|| {
            DataError::OutOfRange(format!("cannot decrement by {}", amount))
        })?;
        self.increment(negated)
    }

    pub(crate) fn counter_delta(&self) -> Option<CounterDelta> {
        (self.pending != 0).then_some(CounterDelta {
            change: self.pending,
        })
    }

    pub(crate) fn counter_state(&self) -> CounterDelta {
        CounterDelta { change: self.value }
    }

    pub(crate) fn apply_counter_delta(&mut self, delta: &CounterDelta) -> Result<()> {
        self.value = self.value.checked_add(delta.change).ok_or_else(|| {
            DataError::OutOfRange(format!(
                "merging change {} into counter {} overflows",
                delta.change, self.value
            ))
        })?;
        Ok(())
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = 0;
    }
}

impl ReplicatedData for Counter {
    fn kind(&self) -> DataKind {
        DataKind::Counter
    }

    fn has_delta(&self) -> bool {
        self.pending != 0
    }

    fn delta(&self, _origin: &Origin) -> Option<Delta> {
        self.counter_delta().map(Delta::Counter)
    }

    fn full_state(&self, _origin: &Origin) -> Delta {
        Delta::Counter(self.counter_state())
    }

    fn reset_delta(&mut self, _origin: &Origin) {
        self.clear_pending();
    }

    fn apply_delta(&mut self, delta: &Delta, _origin: &Origin) -> Result<()> {
        match delta {
            Delta::Counter(d) => self.apply_counter_delta(d),
            other => Err(mismatch(DataKind::Counter, other)),
        }
    }
}
