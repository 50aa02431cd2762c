//! Register Replicated Data type
//!
//! A last-writer-wins register. Every write records the [`Clock`] it was
//! made with; the write is stamped with a timestamp when it is flushed. On
//! merge, the write with the strictly greater timestamp wins and equal
//! timestamps are resolved in favour of the lower replica id.
//!
//! Writes made with [`Clock::CustomAutoIncrement`] must carry a value
//! strictly greater than the last one this replica used for the register.

use crate::clock::{Clock, Stamp};
use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, RegisterDelta};
use crate::error::{DataError, Result};
use crate::replica::Origin;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A Register Replicated Data type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Register {
    /// The current value
    value: Value,
    /// Clock of the current value
    clock: Clock,
    /// Stamp of the current value; `None` until its first flush
    stamp: Option<Stamp>,
    /// Last custom auto-increment value written by this replica
    last_auto_increment: Option<i64>,
    /// Whether the current value is an unflushed local write
    #[serde(skip)]
    dirty: bool,
}

impl Register {
    /// Create a register holding `value`, written with the default clock.
    pub fn new(value: impl Into<Value>) -> Self {
        Self::with_clock(value, Clock::Default)
    }

    /// Create a register holding `value`, written with `clock`.
    pub fn with_clock(value: impl Into<Value>, clock: Clock) -> Self {
        Self {
            value: value.into(),
            clock,
            stamp: None,
            last_auto_increment: match clock {
                Clock::CustomAutoIncrement(v) => Some(v),
                _ => None,
            },
            dirty: true,
        }
    }

    /// Rebuild a register from a full state this replica flushed earlier.
    ///
    /// An unstamped state was never flushed, so its auto-increment clock was
    /// used here and still bounds later writes.
    pub fn from_snapshot(state: &RegisterDelta, origin: &Origin) -> Self {
        let mut register = Self::from_remote(state, origin);
        if state.stamp.is_none() {
            register.last_auto_increment = match state.clock {
                Clock::CustomAutoIncrement(v) => Some(v),
                _ => None,
            };
        }
        register
    }

    /// Materialize a register from a remote write.
    pub fn from_remote(delta: &RegisterDelta, origin: &Origin) -> Self {
        let mut register = Self {
            value: delta.value.clone(),
            clock: delta.clock,
            stamp: None,
            last_auto_increment: None,
            dirty: false,
        };
        register.accept(delta, origin);
        register
    }

    /// Get the current value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The clock the current value was written with
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// The stamp of the current value, once flushed or merged
    pub fn stamp(&self) -> Option<&Stamp> {
        self.stamp.as_ref()
    }

    /// Set the value using the default clock
    pub fn set(&mut self, value: impl Into<Value>) -> &mut Self {
        self.value = value.into();
        self.clock = Clock::Default;
        self.dirty = true;
        self
    }

    /// Set the value using the given clock.
    ///
    /// Fails with `InvalidState` if `clock` is a custom auto-increment clock
    /// whose value does not exceed the last one used by this replica.
    pub fn set_with_clock(&mut self, value: impl Into<Value>, clock: Clock) -> Result<&mut Self> {
        check_auto_increment(self.last_auto_increment, clock)?;
        if let Clock::CustomAutoIncrement(next) = clock {
            self.last_auto_increment = Some(next);
        }
        self.value = value.into();
        self.clock = clock;
        self.dirty = true;
        Ok(self)
    }

    /// Last custom auto-increment value this replica used
    pub(crate) fn last_auto_increment(&self) -> Option<i64> {
        self.last_auto_increment
    }

    fn current_timestamp(&self) -> Option<i64> {
        self.stamp.as_ref().map(|s| s.timestamp)
    }

    /// Stamp of the current value as `origin` would flush it.
    fn stamp_for(&self, origin: &Origin) -> Option<Stamp> {
        if self.dirty {
            Some(Stamp::new(
                self.clock.stamp(origin.now, self.current_timestamp()),
                origin.replica.clone(),
            ))
        } else {
            self.stamp.clone()
        }
    }

    pub(crate) fn register_delta(&self, origin: &Origin) -> Option<RegisterDelta> {
        self.dirty.then(|| self.register_state(origin))
    }

    pub(crate) fn register_state(&self, origin: &Origin) -> RegisterDelta {
        RegisterDelta {
            value: self.value.clone(),
            clock: self.clock,
            stamp: self.stamp_for(origin),
        }
    }

    pub(crate) fn commit(&mut self, origin: &Origin) {
        if self.dirty {
            self.stamp = self.stamp_for(origin);
            self.dirty = false;
        }
    }

    /// Merge a remote write. Returns whether it won.
    pub(crate) fn apply_register_delta(&mut self, delta: &RegisterDelta, origin: &Origin) -> bool {
        let wins = match (&delta.stamp, &self.stamp) {
            (_, None) => true,
            (Some(incoming), Some(current)) => incoming.wins_over(current),
            // A write that was never flushed loses to any flushed one
            (None, Some(_)) => false,
        };
        if wins {
            self.accept(delta, origin);
        }
        wins
    }

    fn accept(&mut self, delta: &RegisterDelta, origin: &Origin) {
        self.value = delta.value.clone();
        self.clock = delta.clock;
        self.stamp = delta.stamp.clone();
        self.dirty = false;
        // Only this replica's own writes advance its auto-increment clock
        if let (Clock::CustomAutoIncrement(v), Some(stamp)) = (delta.clock, &delta.stamp) {
            if stamp.replica == origin.replica {
                self.last_auto_increment = Some(self.last_auto_increment.map_or(v, |l| l.max(v)));
            }
        }
    }
}

impl ReplicatedData for Register {
    fn kind(&self) -> DataKind {
        DataKind::Register
    }

    fn has_delta(&self) -> bool {
        self.dirty
    }

    fn delta(&self, origin: &Origin) -> Option<Delta> {
        self.register_delta(origin).map(Delta::Register)
    }

    fn full_state(&self, origin: &Origin) -> Delta {
        Delta::Register(self.register_state(origin))
    }

    fn reset_delta(&mut self, origin: &Origin) {
        self.commit(origin);
    }

    fn discard_delta(&mut self, _origin: &Origin) {
        self.dirty = false;
    }

    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()> {
        match delta {
            Delta::Register(d) => {
                self.apply_register_delta(d, origin);
                Ok(())
            }
            other => Err(mismatch(DataKind::Register, other)),
        }
    }

    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        match state {
            Delta::Register(d) => {
                *self = Register::from_snapshot(d, origin);
                Ok(())
            }
            other => Err(mismatch(DataKind::Register, other)),
        }
    }
}

/// Fail unless `clock` is usable after `last`, the previous custom
/// auto-increment value used by this replica.
pub(crate) fn check_auto_increment(last: Option<i64>, clock: Clock) -> Result<()> {
    match (clock, last) {
        (Clock::CustomAutoIncrement(next), Some(last)) if next <= last => {
            Err(DataError::InvalidState(format!(
                "custom auto-increment clock must increase: {} is not greater than {}",
                next, last
            )))
        }
        _ => Ok(()),
    }
}
