//! The Replicated Data trait - the delta tracker every data type carries.
//!
//! Every mutating call on a data type updates two things together: the
//! materialized value, so later reads in the same command observe it, and a
//! delta record of the mutations since the last flush.
//!
//! ```text
//! local mutation:   value = m(value); tracked = tracked ⊕ m
//! flush:            send(delta(tracked)); tracked = ∅
//! incoming delta:   value = value ⊔ d      (tracked untouched)
//! restore:          value = state          (own parts stay local)
//! ```
//!
//! Incoming deltas only update the materialized value; they never produce
//! outgoing deltas, so merges are not echoed back to the replication layer.

use crate::delta::Delta;
use crate::error::Result;
use crate::replica::Origin;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The concrete Replicated Data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Counter,
    Register,
    Set,
    Vote,
    CounterMap,
    RegisterMap,
    MultiMap,
    Map,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Counter => "Counter",
            DataKind::Register => "Register",
            DataKind::Set => "Set",
            DataKind::Vote => "Vote",
            DataKind::CounterMap => "CounterMap",
            DataKind::RegisterMap => "RegisterMap",
            DataKind::MultiMap => "MultiMap",
            DataKind::Map => "Map",
        };
        f.write_str(name)
    }
}

/// Delta tracking and merging, implemented by every data type.
pub trait ReplicatedData {
    fn kind(&self) -> DataKind;

    /// Whether local mutations are waiting to be flushed.
    fn has_delta(&self) -> bool;

    /// Describe the local mutations since the last flush, as they would be
    /// stamped by `origin`. Returns `None` when nothing changed.
    fn delta(&self, origin: &Origin) -> Option<Delta>;

    /// Describe the whole current value.
    fn full_state(&self, origin: &Origin) -> Delta;

    /// Mark the tracked mutations as flushed by `origin` and clear the
    /// tracker. Stamps computed by [`ReplicatedData::delta`] with the same
    /// origin become part of the value.
    fn reset_delta(&mut self, origin: &Origin);

    /// Merge an incoming delta or full state from another replica.
    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()>;

    /// Rebuild this replica's own value from a full state it produced
    /// earlier, such as a passivation snapshot. Unlike an incoming merge,
    /// the parts of the state owned by `origin` are taken back as local.
    /// Called on an empty value.
    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        self.apply_delta(state, origin)
    }

    /// Drop the tracked mutations without flushing them, so the current
    /// value becomes a baseline every replica already holds. Unflushed
    /// register writes stay unstamped and lose to any remote write.
    fn discard_delta(&mut self, origin: &Origin) {
        self.reset_delta(origin);
    }

    /// Flush: compute the outgoing delta and reset the tracker.
    fn take_delta(&mut self, origin: &Origin) -> Option<Delta> {
        let delta = self.delta(origin);
        self.reset_delta(origin);
        delta
    }

    /// Flush as a full state: used for the first flush of a value that was
    /// created locally from scratch.
    fn take_full_state(&mut self, origin: &Origin) -> Delta {
        let state = self.full_state(origin);
        self.reset_delta(origin);
        state
    }
}

/// Build the error for a delta that targets another kind of data.
pub(crate) fn mismatch(expected: DataKind, delta: &Delta) -> crate::error::DataError {
    crate::error::DataError::KindMismatch {
        expected,
        found: delta.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(DataKind::CounterMap.to_string(), "CounterMap");
        assert_eq!(DataKind::Vote.to_string(), "Vote");
    }
}
