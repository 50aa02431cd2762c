//! Variant-tagged delta descriptions.
//!
//! A [`Delta`] describes either the local mutations of one data type since
//! its last flush, or (for a first flush and for snapshots) its full state.
//! A full state is simply a delta that, applied to an empty value of the
//! same kind, reconstructs the value.
//!
//! Keyed entries are carried as `(key, delta)` pairs rather than maps, since
//! keys are arbitrary [`Value`]s.

use crate::clock::{Clock, Stamp};
use crate::data::DataKind;
use crate::replica::ReplicaId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A full state description, delivered at activation or produced on a first
/// flush.
pub type FullState = Delta;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    Counter(CounterDelta),
    Register(RegisterDelta),
    Set(SetDelta),
    Vote(VoteDelta),
    CounterMap(CounterMapDelta),
    RegisterMap(RegisterMapDelta),
    MultiMap(MultiMapDelta),
    Map(MapDelta),
}

impl Delta {
    /// The kind of data this delta applies to.
    pub fn kind(&self) -> DataKind {
        match self {
            Delta::Counter(_) => DataKind::Counter,
            Delta::Register(_) => DataKind::Register,
            Delta::Set(_) => DataKind::Set,
            Delta::Vote(_) => DataKind::Vote,
            Delta::CounterMap(_) => DataKind::CounterMap,
            Delta::RegisterMap(_) => DataKind::RegisterMap,
            Delta::MultiMap(_) => DataKind::MultiMap,
            Delta::Map(_) => DataKind::Map,
        }
    }
}

/// Counter change. Changes are summed, never deduplicated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub change: i64,
}

/// A stamped register write. Only the full state of a value that was never
/// flushed carries no stamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterDelta {
    pub value: Value,
    pub clock: Clock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<Stamp>,
}

/// Set changes, applied in order: clear, remove, add.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SetDelta {
    pub cleared: bool,
    pub removed: Vec<Value>,
    pub added: Vec<Value>,
}

impl SetDelta {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.removed.is_empty() && self.added.is_empty()
    }
}

/// Votes by replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDelta {
    pub votes: BTreeMap<ReplicaId, bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterMapDelta {
    pub cleared: bool,
    pub removed: Vec<Value>,
    pub updated: Vec<(Value, CounterDelta)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterMapDelta {
    pub cleared: bool,
    pub removed: Vec<Value>,
    pub updated: Vec<(Value, RegisterDelta)>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiMapDelta {
    pub cleared: bool,
    pub removed: Vec<Value>,
    pub updated: Vec<(Value, SetDelta)>,
}

/// Changes to a heterogeneous map. `added` entries carry the full state of
/// values bound since the last flush; `updated` entries carry nested deltas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDelta {
    pub cleared: bool,
    pub removed: Vec<Value>,
    pub updated: Vec<(Value, Delta)>,
    pub added: Vec<(Value, Delta)>,
}
