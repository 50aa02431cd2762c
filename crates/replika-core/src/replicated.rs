//! The sum of every Replicated Data type.
//!
//! An entity's state is one `Replicated` value, and a [`Map`] holds
//! `Replicated` values, so trees of data can nest to any depth. Each variant
//! carries its own delta tracker; the [`ReplicatedData`] impl here only
//! dispatches.

use crate::counter::Counter;
use crate::counter_map::CounterMap;
use crate::data::{DataKind, ReplicatedData};
use crate::delta::Delta;
use crate::error::Result;
use crate::map::Map;
use crate::multi_map::MultiMap;
use crate::register::Register;
use crate::register_map::RegisterMap;
use crate::replica::Origin;
use crate::set::Set;
use crate::vote::Vote;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Replicated {
    Counter(Counter),
    Register(Register),
    Set(Set),
    Vote(Vote),
    CounterMap(CounterMap),
    RegisterMap(RegisterMap),
    MultiMap(MultiMap),
    Map(Map),
}

macro_rules! dispatch {
    ($self:expr, $data:ident => $body:expr) => {
        match $self {
            Replicated::Counter($data) => $body,
            Replicated::Register($data) => $body,
            Replicated::Set($data) => $body,
            Replicated::Vote($data) => $body,
            Replicated::CounterMap($data) => $body,
            Replicated::RegisterMap($data) => $body,
            Replicated::MultiMap($data) => $body,
            Replicated::Map($data) => $body,
        }
    };
}

macro_rules! variant_access {
    ($variant:ident, $ty:ty, $as_ref:ident, $as_mut:ident) => {
        pub fn $as_ref(&self) -> Option<&$ty> {
            match self {
                Replicated::$variant(data) => Some(data),
                _ => None,
            }
        }

        pub fn $as_mut(&mut self) -> Option<&mut $ty> {
            match self {
                Replicated::$variant(data) => Some(data),
                _ => None,
            }
        }
    };
}

impl Replicated {
    /// Materialize the value a remote delta or full state describes, as seen
    /// by a replica that has never held it. The result carries no pending
    /// local changes.
    pub fn from_delta(delta: &Delta, origin: &Origin) -> Result<Self> {
        if let Delta::Register(write) = delta {
            return Ok(Replicated::Register(Register::from_remote(write, origin)));
        }
        let mut value = Self::empty(delta);
        value.apply_delta(delta, origin)?;
        Ok(value)
    }

    /// Rebuild the value `origin` described in an earlier full state, such
    /// as its own passivation snapshot. Votes and auto-increment clocks
    /// recorded for `origin` come back as local.
    pub fn from_state(state: &Delta, origin: &Origin) -> Result<Self> {
        let mut value = Self::empty(state);
        value.restore(state, origin)?;
        Ok(value)
    }

    fn empty(delta: &Delta) -> Self {
        match delta {
            Delta::Counter(_) => Replicated::Counter(Counter::new()),
            Delta::Register(write) => {
                Replicated::Register(Register::with_clock(write.value.clone(), write.clock))
            }
            Delta::Set(_) => Replicated::Set(Set::new()),
            Delta::Vote(_) => Replicated::Vote(Vote::new()),
            Delta::CounterMap(_) => Replicated::CounterMap(CounterMap::new()),
            Delta::RegisterMap(_) => Replicated::RegisterMap(RegisterMap::new()),
            Delta::MultiMap(_) => Replicated::MultiMap(MultiMap::new()),
            Delta::Map(_) => Replicated::Map(Map::new()),
        }
    }

    variant_access!(Counter, Counter, as_counter, as_counter_mut);
    variant_access!(Register, Register, as_register, as_register_mut);
    variant_access!(Set, Set, as_set, as_set_mut);
    variant_access!(Vote, Vote, as_vote, as_vote_mut);
    variant_access!(CounterMap, CounterMap, as_counter_map, as_counter_map_mut);
    variant_access!(RegisterMap, RegisterMap, as_register_map, as_register_map_mut);
    variant_access!(MultiMap, MultiMap, as_multi_map, as_multi_map_mut);
    variant_access!(Map, Map, as_map, as_map_mut);
}

impl ReplicatedData for Replicated {
    fn kind(&self) -> DataKind {
        dispatch!(self, data => data.kind())
    }

    fn has_delta(&self) -> bool {
        dispatch!(self, data => data.has_delta())
    }

    fn delta(&self, origin: &Origin) -> Option<Delta> {
        dispatch!(self, data => data.delta(origin))
    }

    fn full_state(&self, origin: &Origin) -> Delta {
        dispatch!(self, data => data.full_state(origin))
    }

    fn reset_delta(&mut self, origin: &Origin) {
        dispatch!(self, data => data.reset_delta(origin))
    }

    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()> {
        dispatch!(self, data => data.apply_delta(delta, origin))
    }

    fn discard_delta(&mut self, origin: &Origin) {
        dispatch!(self, data => data.discard_delta(origin))
    }

    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        dispatch!(self, data => data.restore(state, origin))
    }
}

macro_rules! from_variant {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Replicated {
                fn from(data: $variant) -> Self {
                    Replicated::$variant(data)
                }
            }
        )*
    };
}

from_variant!(Counter, Register, Set, Vote, CounterMap, RegisterMap, MultiMap, Map);
