//! # replika-core
//!
//! Delta-tracked Replicated Data types for stateful replicated entities.
//!
//! This crate provides:
//! - Primitive data types: [`Counter`], [`Register`], [`Set`], [`Vote`]
//! - Keyed data types: [`CounterMap`], [`RegisterMap`], [`MultiMap`]
//! - A heterogeneous [`Map`] that nests any of the above
//! - The [`ReplicatedData`] delta tracker and variant-tagged [`Delta`]s
//!
//! Every data type keeps its materialized value and a record of the local
//! mutations since the last flush. Flushing yields a [`Delta`]; applying a
//! delta from another replica merges it without producing a new one.
//!
//! ## Example
//!
//! ```rust
//! use replika_core::{Counter, Origin, ReplicatedData};
//!
//! let mut local = Counter::new();
//! local.increment(5).unwrap();
//! let delta = local.take_delta(&Origin::new("replica-a", 0)).unwrap();
//!
//! let mut remote = Counter::new();
//! remote.apply_delta(&delta, &Origin::new("replica-b", 0)).unwrap();
//! assert_eq!(remote.value(), 5);
//! ```

pub mod clock;
pub mod counter;
pub mod counter_map;
pub mod data;
pub mod delta;
pub mod error;
pub mod map;
pub mod multi_map;
pub mod register;
pub mod register_map;
pub mod replica;
pub mod replicated;
pub mod set;
pub mod value;
pub mod vote;

// Clocks and identities
pub use clock::{Clock, Stamp};
pub use replica::{Origin, ReplicaId};

// Data types
pub use counter::Counter;
pub use counter_map::CounterMap;
pub use map::{DefaultValueFn, Map};
pub use multi_map::MultiMap;
pub use register::Register;
pub use register_map::RegisterMap;
pub use replicated::Replicated;
pub use set::Set;
pub use vote::Vote;

// Delta tracking
pub use data::{DataKind, ReplicatedData};
pub use delta::{
    CounterDelta, CounterMapDelta, Delta, FullState, MapDelta, MultiMapDelta, RegisterDelta,
    RegisterMapDelta, SetDelta, VoteDelta,
};

pub use error::{DataError, Result};
pub use value::Value;
