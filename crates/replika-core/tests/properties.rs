//! Property-based tests for the Replicated Data types
//!
//! These tests check the guarantees replicas rely on to converge:
//!  - Counters: deltas sum, in any merge order
//!  - Registers: the higher stamp wins, in any arrival order
//!  - Sets and maps: a replica applying every flushed delta mirrors the writer
//!  - Maps: keys keep their data type; created values are created once
//!  - Snapshots: every kind comes back unchanged from its own full state

use proptest::prelude::*;
use replika_core::{
    Clock, Counter, CounterMap, DataError, DataKind, Map, MultiMap, Origin, Register, RegisterMap,
    Replicated, ReplicatedData, Set, Value, Vote, VoteDelta, Delta, ReplicaId,
};

/// A mutation of a set or multimap, generated for prop-testing
#[derive(Clone, Debug)]
enum SetOp {
    Add(i64),
    Delete(i64),
    Clear,
}

fn set_op_strategy() -> impl Strategy<Value = SetOp> {
    prop_oneof![
        4 => (0i64..10).prop_map(SetOp::Add),
        3 => (0i64..10).prop_map(SetOp::Delete),
        1 => Just(SetOp::Clear),
    ]
}

/// Flush cycles, each a batch of operations
fn cycles_strategy() -> impl Strategy<Value = Vec<Vec<SetOp>>> {
    prop::collection::vec(prop::collection::vec(set_op_strategy(), 0..8), 1..6)
}

fn writer() -> Origin {
    Origin::new("writer", 1_000)
}

fn reader() -> Origin {
    Origin::new("reader", 1_000)
}

// ============================================================================
// Counter Property Tests
// ============================================================================

proptest! {
    #[test]
    fn counter_value_is_sum_of_changes(changes in prop::collection::vec(-1_000i64..1_000, 0..30)) {
        let mut counter = Counter::new();
        for change in &changes {
            if *change >= 0 {
                counter.increment(*change).unwrap();
            } else {
                counter.decrement(-change).unwrap();
            }
        }
        prop_assert_eq!(counter.value(), changes.iter().sum::<i64>());
    }

    #[test]
    fn counter_merge_is_commutative(
        a in prop::collection::vec(-100i64..100, 0..10),
        b in prop::collection::vec(-100i64..100, 0..10)
    ) {
        let mut replica_a = Counter::new();
        for n in &a {
            replica_a.increment(*n).unwrap();
        }
        let mut replica_b = Counter::new();
        for n in &b {
            replica_b.increment(*n).unwrap();
        }
        let from_a = replica_a.take_delta(&Origin::new("a", 0));
        let from_b = replica_b.take_delta(&Origin::new("b", 0));

        let mut ab = Counter::new();
        let mut ba = Counter::new();
        for delta in from_a.iter().chain(from_b.iter()) {
            ab.apply_delta(delta, &reader()).unwrap();
        }
        for delta in from_b.iter().chain(from_a.iter()) {
            ba.apply_delta(delta, &reader()).unwrap();
        }

        let total = a.iter().sum::<i64>() + b.iter().sum::<i64>();
        prop_assert_eq!(ab.value(), total);
        prop_assert_eq!(ba.value(), total);
    }
}

// ============================================================================
// Register Property Tests
// ============================================================================

proptest! {
    #[test]
    fn register_higher_custom_clock_wins_in_any_order(
        c1 in -1_000i64..1_000,
        gap in 1i64..1_000,
        first_arrives_first in any::<bool>()
    ) {
        let c2 = c1 + gap;
        let mut low = Register::with_clock("low", Clock::Custom(c1));
        let mut high = Register::with_clock("high", Clock::Custom(c2));
        let low_write = low.take_delta(&Origin::new("r1", 0)).unwrap();
        let high_write = high.take_delta(&Origin::new("r2", 0)).unwrap();

        let mut remote = Register::new("initial");
        remote.take_delta(&Origin::new("r3", -10_000));
        let order = if first_arrives_first {
            [&low_write, &high_write]
        } else {
            [&high_write, &low_write]
        };
        for write in order {
            remote.apply_delta(write, &reader()).unwrap();
        }
        prop_assert_eq!(remote.value(), &Value::from("high"));
    }

    #[test]
    fn register_default_clock_later_writer_wins(
        t1 in 0i64..1_000_000,
        gap in 1i64..1_000,
        swap in any::<bool>()
    ) {
        let mut early = Register::new("early");
        let mut late = Register::new("late");
        let early_write = early.take_delta(&Origin::new("a", t1)).unwrap();
        let late_write = late.take_delta(&Origin::new("b", t1 + gap)).unwrap();

        // Each replica merges the other's write
        if swap {
            early.apply_delta(&late_write, &Origin::new("a", 0)).unwrap();
            late.apply_delta(&early_write, &Origin::new("b", 0)).unwrap();
        } else {
            late.apply_delta(&early_write, &Origin::new("b", 0)).unwrap();
            early.apply_delta(&late_write, &Origin::new("a", 0)).unwrap();
        }
        prop_assert_eq!(early.value(), &Value::from("late"));
        prop_assert_eq!(late.value(), &Value::from("late"));
    }

    #[test]
    fn register_equal_clocks_resolve_to_lower_replica(
        clock in -1_000i64..1_000,
        swap in any::<bool>()
    ) {
        let mut a = Register::with_clock("from-a", Clock::Custom(clock));
        let mut b = Register::with_clock("from-b", Clock::Custom(clock));
        let from_a = a.take_delta(&Origin::new("replica-a", 0)).unwrap();
        let from_b = b.take_delta(&Origin::new("replica-b", 0)).unwrap();

        let mut remote = Register::new("initial");
        remote.take_delta(&Origin::new("replica-z", -10_000));
        let order = if swap { [&from_a, &from_b] } else { [&from_b, &from_a] };
        for write in order {
            remote.apply_delta(write, &reader()).unwrap();
        }
        prop_assert_eq!(remote.value(), &Value::from("from-a"));
    }
}

// ============================================================================
// Set and MultiMap Property Tests
// ============================================================================

proptest! {
    #[test]
    fn set_added_element_is_visible_and_travels(x in any::<i64>()) {
        let mut set = Set::new();
        set.add(x);
        prop_assert!(set.has(&Value::from(x)));

        let delta = set.take_delta(&writer()).unwrap();
        let mut fresh = Set::new();
        fresh.apply_delta(&delta, &reader()).unwrap();
        prop_assert!(fresh.has(&Value::from(x)));
    }

    #[test]
    fn set_reader_mirrors_writer(cycles in cycles_strategy()) {
        let mut local = Set::new();
        let mut remote = Set::new();
        for ops in cycles {
            for op in ops {
                match op {
                    SetOp::Add(x) => { local.add(x); }
                    SetOp::Delete(x) => { local.delete(&Value::from(x)); }
                    SetOp::Clear => { local.clear(); }
                }
            }
            if let Some(delta) = local.take_delta(&writer()) {
                remote.apply_delta(&delta, &reader()).unwrap();
            }
            prop_assert_eq!(remote.elements(), local.elements());
            prop_assert!(!remote.has_delta());
        }
    }

    #[test]
    fn multi_map_reader_mirrors_writer(
        cycles in cycles_strategy(),
        keys in prop::collection::vec(0i64..3, 8)
    ) {
        let mut local = MultiMap::new();
        let mut remote = MultiMap::new();
        for ops in cycles {
            for (i, op) in ops.into_iter().enumerate() {
                let key = Value::from(keys[i % keys.len()]);
                match op {
                    SetOp::Add(x) => { local.put(key, x); }
                    SetOp::Delete(x) => { local.delete(&key, &Value::from(x)); }
                    SetOp::Clear => { local.delete_all(&key); }
                }
            }
            if let Some(delta) = local.take_delta(&writer()) {
                remote.apply_delta(&delta, &reader()).unwrap();
            }
            prop_assert_eq!(remote.keys_len(), local.keys_len());
            for key in local.keys() {
                prop_assert_eq!(remote.get(key), local.get(key));
            }
        }
    }

    #[test]
    fn counter_map_reader_mirrors_writer(
        changes in prop::collection::vec((0i64..4, -50i64..50, any::<bool>()), 0..30)
    ) {
        let mut local = CounterMap::new();
        let mut remote = CounterMap::new();
        for (i, (key, amount, delete)) in changes.into_iter().enumerate() {
            if delete {
                local.delete(&Value::from(key));
            } else {
                local.increment(key, amount).unwrap();
            }
            if i % 3 == 0 {
                if let Some(delta) = local.take_delta(&writer()) {
                    remote.apply_delta(&delta, &reader()).unwrap();
                }
            }
        }
        if let Some(delta) = local.take_delta(&writer()) {
            remote.apply_delta(&delta, &reader()).unwrap();
        }
        prop_assert_eq!(remote.iter().collect::<Vec<_>>(), local.iter().collect::<Vec<_>>());
    }
}

// ============================================================================
// Map Tests
// ============================================================================

#[test]
fn map_rebinding_key_to_other_kind_is_usage_error() {
    let mut map = Map::new();
    map.set("k", Counter::new()).unwrap();

    let err = map.set("k", Register::new("v")).unwrap_err();
    assert!(err.is_usage_error());
    assert!(matches!(err, DataError::KindMismatch { .. }));
    assert_eq!(
        map.get(&Value::from("k")).map(ReplicatedData::kind),
        Some(DataKind::Counter)
    );
}

#[test]
fn map_get_or_create_materializes_once() {
    let mut map = Map::new().with_default_value(|_| Some(Set::new().into()));
    assert!(!map.has(&Value::from("k")));

    map.get_or_create("k")
        .unwrap()
        .as_set_mut()
        .unwrap()
        .add("first");
    let again = map.get_or_create("k").unwrap();
    assert!(again.as_set().unwrap().has(&Value::from("first")));
    assert_eq!(map.len(), 1);

    // The created value is flushed as a new binding
    let Some(Delta::Map(delta)) = map.take_delta(&writer()) else {
        panic!("expected map delta");
    };
    assert_eq!(delta.added.len(), 1);
}

#[test]
fn map_of_every_kind_converges() {
    let mut local = Map::new();
    let mut remote = Map::new();

    let mut counter_map = CounterMap::new();
    counter_map.increment("a", 2).unwrap();
    let entries: Vec<(&str, Replicated)> = vec![
        ("counter", Counter::new().into()),
        ("register", Register::new("v").into()),
        ("set", Set::new().into()),
        ("vote", Vote::new().into()),
        ("counter_map", counter_map.into()),
        ("nested", Map::new().into()),
    ];
    for (key, value) in entries {
        local.set(key, value).unwrap();
    }
    remote
        .apply_delta(&local.take_delta(&writer()).unwrap(), &reader())
        .unwrap();

    local
        .get_mut(&Value::from("counter"))
        .and_then(Replicated::as_counter_mut)
        .unwrap()
        .increment(4)
        .unwrap();
    local
        .get_mut(&Value::from("nested"))
        .and_then(Replicated::as_map_mut)
        .unwrap()
        .set("inner", Counter::new())
        .unwrap();
    remote
        .apply_delta(&local.take_delta(&writer()).unwrap(), &reader())
        .unwrap();

    assert_eq!(remote.len(), local.len());
    for key in local.keys() {
        assert_eq!(
            remote.get(key).map(ReplicatedData::kind),
            local.get(key).map(ReplicatedData::kind)
        );
    }
    assert_eq!(
        remote
            .get(&Value::from("counter"))
            .and_then(Replicated::as_counter)
            .map(Counter::value),
        Some(4)
    );
    assert!(remote
        .get(&Value::from("nested"))
        .and_then(Replicated::as_map)
        .unwrap()
        .has(&Value::from("inner")));
}

// ============================================================================
// Vote Tests
// ============================================================================

#[test]
fn vote_two_of_three_is_majority() {
    let mut vote = Vote::new();
    vote.set_vote(true);
    let others = VoteDelta {
        votes: [
            (ReplicaId::from("r2"), true),
            (ReplicaId::from("r3"), false),
        ]
        .into_iter()
        .collect(),
    };
    vote.apply_delta(&Delta::Vote(others), &Origin::new("r1", 0))
        .unwrap();

    assert_eq!(vote.total_voters(), 3);
    assert!(vote.majority());
    assert!(!vote.all());
    assert!(vote.at_least_one());
}

// ============================================================================
// Snapshot Restore Tests
// ============================================================================

/// Register writes: all with the default clock, or all auto-incremented
fn register_writes() -> impl Strategy<Value = (bool, Vec<i64>)> {
    (any::<bool>(), prop::collection::vec(0i64..100, 1..5))
}

fn write_register(auto: bool, writes: &[i64]) -> Register {
    let mut register = Register::new("initial");
    for (i, write) in writes.iter().enumerate() {
        if auto {
            register
                .set_with_clock(*write, Clock::CustomAutoIncrement(i as i64 + 1))
                .unwrap();
        } else {
            register.set(*write);
        }
    }
    register
}

fn leaf_strategy() -> impl Strategy<Value = Replicated> {
    prop_oneof![
        prop::collection::vec(-50i64..50, 0..5).prop_map(|changes| {
            let mut counter = Counter::new();
            for change in changes {
                counter.increment(change).unwrap();
            }
            Replicated::from(counter)
        }),
        register_writes().prop_map(|(auto, writes)| write_register(auto, &writes).into()),
        prop::collection::vec(0i64..10, 0..5).prop_map(|elements| {
            let mut set = Set::new();
            for element in elements {
                set.add(element);
            }
            Replicated::from(set)
        }),
        (any::<bool>(), prop::collection::btree_map("r[0-9]", any::<bool>(), 0..4)).prop_map(
            |(own, others)| {
                let mut vote = Vote::new();
                vote.set_vote(own);
                let others = VoteDelta {
                    votes: others.into_iter().map(|(r, v)| (ReplicaId::from(r), v)).collect(),
                };
                vote.apply_delta(&Delta::Vote(others), &writer()).unwrap();
                Replicated::from(vote)
            }
        ),
        prop::collection::vec((0i64..5, 0i64..20), 0..6).prop_map(|increments| {
            let mut counters = CounterMap::new();
            for (key, amount) in increments {
                counters.increment(key, amount).unwrap();
            }
            Replicated::from(counters)
        }),
        prop::collection::btree_map(0i64..5, register_writes(), 0..4).prop_map(|keys| {
            let mut registers = RegisterMap::new();
            for (key, (auto, writes)) in keys {
                for (i, write) in writes.iter().enumerate() {
                    let clock = if auto {
                        Clock::CustomAutoIncrement(i as i64 + 1)
                    } else {
                        Clock::Default
                    };
                    registers.set(key, *write, clock).unwrap();
                }
            }
            Replicated::from(registers)
        }),
        prop::collection::vec((0i64..5, 0i64..10), 0..6).prop_map(|puts| {
            let mut multi = MultiMap::new();
            for (key, value) in puts {
                multi.put(key, value);
            }
            Replicated::from(multi)
        }),
    ]
}

fn tree_strategy() -> impl Strategy<Value = Replicated> {
    leaf_strategy().prop_recursive(2, 16, 4, |inner| {
        prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(|entries| {
            let mut map = Map::new();
            for (key, value) in entries {
                map.set(key, value).unwrap();
            }
            Replicated::from(map)
        })
    })
}

proptest! {
    #[test]
    fn every_kind_restores_from_own_full_state(mut value in tree_strategy()) {
        let state = value.take_full_state(&writer());

        let restored = Replicated::from_state(&state, &writer()).unwrap();
        prop_assert!(!restored.has_delta());
        prop_assert_eq!(&restored, &value);

        // A later flush from the restored value still reaches other replicas
        prop_assert_eq!(restored.full_state(&writer()), state);
    }

    #[test]
    fn restored_auto_increment_register_keeps_its_floor((_, writes) in register_writes()) {
        let mut register = write_register(true, &writes);
        let state = register.take_full_state(&writer());

        let mut restored = Replicated::from_state(&state, &writer()).unwrap();
        let register = restored.as_register_mut().unwrap();
        let last = writes.len() as i64;
        prop_assert!(register
            .set_with_clock("stale", Clock::CustomAutoIncrement(last))
            .is_err());
        prop_assert!(register
            .set_with_clock("next", Clock::CustomAutoIncrement(last + 1))
            .is_ok());
    }
}
