//! Register clocks.
//!
//! A register write is stamped with a timestamp when it is flushed. Conflicting
//! writes are ordered by `(timestamp, replica)`: the strictly greater timestamp
//! wins, and on equal timestamps the lower replica id wins.

use crate::replica::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The clock used to stamp a register write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "clock", content = "value", rename_all = "snake_case")]
pub enum Clock {
    /// Wall-clock time of the flushing replica.
    #[default]
    Default,
    /// Inverted wall-clock time: the earliest write wins.
    Reverse,
    /// A caller supplied timestamp.
    Custom(i64),
    /// A caller supplied timestamp that must strictly increase across writes
    /// from this replica.
    CustomAutoIncrement(i64),
}

impl Clock {
    /// The caller supplied value, if this is a custom clock.
    pub fn custom_value(&self) -> Option<i64> {
        match self {
            Clock::Custom(v) | Clock::CustomAutoIncrement(v) => Some(*v),
            Clock::Default | Clock::Reverse => None,
        }
    }

    /// Compute the timestamp for a write made at `now`, given the timestamp
    /// currently held by the register.
    ///
    /// Wall-clock based clocks never go backwards relative to the current
    /// value, so a local write always supersedes what this replica has seen.
    pub fn stamp(&self, now: i64, current: Option<i64>) -> i64 {
        match self {
            Clock::Default => match current {
                Some(c) => now.max(c.saturating_add(1)),
                None => now,
            },
            Clock::Reverse => {
                let reversed = now.saturating_neg();
                match current {
                    Some(c) => reversed.min(c.saturating_sub(1)),
                    None => reversed,
                }
            }
            Clock::Custom(v) | Clock::CustomAutoIncrement(v) => *v,
        }
    }
}

/// The resolved timestamp of a register write and the replica that made it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub timestamp: i64,
    pub replica: ReplicaId,
}

impl Stamp {
    pub fn new(timestamp: i64, replica: impl Into<ReplicaId>) -> Self {
        Self {
            timestamp,
            replica: replica.into(),
        }
    }

    /// Order of two writes: `Greater` means `self` wins.
    pub fn precedence(&self, other: &Stamp) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            // lower replica wins the tie
            .then_with(|| other.replica.cmp(&self.replica))
    }

    /// Whether a write carrying `self` replaces a value carrying `other`.
    /// Identical stamps replace, which keeps re-delivery idempotent.
    pub fn wins_over(&self, other: &Stamp) -> bool {
        self.precedence(other) != Ordering::Less
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_clock_is_monotonic() {
        assert_eq!(Clock::Default.stamp(1_000, None), 1_000);
        assert_eq!(Clock::Default.stamp(1_000, Some(500)), 1_000);
        // A skewed clock still moves past the current stamp
        assert_eq!(Clock::Default.stamp(1_000, Some(2_000)), 2_001);
    }

    #[test]
    fn test_reverse_clock_inverts_order() {
        let early = Clock::Reverse.stamp(1_000, None);
        let late = Clock::Reverse.stamp(2_000, None);
        assert!(early > late);
        assert_eq!(Clock::Reverse.stamp(2_000, Some(-5_000)), -5_001);
    }

    #[test]
    fn test_custom_clocks_use_supplied_value() {
        assert_eq!(Clock::Custom(42).stamp(1_000, Some(99)), 42);
        assert_eq!(Clock::CustomAutoIncrement(7).stamp(1_000, None), 7);
        assert_eq!(Clock::Custom(3).custom_value(), Some(3));
        assert_eq!(Clock::Default.custom_value(), None);
    }

    #[test]
    fn test_stamp_precedence() {
        let a = Stamp::new(10, "a");
        let b = Stamp::new(10, "b");
        let later = Stamp::new(11, "z");

        assert!(later.wins_over(&a));
        assert!(!a.wins_over(&later));
        // Equal timestamps: lower replica wins
        assert!(a.wins_over(&b));
        assert!(!b.wins_over(&a));
        assert!(a.wins_over(&a.clone()));
    }

    #[test]
    fn test_clock_serialization() {
        let json = serde_json::to_string(&Clock::CustomAutoIncrement(5)).unwrap();
        let clock: Clock = serde_json::from_str(&json).unwrap();
        assert_eq!(clock, Clock::CustomAutoIncrement(5));
    }
}
