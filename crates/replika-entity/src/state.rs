//! Entity lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an entity instance.
///
/// ```text
/// Uninitialized -> Active -> Passivating -> Terminated
///                    |
///                    +----> Deleted
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    #[default]
    Uninitialized,
    Active,
    Passivating,
    Terminated,
    Deleted,
}

impl EntityState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition(self, next: EntityState) -> bool {
        use EntityState::*;
        matches!(
            (self, next),
            (Uninitialized, Active)
                | (Active, Passivating)
                | (Active, Deleted)
                | (Passivating, Terminated)
        )
    }

    pub fn is_active(self) -> bool {
        self == EntityState::Active
    }

    /// Whether the entity can never become active again.
    pub fn is_final(self) -> bool {
        matches!(self, EntityState::Terminated | EntityState::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Uninitialized => "uninitialized",
            EntityState::Active => "active",
            EntityState::Passivating => "passivating",
            EntityState::Terminated => "terminated",
            EntityState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}
