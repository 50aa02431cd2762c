//! Replica identity and the origin of a flush or merge.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a replica hosting entity state.
///
/// Replica ids are totally ordered; the order is the stable tie-break used
/// when two register writes carry the same timestamp (lower id wins).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique replica id.
    pub fn generate() -> Self {
        Self(format!("replica-{}", Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ReplicaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The replica performing a flush or a merge, and its wall-clock reading.
///
/// Every flush is stamped with exactly one origin, so all registers written
/// during a command observe the same `now`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    pub replica: ReplicaId,
    /// Wall-clock time in milliseconds since the Unix epoch.
    pub now: i64,
}

impl Origin {
    pub fn new(replica: impl Into<ReplicaId>, now: i64) -> Self {
        Self {
            replica: replica.into(),
            now,
        }
    }

    /// The same replica at a different time.
    pub fn at(&self, now: i64) -> Self {
        Self {
            replica: self.replica.clone(),
            now,
        }
    }
}
