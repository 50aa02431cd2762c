//! Entity configuration.

use replika_core::ReplicaId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Idle time after which an entity is passivated, unless configured.
pub const DEFAULT_PASSIVATION_TIMEOUT_MS: u64 = 120_000;

/// Number of queued messages per entity mailbox, unless configured.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// How many replicas must acknowledge a write. Advisory: it is attached to
/// outgoing deltas and enforced by the replication layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteConsistency {
    #[default]
    Local,
    Majority,
    All,
}

/// When idle entities are evicted from memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassivationStrategy {
    pub timeout_ms: u64,
}

impl PassivationStrategy {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for PassivationStrategy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_PASSIVATION_TIMEOUT_MS,
        }
    }
}

/// Configuration for one entity type on one replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Name of the entity type.
    pub entity_type: String,
    /// Replica hosting the entities; stamps register writes.
    pub replica_id: ReplicaId,
    pub passivation: PassivationStrategy,
    pub write_consistency: WriteConsistency,
    pub mailbox_capacity: usize,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            entity_type: "entity".to_string(),
            replica_id: ReplicaId::generate(),
            passivation: PassivationStrategy::default(),
            write_consistency: WriteConsistency::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl EntityConfig {
    pub fn builder() -> EntityConfigBuilder {
        EntityConfigBuilder::new()
    }

    /// Load a configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn passivation_deadline(&self) -> Duration {
        passivation_deadline(self)
    }
}

/// How long an entity may stay idle before it is passivated.
pub fn passivation_deadline(config: &EntityConfig) -> Duration {
    Duration::from_millis(config.passivation.timeout_ms)
}

/// Builder for entity configuration.
pub struct EntityConfigBuilder {
    config: EntityConfig,
}

impl EntityConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EntityConfig::default(),
        }
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.config.entity_type = entity_type.into();
        self
    }

    pub fn replica_id(mut self, replica_id: impl Into<ReplicaId>) -> Self {
        self.config.replica_id = replica_id.into();
        self
    }

    pub fn passivation_timeout(mut self, timeout: Duration) -> Self {
        self.config.passivation = PassivationStrategy::timeout(timeout);
        self
    }

    pub fn write_consistency(mut self, consistency: WriteConsistency) -> Self {
        self.config.write_consistency = consistency;
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.config.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> EntityConfig {
        self.config
    }
}

impl Default for EntityConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EntityConfig::default();
        assert_eq!(config.write_consistency, WriteConsistency::Local);
        assert_eq!(config.passivation_deadline(), Duration::from_secs(120));
        assert!(config.replica_id.as_str().starts_with("replica-"));
    }

    #[test]
    fn test_builder() {
        let config = EntityConfig::builder()
            .entity_type("shopping-cart")
            .replica_id("replica-1")
            .passivation_timeout(Duration::from_secs(5))
            .write_consistency(WriteConsistency::Majority)
            .mailbox_capacity(0)
            .build();

        assert_eq!(config.entity_type, "shopping-cart");
        assert_eq!(config.replica_id, ReplicaId::from("replica-1"));
        assert_eq!(passivation_deadline(&config), Duration::from_secs(5));
        assert_eq!(config.write_consistency, WriteConsistency::Majority);
        assert_eq!(config.mailbox_capacity, 1);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EntityConfig::from_json(
            r#"{
                "entity_type": "counter",
                "replica_id": "replica-7",
                "write_consistency": "all",
                "passivation": { "timeout_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.entity_type, "counter");
        assert_eq!(config.replica_id.as_str(), "replica-7");
        assert_eq!(config.write_consistency, WriteConsistency::All);
        assert_eq!(config.passivation_deadline(), Duration::from_millis(250));
        assert_eq!(config.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
    }

    #[test]
    fn test_from_json_rejects_bad_consistency() {
        assert!(EntityConfig::from_json(r#"{ "write_consistency": "some" }"#).is_err());
    }
}
