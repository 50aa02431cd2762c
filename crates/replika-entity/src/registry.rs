//! The entities of one entity type on one replica.
//!
//! The registry activates entities on first use, routes commands and
//! replication traffic to their tasks, and keeps the snapshots of passivated
//! entities so they can be reactivated later.

use crate::clock::{SystemClock, WallClock};
use crate::config::EntityConfig;
use crate::entity::ReplicatedEntity;
use crate::error::{EntityError, Result};
use crate::reply::{Command, Reply};
use crate::runner::{spawn_entity, EntityEvent, EntityExit, EntityHandle, EntityRuntime};
use crate::sink::DeltaSink;
use parking_lot::RwLock;
use replika_core::{Delta, FullState, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Creates the behaviour of a newly activated entity.
pub type EntityFactory = Arc<dyn Fn(&str) -> Box<dyn ReplicatedEntity> + Send + Sync>;

struct EntitySlot {
    handle: EntityHandle,
    task: JoinHandle<EntityExit>,
}

pub struct EntityRegistry {
    runtime: EntityRuntime,
    factory: EntityFactory,
    slots: RwLock<HashMap<String, EntitySlot>>,
    snapshots: RwLock<HashMap<String, FullState>>,
    deleted: RwLock<HashSet<String>>,
    /// Serializes activation so an entity never has two tasks.
    activation: Mutex<()>,
    next_command_id: AtomicU64,
}

impl EntityRegistry {
    pub fn new<F>(config: EntityConfig, sink: Arc<dyn DeltaSink>, factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn ReplicatedEntity> + Send + Sync + 'static,
    {
        Self::with_clock(config, sink, Arc::new(SystemClock), factory)
    }

    pub fn with_clock<F>(
        config: EntityConfig,
        sink: Arc<dyn DeltaSink>,
        clock: Arc<dyn WallClock>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str) -> Box<dyn ReplicatedEntity> + Send + Sync + 'static,
    {
        Self {
            runtime: EntityRuntime::new(config, sink, clock),
            factory: Arc::new(factory),
            slots: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            deleted: RwLock::new(HashSet::new()),
            activation: Mutex::new(()),
            next_command_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &EntityConfig {
        &self.runtime.config
    }

    /// Subscribe to entity lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.runtime.events.subscribe()
    }

    /// Ids of entities with a running task.
    pub fn active_entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| !slot.handle.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_deleted(&self, entity_id: &str) -> bool {
        self.deleted.read().contains(entity_id)
    }

    /// The snapshot a passivated entity will be reactivated from.
    pub fn snapshot(&self, entity_id: &str) -> Option<FullState> {
        self.snapshots.read().get(entity_id).cloned()
    }

    /// Send a command to an entity, activating it if needed.
    pub async fn command(
        &self,
        entity_id: &str,
        name: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Result<Reply> {
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        self.send_command(entity_id, Command::new(id, name, payload))
            .await
    }

    /// Send a prebuilt command, such as one carrying metadata.
    pub async fn send_command(&self, entity_id: &str, command: Command) -> Result<Reply> {
        self.with_entity(entity_id, |handle| {
            let command = command.clone();
            async move { handle.send_command(command).await }
        })
        .await
    }

    /// Merge a delta from another replica into an entity.
    pub async fn apply_incoming(&self, entity_id: &str, delta: Delta) -> Result<()> {
        self.with_entity(entity_id, |handle| {
            let delta = delta.clone();
            async move { handle.apply_incoming(delta).await }
        })
        .await
    }

    /// Replace an entity's whole state with one from the replication layer.
    pub async fn replace_state(&self, entity_id: &str, state: FullState) -> Result<()> {
        self.with_entity(entity_id, |handle| {
            let state = state.clone();
            async move { handle.replace_state(state).await }
        })
        .await
    }

    /// The entity was deleted on another replica. Its task is told if it is
    /// running, and it will not be activated again.
    pub async fn apply_remote_delete(&self, entity_id: &str) -> Result<()> {
        let _activation = self.activation.lock().await;
        let slot = self.slots.write().remove(entity_id);
        if let Some(slot) = slot {
            match slot.handle.delete_remote().await {
                Ok(()) | Err(EntityError::Deleted) | Err(EntityError::Channel(_)) => {}
                Err(err) => return Err(err),
            }
        }
        self.snapshots.write().remove(entity_id);
        self.deleted.write().insert(entity_id.to_string());
        debug!(entity_id, "entity deleted remotely");
        Ok(())
    }

    /// Passivate an entity now, keeping its snapshot.
    pub async fn passivate(&self, entity_id: &str) -> Result<()> {
        let _activation = self.activation.lock().await;
        let slot = self.slots.write().remove(entity_id);
        if let Some(slot) = slot {
            // An entity that already exited has nothing left to passivate
            let _ = slot.handle.passivate().await;
            self.record_exit(entity_id, slot.task.await);
        }
        Ok(())
    }

    /// Passivate every running entity.
    pub async fn shutdown(&self) {
        let _activation = self.activation.lock().await;
        let slots: Vec<(String, EntitySlot)> = self.slots.write().drain().collect();
        for (entity_id, slot) in slots {
            let _ = slot.handle.passivate().await;
            self.record_exit(&entity_id, slot.task.await);
        }
    }

    /// Run `op` against the entity's task. An entity can passivate between
    /// lookup and delivery, so a closed mailbox is retried once on a fresh
    /// activation.
    async fn with_entity<T, F, Fut>(&self, entity_id: &str, op: F) -> Result<T>
    where
        F: Fn(EntityHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.handle(entity_id).await?;
        let result = match op(handle).await {
            Err(EntityError::Channel(reason)) => {
                debug!(entity_id, %reason, "entity stopped, reactivating");
                let handle = self.handle(entity_id).await?;
                op(handle).await
            }
            result => result,
        };
        if let Err(EntityError::Deleted) = result {
            self.forget(entity_id);
        }
        result
    }

    /// A live handle for the entity, activating it if it is not running.
    async fn handle(&self, entity_id: &str) -> Result<EntityHandle> {
        if let Some(handle) = self.live_handle(entity_id) {
            return Ok(handle);
        }

        let _activation = self.activation.lock().await;
        if let Some(handle) = self.live_handle(entity_id) {
            return Ok(handle);
        }
        let stale = self.slots.write().remove(entity_id);
        if let Some(slot) = stale {
            self.record_exit(entity_id, slot.task.await);
        }
        if self.is_deleted(entity_id) {
            return Err(EntityError::Deleted);
        }

        let snapshot = self.snapshots.write().remove(entity_id);
        let entity = (self.factory)(entity_id);
        let (handle, task) = spawn_entity(entity, entity_id, snapshot, self.runtime.clone())?;
        self.slots.write().insert(
            entity_id.to_string(),
            EntitySlot {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    fn live_handle(&self, entity_id: &str) -> Option<EntityHandle> {
        let slots = self.slots.read();
        slots
            .get(entity_id)
            .filter(|slot| !slot.handle.is_closed())
            .map(|slot| slot.handle.clone())
    }

    fn record_exit(&self, entity_id: &str, exit: std::result::Result<EntityExit, JoinError>) {
        match exit {
            Ok(exit) if exit.deleted => self.forget(entity_id),
            Ok(exit) => {
                if let Some(snapshot) = exit.snapshot {
                    self.snapshots.write().insert(entity_id.to_string(), snapshot);
                }
            }
            Err(err) => warn!(entity_id, error = %err, "entity task failed, state lost"),
        }
    }

    /// Mark the entity deleted. Its task, if any, exits once idle.
    fn forget(&self, entity_id: &str) {
        self.snapshots.write().remove(entity_id);
        self.deleted.write().insert(entity_id.to_string());
        self.slots.write().remove(entity_id);
    }
}
