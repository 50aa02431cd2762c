//! Per-entity tasks.
//!
//! Each active entity is owned by one tokio task that drains a mailbox, so
//! commands and incoming deltas for an entity run strictly one at a time
//! while different entities run concurrently. A task that receives nothing
//! for the passivation deadline passivates its entity and exits.

use crate::clock::WallClock;
use crate::config::EntityConfig;
use crate::entity::ReplicatedEntity;
use crate::error::{EntityError, Result};
use crate::reply::{Command, Reply};
use crate::session::EntitySession;
use crate::sink::DeltaSink;
use crate::state::EntityState;
use replika_core::{Delta, FullState, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Ack<T> = oneshot::Sender<Result<T>>;

/// Messages accepted by an entity task.
pub enum EntityMessage {
    Command { command: Command, reply: Ack<Reply> },
    Incoming { delta: Delta, ack: Ack<()> },
    ReplaceState { state: FullState, ack: Ack<()> },
    RemoteDelete { ack: Ack<()> },
    Passivate,
}

/// Lifecycle events published by entity tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityEvent {
    Activated { entity_id: String },
    Deleted { entity_id: String },
    Passivated { entity_id: String },
}

/// How an entity task ended.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityExit {
    pub entity_id: String,
    /// State to reactivate from, unless the entity was deleted.
    pub snapshot: Option<FullState>,
    pub deleted: bool,
}

/// What entity tasks share on one replica.
#[derive(Clone)]
pub struct EntityRuntime {
    pub config: EntityConfig,
    pub sink: Arc<dyn DeltaSink>,
    pub clock: Arc<dyn WallClock>,
    pub events: broadcast::Sender<EntityEvent>,
}

impl EntityRuntime {
    pub fn new(config: EntityConfig, sink: Arc<dyn DeltaSink>, clock: Arc<dyn WallClock>) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            config,
            sink,
            clock,
            events,
        }
    }

    fn publish(&self, event: EntityEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Address of a running entity task.
#[derive(Clone)]
pub struct EntityHandle {
    entity_id: String,
    tx: mpsc::Sender<EntityMessage>,
    next_command_id: Arc<AtomicU64>,
}

impl EntityHandle {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Whether the task has stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, message: impl FnOnce(Ack<T>) -> EntityMessage) -> Result<T> {
        let (ack, response) = oneshot::channel();
        self.tx
            .send(message(ack))
            .await
            .map_err(|_| EntityError::Channel(format!("entity {} is not running", self.entity_id)))?;
        response.await.map_err(|_| {
            EntityError::Channel(format!("entity {} stopped before replying", self.entity_id))
        })?
    }

    /// Send a command, numbering it from this handle's sequence.
    pub async fn command(&self, name: impl Into<String>, payload: impl Into<Value>) -> Result<Reply> {
        let id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        self.send_command(Command::new(id, name, payload)).await
    }

    pub async fn send_command(&self, command: Command) -> Result<Reply> {
        self.request(|reply| EntityMessage::Command { command, reply })
            .await
    }

    pub async fn apply_incoming(&self, delta: Delta) -> Result<()> {
        self.request(|ack| EntityMessage::Incoming { delta, ack }).await
    }

    pub async fn replace_state(&self, state: FullState) -> Result<()> {
        self.request(|ack| EntityMessage::ReplaceState { state, ack })
            .await
    }

    /// The replication layer deleted the entity.
    pub async fn delete_remote(&self) -> Result<()> {
        self.request(|ack| EntityMessage::RemoteDelete { ack }).await
    }

    /// Ask the task to passivate its entity now.
    pub async fn passivate(&self) -> Result<()> {
        self.tx
            .send(EntityMessage::Passivate)
            .await
            .map_err(|_| EntityError::Channel(format!("entity {} is not running", self.entity_id)))
    }
}

/// Activate an entity and start the task that owns it.
///
/// Activation happens before the task starts, so an unusable snapshot is
/// reported here rather than by the first command.
pub fn spawn_entity<E>(
    mut entity: E,
    entity_id: impl Into<String>,
    snapshot: Option<FullState>,
    runtime: EntityRuntime,
) -> Result<(EntityHandle, JoinHandle<EntityExit>)>
where
    E: ReplicatedEntity,
{
    let entity_id = entity_id.into();
    let mut session =
        EntitySession::with_clock(entity_id.clone(), runtime.config.clone(), runtime.clock.clone());
    session.activate_entity(&mut entity, snapshot)?;
    runtime.publish(EntityEvent::Activated {
        entity_id: entity_id.clone(),
    });

    let (tx, rx) = mpsc::channel(runtime.config.mailbox_capacity.max(1));
    let task = tokio::spawn(run_entity(entity, session, rx, runtime));
    let handle = EntityHandle {
        entity_id,
        tx,
        next_command_id: Arc::new(AtomicU64::new(1)),
    };
    Ok((handle, task))
}

async fn run_entity<E>(
    mut entity: E,
    mut session: EntitySession,
    mut rx: mpsc::Receiver<EntityMessage>,
    runtime: EntityRuntime,
) -> EntityExit
where
    E: ReplicatedEntity,
{
    let deadline = session.passivation_deadline();
    loop {
        let message = match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(message)) => message,
            // Every handle is gone
            Ok(None) => break,
            Err(_) => {
                debug!(entity_id = %session.entity_id(), "idle deadline reached");
                break;
            }
        };
        match message {
            EntityMessage::Command { command, reply } => {
                let result = run_command(&mut entity, &mut session, &runtime, command, &reply).await;
                let _ = reply.send(result);
            }
            EntityMessage::Incoming { delta, ack } => {
                let _ = ack.send(session.apply_incoming(&delta));
            }
            EntityMessage::ReplaceState { state, ack } => {
                let _ = ack.send(session.replace_entity_state(&mut entity, &state));
            }
            EntityMessage::RemoteDelete { ack } => {
                let result = session.apply_remote_delete();
                if result.is_ok() {
                    runtime.publish(EntityEvent::Deleted {
                        entity_id: session.entity_id().to_string(),
                    });
                }
                let _ = ack.send(result);
            }
            EntityMessage::Passivate => break,
        }
    }
    // Messages still queued are dropped; their senders see a closed channel
    rx.close();
    finish(session, &runtime)
}

async fn run_command<E>(
    entity: &mut E,
    session: &mut EntitySession,
    runtime: &EntityRuntime,
    command: Command,
    reply: &Ack<Reply>,
) -> Result<Reply>
where
    E: ReplicatedEntity,
{
    let checkpoint = session.checkpoint();
    let outcome = session
        .execute(entity, command, || reply.is_closed())?
        .ok_or(EntityError::Cancelled)?;
    if let Some(delta) = outcome.delta {
        let deleted = delta.deleted;
        if let Err(err) = runtime.sink.send(delta).await {
            // Local state may not run ahead of what was handed off
            warn!(entity_id = %session.entity_id(), error = %err, "delta refused, command rolled back");
            session.rollback_to(checkpoint);
            return Err(EntityError::Delivery(err.to_string()));
        }
        if deleted {
            runtime.publish(EntityEvent::Deleted {
                entity_id: session.entity_id().to_string(),
            });
        }
    }
    Ok(outcome.reply)
}

fn finish(mut session: EntitySession, runtime: &EntityRuntime) -> EntityExit {
    let entity_id = session.entity_id().to_string();
    if session.lifecycle() == EntityState::Deleted {
        return EntityExit {
            entity_id,
            snapshot: None,
            deleted: true,
        };
    }
    let snapshot = match session.passivate() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(entity_id = %entity_id, error = %err, "passivation failed");
            None
        }
    };
    if let Err(err) = session.terminate() {
        warn!(entity_id = %entity_id, error = %err, "termination failed");
    }
    info!(entity_id = %entity_id, "entity passivated");
    runtime.publish(EntityEvent::Passivated {
        entity_id: entity_id.clone(),
    });
    EntityExit {
        entity_id,
        snapshot,
        deleted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::CommandHandlers;
    use crate::reply::HandlerError;
    use crate::sink::MemorySink;
    use replika_core::{Counter, CounterDelta, Replicated};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn counter_entity() -> CommandHandlers {
        CommandHandlers::new()
            .with_default_value(|_| Some(Counter::new().into()))
            .on("Increment", |command, ctx| {
                let amount = command.payload.as_int().unwrap_or(1);
                let counter = ctx
                    .state_mut()?
                    .as_counter_mut()
                    .ok_or_else(|| HandlerError::invalid_argument("not a counter"))?;
                counter.increment(amount)?;
                Ok(Reply::message(counter.value()))
            })
            .on("Get", |_, ctx| {
                let value = ctx.state().and_then(Replicated::as_counter).map(Counter::value);
                Ok(Reply::message(value.unwrap_or_default()))
            })
            .on("Delete", |_, ctx| {
                ctx.delete();
                Ok(Reply::NoReply)
            })
    }

    fn runtime(sink: &MemorySink, timeout: Duration) -> EntityRuntime {
        let config = EntityConfig::builder()
            .entity_type("counter")
            .replica_id("replica-1")
            .passivation_timeout(timeout)
            .build();
        EntityRuntime::new(config, Arc::new(sink.clone()), Arc::new(ManualClock::new(1)))
    }

    #[tokio::test]
    async fn test_commands_run_in_order_and_flush() {
        let sink = MemorySink::new();
        let (handle, _task) =
            spawn_entity(counter_entity(), "c1", None, runtime(&sink, Duration::from_secs(60)))
                .unwrap();

        assert_eq!(handle.command("Increment", 2).await.unwrap(), Reply::message(2));
        assert_eq!(handle.command("Increment", 3).await.unwrap(), Reply::message(5));

        let deltas = sink.take();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[1].delta, Some(Delta::Counter(CounterDelta { change: 3 })));
    }

    #[tokio::test]
    async fn test_incoming_delta_and_remote_delete() {
        let sink = MemorySink::new();
        let (handle, task) =
            spawn_entity(counter_entity(), "c1", None, runtime(&sink, Duration::from_secs(60)))
                .unwrap();

        handle
            .apply_incoming(Delta::Counter(CounterDelta { change: 10 }))
            .await
            .unwrap();
        assert_eq!(handle.command("Get", 0).await.unwrap(), Reply::message(10));
        assert!(sink.is_empty());

        handle.delete_remote().await.unwrap();
        assert_eq!(handle.command("Get", 0).await, Err(EntityError::Deleted));

        handle.passivate().await.unwrap();
        let exit = task.await.unwrap();
        assert!(exit.deleted);
        assert!(exit.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_idle_entity_passivates_with_snapshot() {
        let sink = MemorySink::new();
        let runtime = runtime(&sink, Duration::from_millis(20));
        let mut events = runtime.events.subscribe();
        let (handle, task) = spawn_entity(counter_entity(), "c1", None, runtime).unwrap();

        handle.command("Increment", 4).await.unwrap();
        let exit = task.await.unwrap();
        assert!(!exit.deleted);
        assert_eq!(exit.snapshot, Some(Delta::Counter(CounterDelta { change: 4 })));
        assert!(handle.is_closed());
        assert!(matches!(
            handle.command("Get", 0).await,
            Err(EntityError::Channel(_))
        ));

        assert_eq!(
            events.recv().await.unwrap(),
            EntityEvent::Activated {
                entity_id: "c1".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            EntityEvent::Passivated {
                entity_id: "c1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_snapshot_takes_precedence_over_default_value() {
        let sink = MemorySink::new();
        let snapshot = Delta::Set(replika_core::SetDelta::default());
        let (handle, _task) = spawn_entity(
            counter_entity(),
            "c1",
            Some(snapshot),
            runtime(&sink, Duration::from_secs(60)),
        )
        .unwrap();

        // The state is the snapshot's set, so the counter handler rejects it
        let reply = handle.command("Increment", 1).await.unwrap();
        assert!(reply.is_failure());
        assert!(sink.is_empty());
    }

    /// Refuses every delta while `refuse` is set.
    struct RefusingSink {
        refuse: Arc<AtomicBool>,
        inner: MemorySink,
    }

    #[async_trait::async_trait]
    impl DeltaSink for RefusingSink {
        async fn send(&self, delta: crate::reply::OutgoingDelta) -> Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(EntityError::Channel("replication layer unavailable".to_string()));
            }
            self.inner.send(delta).await
        }
    }

    #[tokio::test]
    async fn test_undelivered_delta_rolls_back_command() {
        let collected = MemorySink::new();
        let refuse = Arc::new(AtomicBool::new(true));
        let sink = RefusingSink {
            refuse: refuse.clone(),
            inner: collected.clone(),
        };
        let config = EntityConfig::builder()
            .entity_type("counter")
            .replica_id("replica-1")
            .build();
        let runtime = EntityRuntime::new(config, Arc::new(sink), Arc::new(ManualClock::new(1)));
        let (handle, _task) = spawn_entity(counter_entity(), "c1", None, runtime).unwrap();

        assert!(matches!(
            handle.command("Increment", 3).await,
            Err(EntityError::Delivery(_))
        ));
        refuse.store(false, Ordering::SeqCst);
        assert_eq!(handle.command("Get", 0).await.unwrap(), Reply::message(0));

        // A refused deletion leaves the entity in place
        refuse.store(true, Ordering::SeqCst);
        assert!(matches!(
            handle.command("Delete", 0).await,
            Err(EntityError::Delivery(_))
        ));
        refuse.store(false, Ordering::SeqCst);
        assert_eq!(handle.command("Increment", 4).await.unwrap(), Reply::message(4));

        let deltas = collected.take();
        assert!(deltas.iter().all(|d| !d.deleted));
        assert_eq!(
            deltas.last().and_then(|d| d.delta.clone()),
            Some(Delta::Counter(CounterDelta { change: 4 }))
        );
    }

    #[tokio::test]
    async fn test_deletion_is_flushed_and_published() {
        let sink = MemorySink::new();
        let runtime = runtime(&sink, Duration::from_secs(60));
        let mut events = runtime.events.subscribe();
        let (handle, _task) = spawn_entity(counter_entity(), "c1", None, runtime).unwrap();

        handle.command("Delete", 0).await.unwrap();
        let deltas = sink.take();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].deleted);

        events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            EntityEvent::Deleted {
                entity_id: "c1".to_string()
            }
        );
    }
}
