//! Entity sessions: the lifecycle of one entity instance on one replica.
//!
//! A session binds an entity id to its state tree and runs commands against
//! it one at a time. Each command runs inside a [`CommandScope`]:
//!
//! ```text
//! begin_command -> context (handler mutates state) -> end  => flush delta
//!                                                   -> cancel / failure / drop => roll back
//! ```
//!
//! The first flush after an activation without a snapshot sends the full
//! state, so other replicas learn of a value created here. Merging an
//! incoming delta first means the state is no longer local-only, and later
//! flushes send deltas.

use crate::clock::{SystemClock, WallClock};
use crate::config::EntityConfig;
use crate::context::{CommandContext, ScopeEffects};
use crate::entity::ReplicatedEntity;
use crate::error::{EntityError, Result};
use crate::reply::{Command, CommandOutcome, HandlerError, OutgoingDelta, Reply};
use crate::state::EntityState;
use replika_core::{Delta, FullState, Origin, Replicated, ReplicatedData};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An entity's state and flush bookkeeping at one point in time.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    lifecycle: EntityState,
    data: Option<Replicated>,
    send_full_state: bool,
}

pub struct EntitySession {
    entity_id: String,
    config: EntityConfig,
    clock: Arc<dyn WallClock>,
    lifecycle: EntityState,
    data: Option<Replicated>,
    send_full_state: bool,
}

impl EntitySession {
    pub fn new(entity_id: impl Into<String>, config: EntityConfig) -> Self {
        Self::with_clock(entity_id, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        entity_id: impl Into<String>,
        config: EntityConfig,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            config,
            clock,
            lifecycle: EntityState::Uninitialized,
            data: None,
            send_full_state: false,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn config(&self) -> &EntityConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> EntityState {
        self.lifecycle
    }

    /// The entity's state tree, if bound.
    pub fn data(&self) -> Option<&Replicated> {
        self.data.as_ref()
    }

    /// This replica, as of now.
    pub fn origin(&self) -> Origin {
        Origin::new(self.config.replica_id.clone(), self.clock.now_millis())
    }

    pub fn passivation_deadline(&self) -> Duration {
        self.config.passivation_deadline()
    }

    /// Whether an entity idle for `idle` is due for passivation.
    pub fn should_passivate(&self, idle: Duration) -> bool {
        self.lifecycle.is_active() && idle >= self.passivation_deadline()
    }

    fn transition(&mut self, next: EntityState) -> Result<()> {
        if !self.lifecycle.can_transition(next) {
            return Err(EntityError::InvalidState(format!(
                "entity {} cannot move from {} to {}",
                self.entity_id, self.lifecycle, next
            )));
        }
        self.lifecycle = next;
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.lifecycle {
            EntityState::Active => Ok(()),
            EntityState::Deleted => Err(EntityError::Deleted),
            state => Err(EntityError::NotActive { state }),
        }
    }

    /// Activate the entity, from the replication layer's snapshot if it has
    /// one. Returns the restored state.
    pub fn activate(&mut self, snapshot: Option<FullState>) -> Result<Option<&Replicated>> {
        if self.lifecycle != EntityState::Uninitialized {
            return Err(EntityError::InvalidState(format!(
                "entity {} is already {}",
                self.entity_id, self.lifecycle
            )));
        }
        let origin = self.origin();
        self.data = match &snapshot {
            Some(state) => Some(Replicated::from_state(state, &origin)?),
            None => None,
        };
        self.send_full_state = self.data.is_none();
        self.transition(EntityState::Active)?;
        info!(
            entity_id = %self.entity_id,
            from_snapshot = snapshot.is_some(),
            "entity activated"
        );
        Ok(self.data.as_ref())
    }

    /// Bind the initial state of an entity activated without a snapshot.
    pub fn initialize(&mut self, value: Replicated) -> Result<&Replicated> {
        self.ensure_active()?;
        if self.data.is_some() {
            return Err(EntityError::InvalidState(
                "entity state has already been set".to_string(),
            ));
        }
        Ok(self.data.insert(value))
    }

    /// Activate the entity and bind its state: the snapshot if there is one,
    /// otherwise the entity's default value.
    pub fn activate_entity<E>(&mut self, entity: &mut E, snapshot: Option<FullState>) -> Result<()>
    where
        E: ReplicatedEntity + ?Sized,
    {
        self.activate(snapshot)?;
        if self.data.is_none() {
            if let Some(value) = entity.default_value(&self.entity_id) {
                self.initialize(value)?;
            }
        }
        self.notify_state_set(entity);
        Ok(())
    }

    fn notify_state_set<E>(&self, entity: &mut E)
    where
        E: ReplicatedEntity + ?Sized,
    {
        if let Some(data) = &self.data {
            entity.on_state_set(data, &self.entity_id);
        }
    }

    /// Start a command. The returned scope has exclusive use of the state
    /// until it ends.
    pub fn begin_command(&mut self, command: Command) -> Result<CommandScope<'_>> {
        self.ensure_active()?;
        debug!(
            entity_id = %self.entity_id,
            command = %command.name,
            command_id = command.id,
            "command started"
        );
        let saved = self.data.clone();
        Ok(CommandScope {
            session: self,
            command,
            saved: Some(saved),
            effects: ScopeEffects::default(),
        })
    }

    /// Run a command through `entity` and flush its changes.
    pub fn handle_command<E>(&mut self, entity: &mut E, command: Command) -> Result<CommandOutcome>
    where
        E: ReplicatedEntity + ?Sized,
    {
        self.execute(entity, command, || false)?
            .ok_or(EntityError::Cancelled)
    }

    /// Run a command through `entity`. If `is_cancelled` reports that the
    /// caller went away while the handler ran, the command's changes are
    /// discarded and `None` is returned.
    pub fn execute<E, C>(
        &mut self,
        entity: &mut E,
        command: Command,
        is_cancelled: C,
    ) -> Result<Option<CommandOutcome>>
    where
        E: ReplicatedEntity + ?Sized,
        C: FnOnce() -> bool,
    {
        let mut scope = self.begin_command(command)?;
        let result = scope.run(entity);
        if is_cancelled() {
            scope.cancel();
            return Ok(None);
        }
        let state_set = scope.state_set();
        let outcome = scope.end(result);
        if state_set && !outcome.reply.is_failure() {
            self.notify_state_set(entity);
        }
        Ok(Some(outcome))
    }

    /// Merge a delta pushed by the replication layer between commands. It is
    /// not echoed in later flushes. A rejected delta leaves the state
    /// untouched.
    ///
    /// A default value that was never flushed is held by every replica, so
    /// its own construction is dropped rather than sent after the merge.
    pub fn apply_incoming(&mut self, delta: &Delta) -> Result<()> {
        self.ensure_active()?;
        let origin = self.origin();
        let merged = match &self.data {
            Some(data) => {
                let mut next = data.clone();
                if self.send_full_state {
                    next.discard_delta(&origin);
                }
                next.apply_delta(delta, &origin)?;
                next
            }
            None => Replicated::from_delta(delta, &origin)?,
        };
        self.data = Some(merged);
        self.send_full_state = false;
        debug!(entity_id = %self.entity_id, kind = %delta.kind(), "incoming delta merged");
        Ok(())
    }

    /// Replace the whole state with one pushed by the replication layer.
    pub fn replace_state(&mut self, state: &FullState) -> Result<()> {
        self.ensure_active()?;
        self.data = Some(Replicated::from_state(state, &self.origin())?);
        self.send_full_state = false;
        info!(entity_id = %self.entity_id, "entity state replaced");
        Ok(())
    }

    /// [`EntitySession::replace_state`], then tell the entity.
    pub fn replace_entity_state<E>(&mut self, entity: &mut E, state: &FullState) -> Result<()>
    where
        E: ReplicatedEntity + ?Sized,
    {
        self.replace_state(state)?;
        self.notify_state_set(entity);
        Ok(())
    }

    /// The entity was deleted on another replica.
    pub fn apply_remote_delete(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.mark_deleted();
        Ok(())
    }

    fn mark_deleted(&mut self) {
        self.lifecycle = EntityState::Deleted;
        self.data = None;
        self.send_full_state = false;
        info!(entity_id = %self.entity_id, "entity deleted");
    }

    /// Capture the state before a command, so a command whose delta never
    /// left this replica can be undone with [`EntitySession::rollback_to`].
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            lifecycle: self.lifecycle,
            data: self.data.clone(),
            send_full_state: self.send_full_state,
        }
    }

    /// Return to `checkpoint`. The next flush sends what was undone again.
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) {
        self.lifecycle = checkpoint.lifecycle;
        self.data = checkpoint.data;
        self.send_full_state = checkpoint.send_full_state;
        debug!(entity_id = %self.entity_id, "entity rolled back to checkpoint");
    }

    /// The full state of the entity, as this replica would snapshot it.
    pub fn snapshot(&self) -> Option<FullState> {
        let origin = self.origin();
        self.data.as_ref().map(|data| data.full_state(&origin))
    }

    /// Begin passivation. Returns the state to reactivate from later.
    pub fn passivate(&mut self) -> Result<Option<FullState>> {
        self.transition(EntityState::Passivating)?;
        info!(entity_id = %self.entity_id, "entity passivating");
        Ok(self.snapshot())
    }

    /// Finish passivation and release the state.
    pub fn terminate(&mut self) -> Result<()> {
        self.transition(EntityState::Terminated)?;
        self.data = None;
        info!(entity_id = %self.entity_id, "entity terminated");
        Ok(())
    }

    fn flush(&mut self, deleted: bool) -> Option<OutgoingDelta> {
        if deleted {
            self.mark_deleted();
            return Some(self.outgoing(None, true));
        }
        let origin = self.origin();
        let delta = match self.data.as_mut() {
            Some(data) if self.send_full_state => {
                self.send_full_state = false;
                Some(data.take_full_state(&origin))
            }
            Some(data) => data.take_delta(&origin),
            None => None,
        };
        delta.map(|delta| self.outgoing(Some(delta), false))
    }

    fn outgoing(&self, delta: Option<Delta>, deleted: bool) -> OutgoingDelta {
        OutgoingDelta {
            entity_id: self.entity_id.clone(),
            delta,
            deleted,
            write_consistency: self.config.write_consistency,
        }
    }
}

/// One command's exclusive use of an entity's state.
///
/// Changes made through the scope's context are flushed by
/// [`CommandScope::end`]. A failed, cancelled or dropped scope restores the
/// state as it was when the command began.
pub struct CommandScope<'a> {
    session: &'a mut EntitySession,
    command: Command,
    /// State before the command; taken once the scope has ended
    saved: Option<Option<Replicated>>,
    effects: ScopeEffects,
}

impl<'a> CommandScope<'a> {
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The handler's view of the entity.
    pub fn context(&mut self) -> CommandContext<'_> {
        CommandContext::new(
            &self.session.entity_id,
            &self.command,
            &mut self.session.data,
            &mut self.effects,
        )
    }

    /// Run `entity`'s handler for this scope's command.
    pub fn run<E>(&mut self, entity: &mut E) -> std::result::Result<Reply, HandlerError>
    where
        E: ReplicatedEntity + ?Sized,
    {
        let mut ctx = self.context();
        let command = ctx.command();
        entity.handle(command, &mut ctx)
    }

    /// Whether the handler bound the entity's state.
    pub fn state_set(&self) -> bool {
        self.effects.state_set
    }

    /// End the command with the handler's result. On success the changes
    /// are flushed; on failure they are discarded and the reply reports the
    /// failure.
    pub fn end(mut self, result: std::result::Result<Reply, HandlerError>) -> CommandOutcome {
        let result = match self.effects.failure.take() {
            Some(failure) => Err(failure),
            None => result,
        };
        match result {
            Ok(reply) => {
                self.saved = None;
                let delta = self.session.flush(self.effects.deleted);
                debug!(
                    entity_id = %self.session.entity_id,
                    command = %self.command.name,
                    flushed = delta.is_some(),
                    "command completed"
                );
                CommandOutcome { reply, delta }
            }
            Err(err) => {
                self.rollback();
                warn!(
                    entity_id = %self.session.entity_id,
                    command = %self.command.name,
                    status = %err.status,
                    error = %err.message,
                    "command failed, changes rolled back"
                );
                CommandOutcome {
                    reply: err.into(),
                    delta: None,
                }
            }
        }
    }

    /// Abandon the command without flushing its changes.
    pub fn cancel(mut self) {
        self.rollback();
        warn!(
            entity_id = %self.session.entity_id,
            command = %self.command.name,
            "command cancelled, changes rolled back"
        );
    }

    fn rollback(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.session.data = saved;
        }
    }
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
