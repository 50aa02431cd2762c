//! Entity behaviour: how an entity type creates its state and handles
//! commands.

use crate::context::CommandContext;
use crate::error::EntityError;
use crate::reply::{Command, HandlerError, Reply};
use replika_core::Replicated;
use std::collections::HashMap;

/// The behaviour of a replicated entity type.
pub trait ReplicatedEntity: Send + 'static {
    /// The state of an entity activated without a snapshot, if it has one
    /// before any command sets it.
    fn default_value(&self, _entity_id: &str) -> Option<Replicated> {
        None
    }

    /// Called whenever the entity's state is bound: at activation, when a
    /// command sets it, and when the replication layer replaces it.
    fn on_state_set(&mut self, _state: &Replicated, _entity_id: &str) {}

    /// Handle one command. Errors become failure replies and discard the
    /// command's changes.
    fn handle(
        &mut self,
        command: &Command,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Reply, HandlerError>;
}

impl ReplicatedEntity for Box<dyn ReplicatedEntity> {
    fn default_value(&self, entity_id: &str) -> Option<Replicated> {
        (**self).default_value(entity_id)
    }

    fn on_state_set(&mut self, state: &Replicated, entity_id: &str) {
        (**self).on_state_set(state, entity_id)
    }

    fn handle(
        &mut self,
        command: &Command,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Reply, HandlerError> {
        (**self).handle(command, ctx)
    }
}

type HandlerFn =
    Box<dyn Fn(&Command, &mut CommandContext<'_>) -> Result<Reply, HandlerError> + Send + Sync>;
type DefaultValueFn = Box<dyn Fn(&str) -> Option<Replicated> + Send + Sync>;

/// An entity built from a table of handler closures keyed by command name.
///
/// ```rust
/// use replika_core::{Counter, Replicated};
/// use replika_entity::{CommandHandlers, Reply};
///
/// let handlers = CommandHandlers::new()
///     .with_default_value(|_| Some(Counter::new().into()))
///     .on("Increment", |command, ctx| {
///         let amount = command.payload.as_int().unwrap_or(1);
///         let counter = ctx.state_mut()?.as_counter_mut().unwrap();
///         counter.increment(amount)?;
///         Ok(Reply::message(counter.value()))
///     });
/// ```
#[derive(Default)]
pub struct CommandHandlers {
    handlers: HashMap<String, HandlerFn>,
    default_value: Option<DefaultValueFn>,
}

impl CommandHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for commands named `name`.
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Command, &mut CommandContext<'_>) -> Result<Reply, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn with_default_value<F>(mut self, default_value: F) -> Self
    where
        F: Fn(&str) -> Option<Replicated> + Send + Sync + 'static,
    {
        self.default_value = Some(Box::new(default_value));
        self
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl ReplicatedEntity for CommandHandlers {
    fn default_value(&self, entity_id: &str) -> Option<Replicated> {
        self.default_value.as_ref().and_then(|f| f(entity_id))
    }

    fn handle(
        &mut self,
        command: &Command,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Reply, HandlerError> {
        match self.handlers.get(&command.name) {
            Some(handler) => handler(command, ctx),
            None => Err(EntityError::UnknownCommand(command.name.clone()).into()),
        }
    }
}
