//! The context a command handler runs in.

use crate::error::{EntityError, Result};
use crate::reply::{Command, HandlerError, Status};
use replika_core::Replicated;
use std::collections::BTreeMap;

/// Effects a handler requested through its context. They take effect when
/// the command ends successfully.
#[derive(Debug, Default)]
pub(crate) struct ScopeEffects {
    pub(crate) state_set: bool,
    pub(crate) deleted: bool,
    pub(crate) failure: Option<HandlerError>,
}

/// Access to the entity's state for the duration of one command.
///
/// Mutations through [`CommandContext::state_mut`] are visible to later
/// reads in the same command immediately. They are flushed as one delta when
/// the command ends, or discarded if it fails.
pub struct CommandContext<'a> {
    entity_id: &'a str,
    command: &'a Command,
    data: &'a mut Option<Replicated>,
    effects: &'a mut ScopeEffects,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        entity_id: &'a str,
        command: &'a Command,
        data: &'a mut Option<Replicated>,
        effects: &'a mut ScopeEffects,
    ) -> Self {
        Self {
            entity_id,
            command,
            data,
            effects,
        }
    }

    pub fn entity_id(&self) -> &str {
        self.entity_id
    }

    /// The command being handled.
    pub fn command(&self) -> &'a Command {
        self.command
    }

    pub fn command_id(&self) -> u64 {
        self.command.id
    }

    pub fn command_name(&self) -> &str {
        &self.command.name
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.command.metadata
    }

    /// The entity's state, if it has one.
    pub fn state(&self) -> Option<&Replicated> {
        self.data.as_ref()
    }

    /// The entity's state, for mutation.
    ///
    /// Fails with `InvalidState` if the entity has no state yet or was
    /// deleted by this command.
    pub fn state_mut(&mut self) -> Result<&mut Replicated> {
        self.ensure_not_deleted()?;
        self.data
            .as_mut()
            .ok_or_else(|| EntityError::InvalidState("entity has no state".to_string()))
    }

    /// Bind the entity's state. An entity's state can be bound only once:
    /// fails with `InvalidState` if it already has one.
    pub fn set_state(&mut self, value: impl Into<Replicated>) -> Result<&mut Replicated> {
        self.ensure_not_deleted()?;
        if self.data.is_some() {
            return Err(EntityError::InvalidState(
                "entity state has already been set".to_string(),
            ));
        }
        self.effects.state_set = true;
        Ok(self.data.insert(value.into()))
    }

    /// Delete the entity once this command ends. No further mutation is
    /// permitted.
    pub fn delete(&mut self) {
        self.effects.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.effects.deleted
    }

    /// Fail the command. Its changes are discarded and the caller receives a
    /// failure reply, whatever the handler returns afterwards.
    pub fn fail(&mut self, message: impl Into<String>, status: Status) -> HandlerError {
        let err = HandlerError::new(status, message);
        self.effects.failure = Some(err.clone());
        err
    }

    fn ensure_not_deleted(&self) -> Result<()> {
        if self.effects.deleted {
            return Err(EntityError::InvalidState(format!(
                "entity {} has been deleted",
                self.entity_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replika_core::{Counter, Value};

    #[test]
    fn test_context_accessors() {
        let command = Command::new(3, "Increment", 5).with_metadata("trace", "abc");
        let mut data = None;
        let mut effects = ScopeEffects::default();
        let ctx = CommandContext::new("counter-1", &command, &mut data, &mut effects);

        assert_eq!(ctx.entity_id(), "counter-1");
        assert_eq!(ctx.command_id(), 3);
        assert_eq!(ctx.command_name(), "Increment");
        assert_eq!(ctx.command().payload, Value::from(5));
        assert_eq!(ctx.metadata().get("trace").map(String::as_str), Some("abc"));
        assert!(ctx.state().is_none());
    }

    #[test]
    fn test_set_state_only_once() {
        let command = Command::new(1, "Init", Value::Bool(true));
        let mut data = None;
        let mut effects = ScopeEffects::default();
        let mut ctx = CommandContext::new("e", &command, &mut data, &mut effects);

        assert!(ctx.state_mut().is_err());
        ctx.set_state(Counter::new()).unwrap();
        assert!(ctx.state_mut().is_ok());
        assert!(matches!(
            ctx.set_state(Counter::new()),
            Err(EntityError::InvalidState(_))
        ));
        assert!(effects.state_set);
    }

    #[test]
    fn test_no_mutation_after_delete() {
        let command = Command::new(1, "Delete", Value::Bool(true));
        let mut data = Some(Replicated::from(Counter::new()));
        let mut effects = ScopeEffects::default();
        let mut ctx = CommandContext::new("e", &command, &mut data, &mut effects);

        ctx.delete();
        assert!(ctx.is_deleted());
        let err = ctx.state_mut().unwrap_err();
        assert!(err.is_usage_error());
        // Reads are still allowed
        assert!(ctx.state().is_some());
    }

    #[test]
    fn test_fail_records_failure() {
        let command = Command::new(1, "Bad", Value::Bool(true));
        let mut data = None;
        let mut effects = ScopeEffects::default();
        let mut ctx = CommandContext::new("e", &command, &mut data, &mut effects);

        let err = ctx.fail("not allowed", Status::PermissionDenied);
        assert_eq!(err.status, Status::PermissionDenied);
        assert_eq!(effects.failure, Some(err));
    }
}
