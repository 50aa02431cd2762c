//! Error types for entity sessions and runners.

use crate::state::EntityState;
use replika_core::DataError;
use thiserror::Error;

/// Errors raised by the entity lifecycle.
///
/// Failures of command handler code are not errors at this level: they
/// become [`Reply::Failure`](crate::reply::Reply::Failure) replies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    /// Illegal API sequencing, such as binding state twice or mutating a
    /// deleted entity.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Entity is not active: {state}")]
    NotActive { state: EntityState },

    #[error("Entity has been deleted")]
    Deleted,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The entity's mailbox or reply channel is gone.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The sink refused a flushed delta; the command was rolled back.
    #[error("Delta not delivered: {0}")]
    Delivery(String),
}

impl EntityError {
    /// Whether this error reports misuse of the API by the caller.
    pub fn is_usage_error(&self) -> bool {
        match self {
            EntityError::InvalidState(_) | EntityError::Deleted => true,
            EntityError::Data(err) => err.is_usage_error(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EntityError>;
