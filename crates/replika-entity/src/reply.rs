//! Commands, replies and the messages a command produces.

use crate::config::WriteConsistency;
use crate::error::EntityError;
use replika_core::{DataError, Delta, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status codes carried by failure replies, numbered as in gRPC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Cancelled,
    #[default]
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Cancelled => 1,
            Status::Unknown => 2,
            Status::InvalidArgument => 3,
            Status::DeadlineExceeded => 4,
            Status::NotFound => 5,
            Status::AlreadyExists => 6,
            Status::PermissionDenied => 7,
            Status::ResourceExhausted => 8,
            Status::FailedPrecondition => 9,
            Status::Aborted => 10,
            Status::OutOfRange => 11,
            Status::Unimplemented => 12,
            Status::Internal => 13,
            Status::Unavailable => 14,
            Status::DataLoss => 15,
            Status::Unauthenticated => 16,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A command addressed to one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    pub name: String,
    pub payload: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Command {
    pub fn new(id: u64, name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            id,
            name: name.into(),
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The reply to a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Message { value: Value },
    Failure { status: Status, description: String },
    NoReply,
}

impl Reply {
    pub fn message(value: impl Into<Value>) -> Self {
        Reply::Message {
            value: value.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Failure { .. })
    }

    /// The message value, if this is a message reply.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Reply::Message { value } => Some(value),
            _ => None,
        }
    }
}

/// A failure raised by command handler code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    pub status: Status,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Status::InvalidArgument, message)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<HandlerError> for Reply {
    fn from(err: HandlerError) -> Self {
        Reply::Failure {
            status: err.status,
            description: err.message,
        }
    }
}

impl From<DataError> for HandlerError {
    fn from(err: DataError) -> Self {
        let status = match &err {
            DataError::OutOfRange(_) => Status::OutOfRange,
            DataError::Serialization(_) => Status::InvalidArgument,
            DataError::InvalidState(_) | DataError::KindMismatch { .. } => {
                Status::FailedPrecondition
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<EntityError> for HandlerError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::Data(data) => data.into(),
            EntityError::UnknownCommand(_) => Self::new(Status::Unimplemented, err.to_string()),
            EntityError::Cancelled => Self::new(Status::Cancelled, err.to_string()),
            EntityError::Channel(_) => Self::new(Status::Unavailable, err.to_string()),
            _ => Self::new(Status::FailedPrecondition, err.to_string()),
        }
    }
}

/// The change a command flushed, for the replication layer to send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutgoingDelta {
    pub entity_id: String,
    /// `None` when only a deletion is being announced.
    pub delta: Option<Delta>,
    pub deleted: bool,
    pub write_consistency: WriteConsistency,
}

/// Everything a finished command produced.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandOutcome {
    pub reply: Reply,
    pub delta: Option<OutgoingDelta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::FailedPrecondition.code(), 9);
        assert_eq!(Status::Unauthenticated.code(), 16);
    }

    #[test]
    fn test_handler_error_becomes_failure_reply() {
        let reply = Reply::from(HandlerError::invalid_argument("bad quantity"));
        assert_eq!(
            reply,
            Reply::Failure {
                status: Status::InvalidArgument,
                description: "bad quantity".to_string()
            }
        );
        assert!(reply.is_failure());
    }

    #[test]
    fn test_data_errors_map_to_status() {
        let overflow = HandlerError::from(DataError::OutOfRange("overflow".into()));
        assert_eq!(overflow.status, Status::OutOfRange);

        let misuse = HandlerError::from(EntityError::InvalidState("already set".into()));
        assert_eq!(misuse.status, Status::FailedPrecondition);

        let unknown = HandlerError::from(EntityError::UnknownCommand("Frobnicate".into()));
        assert_eq!(unknown.status, Status::Unimplemented);
    }

    #[test]
    fn test_command_metadata_and_serialization() {
        let command = Command::new(7, "AddItem", "apple").with_metadata("user", "alice");
        assert_eq!(command.metadata.get("user").map(String::as_str), Some("alice"));

        let serialized = serde_json::to_string(&command).unwrap();
        let deserialized: Command = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, command);
    }
}
