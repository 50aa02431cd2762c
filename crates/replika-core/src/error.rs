//! Error types for Replicated Data operations.

use crate::data::DataKind;
use thiserror::Error;

/// Errors raised by Replicated Data operations.
///
/// Concurrent conflicts are never errors: registers, sets and votes resolve
/// them deterministically when deltas are merged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Illegal API sequencing (mutating after deletion, a non-monotonic
    /// custom clock, binding state twice).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A key or delta tried to rebind a value to another data type.
    #[error("Type mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: DataKind, found: DataKind },

    /// Arithmetic left the 64-bit range.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DataError {
    /// Whether this error reports misuse of the API by the caller.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            DataError::InvalidState(_) | DataError::KindMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
