use crate::log::LogError;
use crate::record::codec::CodecError;
use crate::record::{ErrorType, Intent, RejectionType, ValueType};
use crate::types::{Key, PartitionId, NO_KEY};
use thiserror::Error;

/// Failures that stop a partition. Protocol outcomes such as rejections and
/// incidents are records, never engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no processor registered for {value_type}:{intent}")]
    NoProcessor { value_type: ValueType, intent: Intent },
    #[error("log failure: {0}")]
    Log(#[from] LogError),
    #[error("storage still failing after {attempts} attempts: {source}")]
    StorageExhausted {
        attempts: u32,
        #[source]
        source: LogError,
    },
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),
    #[error("state is inconsistent with the log: {0}")]
    CorruptState(String),
    #[error("partition {0} is not known to this broker")]
    UnknownPartition(PartitionId),
    #[error("partition {0} has shut down")]
    PartitionClosed(PartitionId),
}

/// A command the engine refuses, with the reason returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

impl Rejection {
    pub fn new(rejection_type: RejectionType, reason: impl Into<String>) -> Self {
        Self {
            rejection_type,
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::NotFound, reason)
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::Unauthorized, reason)
    }

    pub fn already_exists(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::AlreadyExists, reason)
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidArgument, reason)
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(RejectionType::InvalidState, reason)
    }
}

/// A business failure that pauses an element behind an incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error_type: ErrorType,
    pub message: String,
    /// Scope whose variables the operator must fix; `-1` means the failing element.
    pub variable_scope_key: Key,
}

impl Failure {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            variable_scope_key: NO_KEY,
        }
    }

    pub fn in_scope(mut self, scope_key: Key) -> Self {
        self.variable_scope_key = scope_key;
        self
    }
}

/// Outcome of a processor that did not finish normally.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Roll back and write only the rejection.
    #[error("rejected ({:?}): {}", .0.rejection_type, .0.reason)]
    Rejected(Rejection),
    /// Raised inside element processing; caught where the incident is written.
    #[error("incident ({:?}): {}", .0.error_type, .0.message)]
    Incident(Failure),
    #[error(transparent)]
    Fatal(#[from] EngineError),
    /// A processor bug; rolled back and answered with a processing error rejection.
    #[error("unexpected processing failure: {0}")]
    Unexpected(String),
}

impl From<Rejection> for ProcessingError {
    fn from(rejection: Rejection) -> Self {
        ProcessingError::Rejected(rejection)
    }
}

impl From<Failure> for ProcessingError {
    fn from(failure: Failure) -> Self {
        ProcessingError::Incident(failure)
    }
}

impl ProcessingError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        ProcessingError::Unexpected(message.into())
    }
}
