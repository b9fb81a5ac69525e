//! Error types for saga persistence, dispatch and wiring

use crate::{CommitId, CorrelationId};

/// Error raised by saga handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which branch of `handle` produced an action or error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstancePhase {
    /// A new instance was being created
    Create,
    /// An existing instance was being used
    Existing,
}

impl std::fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create saga instance"),
            Self::Existing => write!(f, "existing saga instance"),
        }
    }
}

/// Low-level event store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Nothing was ever committed under the ID
    #[error("stream {0} not found")]
    StreamNotFound(CorrelationId),
    /// The backend failed
    #[error("storage error: {0}")]
    Storage(Box<str>),
}

/// Failure to commit a stream's staged events
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Another writer advanced the stream past the revision this writer saw
    #[error("stream {stream_id} is at revision {actual}, commit expected {expected}")]
    Conflict {
        /// Stream being committed
        stream_id: CorrelationId,
        /// Revision the writer observed
        expected: u64,
        /// Revision the store holds
        actual: u64,
    },
    /// The backend failed
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Error surfaced by a saga repository or one of its deferred actions.
///
/// Policy denials and duplicate commits are not errors and never appear
/// here.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// A handler failed while applying the message
    #[error("{phase} failed: {saga_type} {correlation_id} handling {message_type}: {source}")]
    Handler {
        /// Branch that was running
        phase: InstancePhase,
        /// Saga type
        saga_type: &'static str,
        /// Message being handled
        message_type: &'static str,
        /// Instance the message was applied to
        correlation_id: CorrelationId,
        /// Error returned by the handler
        #[source]
        source: BoxError,
    },
    /// A concurrent writer won; the caller decides whether to redeliver
    #[error(
        "{phase} conflict: {saga_type} {correlation_id} handling {message_type} \
         expected revision {expected}, found {actual}"
    )]
    Conflict {
        /// Branch that was running
        phase: InstancePhase,
        /// Saga type
        saga_type: &'static str,
        /// Message being handled
        message_type: &'static str,
        /// Instance the message was applied to
        correlation_id: CorrelationId,
        /// Revision the action loaded
        expected: u64,
        /// Revision the store holds
        actual: u64,
    },
    /// The backend failed to load or persist the instance
    #[error("storage failure: {saga_type} {correlation_id} handling {message_type}: {source}")]
    Storage {
        /// Saga type
        saga_type: &'static str,
        /// Message being handled
        message_type: &'static str,
        /// Instance being loaded or saved
        correlation_id: CorrelationId,
        /// Set when the failure happened while committing
        commit_id: Option<CommitId>,
        /// Backend error
        #[source]
        source: StoreError,
    },
    /// Enumeration requested from a backend without a queryable index
    #[error("{backend} does not support enumerating {saga_type} sagas ({operation})")]
    Unsupported {
        /// Repository implementation
        backend: &'static str,
        /// Saga type
        saga_type: &'static str,
        /// Enumeration that was attempted
        operation: &'static str,
    },
}

impl SagaError {
    /// Check if this error is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error is an unsupported enumeration
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Correlation ID the error relates to, if any
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Handler { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Storage { correlation_id, .. } => Some(*correlation_id),
            Self::Unsupported { .. } => None,
        }
    }
}

/// No way to correlate a message type to a saga; raised at startup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WiringError {
    /// Neither a property rule nor a carried correlation ID applies
    #[error("no correlation found to connect {message_type} to {saga_type}")]
    NoCorrelation {
        /// Saga type
        saga_type: &'static str,
        /// Message that cannot be routed
        message_type: &'static str,
    },
}

/// Failure to route a message through the distributor
#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    /// The connector returned an error; conflicts arrive here unchanged
    #[error(transparent)]
    Saga(#[from] SagaError),
    /// The worker's queue or reply channel closed
    #[error("saga worker {worker} is not running")]
    WorkerUnavailable {
        /// Worker index
        worker: usize,
    },
    /// A handler panicked; the worker recovered and keeps serving its queue
    #[error("handler panicked: {saga_type} {correlation_id} handling {message_type}: {detail}")]
    HandlerPanicked {
        /// Saga type
        saga_type: &'static str,
        /// Message being handled
        message_type: &'static str,
        /// Instance the message was routed to
        correlation_id: CorrelationId,
        /// Panic payload when it was a string
        detail: String,
    },
    /// A worker task died and was reported at shutdown
    #[error("saga worker {worker} panicked")]
    WorkerPanicked {
        /// Worker index
        worker: usize,
    },
    /// The configuration failed validation
    #[error("invalid distributor config: {0}")]
    InvalidConfig(&'static str),
    /// `start` was called outside a tokio runtime
    #[error("distributor must be started inside a tokio runtime")]
    NoRuntime,
}

impl DistributorError {
    /// Check if the underlying saga error is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Saga(e) if e.is_conflict())
    }
}
