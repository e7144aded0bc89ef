//! Error types for the sync orchestrator.

use reposync_core::{CoreError, ErrorKind, ObjectId};
use reposync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server reported a failure; the session is gone.
    #[error("server rejected {request}: {kind}: {message}")]
    Remote {
        /// The request that failed.
        request: &'static str,
        /// The reported kind.
        kind: ErrorKind,
        /// The server's message.
        message: String,
    },

    /// The server answered with a message the request does not allow.
    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        /// The request sent.
        request: &'static str,
        /// What came back.
        response: &'static str,
    },

    /// The branch moved since the session started.
    #[error("stale head for {branch}: expected {}, found {}", fmt_head(.expected), fmt_head(.current))]
    StaleHead {
        /// The branch.
        branch: String,
        /// The head the update was based on.
        expected: Option<ObjectId>,
        /// The head found.
        current: Option<ObjectId>,
    },

    /// The new head does not descend from the current one.
    #[error("non fast-forward update of {branch}: {new} does not descend from {current}")]
    NonFastForward {
        /// The branch.
        branch: String,
        /// The head found.
        current: ObjectId,
        /// The rejected head.
        new: ObjectId,
    },

    /// The branch to upload has no head.
    #[error("branch {0} has no commits to upload")]
    EmptyBranch(String),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Local store error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A sync is already running on this orchestrator.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

fn fmt_head(head: &Option<ObjectId>) -> String {
    match head {
        Some(id) => id.to_string(),
        None => "<empty>".to_string(),
    }
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps this error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote { kind, .. } => *kind,
            SyncError::StaleHead { .. } => ErrorKind::StaleHead,
            SyncError::NonFastForward { .. } => ErrorKind::NonFastForward,
            SyncError::UnexpectedResponse { .. } => ErrorKind::InvalidRequest,
            SyncError::EmptyBranch(_) | SyncError::InvalidStateTransition { .. } => {
                ErrorKind::InvalidRequest
            }
            SyncError::Protocol(e) => e.kind(),
            SyncError::Core(e) => e.kind(),
            SyncError::Transport { .. } | SyncError::Cancelled | SyncError::NotConnected => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns true if running the sync again may succeed.
    ///
    /// A stale head is retryable: the next attempt re-diffs against the new
    /// head.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            SyncError::Cancelled => false,
            SyncError::Remote { kind, .. } => kind.is_recoverable(),
            SyncError::StaleHead { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the server already ended the session.
    pub(crate) fn session_ended(&self) -> bool {
        matches!(
            self,
            SyncError::Remote { .. } | SyncError::StaleHead { .. } | SyncError::NonFastForward { .. }
        )
    }
}
