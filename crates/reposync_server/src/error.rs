//! Error types for the sync server.

use crate::session::SessionPhase;
use reposync_core::{CoreError, ErrorKind};
use reposync_protocol::{ProtocolError, SessionId};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid or unexpected request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The peer lacks the permission the request needs.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The session is unknown, finished, expired or superseded.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A request belongs to a phase the session has already left.
    #[error("session {session} is in phase {current}, cannot go back to {requested}")]
    PhaseRegression {
        /// The session.
        session: SessionId,
        /// Its current phase.
        current: SessionPhase,
        /// Phase of the rejected request.
        requested: SessionPhase,
    },

    /// The request does not match the negotiated protocol version.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// Wire format error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Store, branch or DAG error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServerError {
    /// Maps this error onto the wire taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) | ServerError::PhaseRegression { .. } => {
                ErrorKind::InvalidRequest
            }
            ServerError::NotAuthorized(_) => ErrorKind::Unauthorized,
            ServerError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            ServerError::ProtocolMismatch(_) => ErrorKind::IncompatibleVersion,
            ServerError::Protocol(e) => e.kind(),
            ServerError::Core(e) => e.kind(),
        }
    }

    /// Returns true if the peer caused this error.
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this node failed.
    pub fn is_server_error(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::{ObjectId, ObjectKind};

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Core(CoreError::codec("broken")).is_server_error());
        assert!(!ServerError::NotAuthorized("read-only".into()).is_server_error());
    }

    #[test]
    fn core_errors_keep_their_kind() {
        let err = ServerError::from(CoreError::IntegrityMismatch {
            kind: ObjectKind::Block,
            claimed: ObjectId::of(b"a"),
            actual: ObjectId::of(b"b"),
        });
        assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
        assert!(err.is_client_error());
    }

    #[test]
    fn phase_regression_display() {
        let err = ServerError::PhaseRegression {
            session: SessionId::new(),
            current: SessionPhase::Blocks,
            requested: SessionPhase::Commits,
        };
        let msg = err.to_string();
        assert!(msg.contains("blocks"));
        assert!(msg.contains("commits"));
    }
}
