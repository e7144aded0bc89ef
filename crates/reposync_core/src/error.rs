//! Error types for reposync core.

use crate::id::{ObjectId, RepoId};
use crate::object::ObjectKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in reposync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] reposync_storage::StorageError),

    /// An object or record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A string is not a valid object or repo id.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// The repo does not exist.
    #[error("repo not found: {0}")]
    RepoNotFound(RepoId),

    /// A repo with this id already exists.
    #[error("repo already exists: {0}")]
    RepoExists(RepoId),

    /// The requested object is not in the store.
    #[error("{kind} {id} not found")]
    ObjectNotFound {
        /// What kind of object was requested.
        kind: ObjectKind,
        /// The missing id.
        id: ObjectId,
    },

    /// An object references a dependency that is absent.
    #[error("{kind} {id} references missing {missing_kind} {missing}")]
    DanglingReference {
        /// Kind of the referencing object.
        kind: ObjectKind,
        /// Id of the referencing object.
        id: ObjectId,
        /// Kind of the absent dependency.
        missing_kind: ObjectKind,
        /// Id of the absent dependency.
        missing: ObjectId,
    },

    /// A received fs-object subtree is still incomplete after the allowed wait.
    #[error("fs-object {parent} is missing child {child}")]
    MissingChild {
        /// The directory or file manifest that is incomplete.
        parent: ObjectId,
        /// The child fs-object or block that never arrived.
        child: ObjectId,
    },

    /// Content does not hash to the id it was claimed under.
    #[error("integrity mismatch for {kind}: claimed {claimed}, actual {actual}")]
    IntegrityMismatch {
        /// Kind of the object.
        kind: ObjectKind,
        /// Id the sender claimed.
        claimed: ObjectId,
        /// Id computed from the received bytes.
        actual: ObjectId,
    },

    /// Compare-and-swap rejected: the branch head is not the expected one.
    #[error("stale head for {repo}/{branch}: current is {}", fmt_head(.current))]
    StaleHead {
        /// The repo.
        repo: RepoId,
        /// The branch.
        branch: String,
        /// The head found at the time of the update.
        current: Option<ObjectId>,
    },

    /// The new head does not descend from the old one and no force was given.
    #[error("non fast-forward update of {repo}/{branch}: {new} does not descend from {old}")]
    NonFastForward {
        /// The repo.
        repo: RepoId,
        /// The branch.
        branch: String,
        /// The current head.
        old: ObjectId,
        /// The rejected new head.
        new: ObjectId,
    },

    /// The branch does not exist.
    #[error("branch not found: {repo}/{branch}")]
    BranchNotFound {
        /// The repo.
        repo: RepoId,
        /// The branch.
        branch: String,
    },

    /// The branch name cannot be stored.
    #[error("invalid branch name {name:?}: {reason}")]
    InvalidBranchName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A commit cannot be expressed in the requested format.
    #[error("commit {id} not representable: {reason}")]
    Unrepresentable {
        /// The commit.
        id: ObjectId,
        /// What the format lacks.
        reason: String,
    },

    /// A garbage collection pass is already running for the same scope.
    #[error("garbage collection already running")]
    GcBusy,
}

fn fmt_head(head: &Option<ObjectId>) -> String {
    match head {
        Some(id) => id.to_string(),
        None => "<empty>".to_string(),
    }
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }

    /// Maps this error onto the wire-visible taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::RepoNotFound(_) => ErrorKind::RepoNotFound,
            CoreError::DanglingReference { .. } | CoreError::ObjectNotFound { .. } => {
                ErrorKind::DanglingReference
            }
            CoreError::MissingChild { .. } => ErrorKind::MissingChild,
            CoreError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            CoreError::StaleHead { .. } => ErrorKind::StaleHead,
            CoreError::NonFastForward { .. } => ErrorKind::NonFastForward,
            CoreError::Unrepresentable { .. } => ErrorKind::IncompatibleVersion,
            CoreError::InvalidId(_)
            | CoreError::InvalidBranchName { .. }
            | CoreError::BranchNotFound { .. }
            | CoreError::RepoExists(_) => ErrorKind::InvalidRequest,
            CoreError::Storage(_) | CoreError::Codec(_) | CoreError::GcBusy => {
                ErrorKind::Internal
            }
        }
    }
}

/// The error taxonomy visible to peers.
///
/// Every failure a session can report is one of these, so the initiating
/// peer can decide to retry, downgrade, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The repo is unknown.
    RepoNotFound,
    /// The peer may not perform the operation.
    Unauthorized,
    /// No protocol version is supported by both sides.
    IncompatibleVersion,
    /// A commit or fs-object references an absent dependency.
    DanglingReference,
    /// An fs subtree stayed incomplete past the allowed wait.
    MissingChild,
    /// Content does not match its claimed id.
    IntegrityMismatch,
    /// Branch compare-and-swap found a different head.
    StaleHead,
    /// Divergent history without force.
    NonFastForward,
    /// The session id is unknown, expired or superseded.
    SessionNotFound,
    /// The request is malformed or out of order.
    InvalidRequest,
    /// The node failed internally.
    Internal,
}

impl ErrorKind {
    /// Returns true if the caller may re-diff and retry.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::StaleHead | ErrorKind::SessionNotFound | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RepoNotFound => "repo not found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::IncompatibleVersion => "incompatible version",
            ErrorKind::DanglingReference => "dangling reference",
            ErrorKind::MissingChild => "missing child",
            ErrorKind::IntegrityMismatch => "integrity mismatch",
            ErrorKind::StaleHead => "stale head",
            ErrorKind::NonFastForward => "non fast-forward",
            ErrorKind::SessionNotFound => "session not found",
            ErrorKind::InvalidRequest => "invalid request",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}
