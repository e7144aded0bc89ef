//! Protocol error types.

use reposync_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors from encoding, decoding and negotiation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The two capability sets share no version.
    #[error("incompatible version: {0}")]
    IncompatibleVersion(String),

    /// A commit record carries an empty or malformed object reference.
    #[error("commit {commit}: malformed {field} {value:?}")]
    MalformedReference {
        /// Claimed id of the commit record.
        commit: String,
        /// Which field was malformed.
        field: &'static str,
        /// The raw value.
        value: String,
    },

    /// Error from the data model.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProtocolError {
    /// Creates a codec error.
    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }

    /// Maps this error onto the wire taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Codec(_) => ErrorKind::InvalidRequest,
            ProtocolError::IncompatibleVersion(_) => ErrorKind::IncompatibleVersion,
            ProtocolError::MalformedReference { .. } => ErrorKind::DanglingReference,
            ProtocolError::Core(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reference_is_dangling() {
        let err = ProtocolError::MalformedReference {
            commit: "abc".into(),
            field: "root_id",
            value: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
        assert_eq!(
            ProtocolError::IncompatibleVersion("none".into()).kind(),
            ErrorKind::IncompatibleVersion
        );
    }
}
