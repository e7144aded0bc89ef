//! # reposync protocol
//!
//! Wire types for repository sync.
//!
//! This crate provides:
//! - [`CommitProtocol`] / [`BlockProtocol`] versions and [`Capabilities`]
//!   negotiation (highest common version of each)
//! - [`CommitRecords`], the v1/v2/v3 commit encodings
//! - [`SyncMessage`], every request and response, framed as CBOR
//! - [`ErrorKind`], the failure taxonomy peers see
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod records;
mod version;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BranchOutcome, CheckTxRequest, CheckTxResponse, CheckTxV2Request, ChunkAck, FsPayload,
    SessionId, SyncMessage,
};
pub use records::{CommitRecordV1, CommitRecordV2, CommitRecordV3, CommitRecords};
pub use reposync_core::ErrorKind;
pub use version::{BlockProtocol, Capabilities, CommitProtocol, Negotiated};
