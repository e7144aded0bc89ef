//! Protocol messages.
//!
//! Every request and response is one [`SyncMessage`], framed as CBOR by
//! [`SyncMessage::encode`] / [`SyncMessage::decode`]. Every request after a
//! Check-Tx names the session it belongs to.

use crate::error::{ProtocolError, ProtocolResult};
use crate::records::CommitRecords;
use crate::version::{BlockProtocol, Capabilities, CommitProtocol, Negotiated};
use reposync_core::{ErrorKind, ObjectId, RepoId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a sync session, assigned by the serving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Basic pre-flight request. Carries no capabilities; the peer is assumed to
/// speak commit v1 and block v1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTxRequest {
    /// Target repo.
    pub repo: RepoId,
    /// Branch the session will read or move.
    pub branch: String,
    /// Stable identity of the calling peer.
    pub peer: String,
    /// Head the peer currently has for the branch.
    pub head: Option<ObjectId>,
    /// Authorization token.
    pub token: Option<String>,
    /// Whether the peer intends to upload.
    pub write: bool,
}

/// Pre-flight request with capability negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTxV2Request {
    /// Target repo.
    pub repo: RepoId,
    /// Branch the session will read or move.
    pub branch: String,
    /// Stable identity of the calling peer.
    pub peer: String,
    /// Head the peer currently has for the branch.
    pub head: Option<ObjectId>,
    /// Authorization token.
    pub token: Option<String>,
    /// Whether the peer intends to upload.
    pub write: bool,
    /// Versions the peer supports.
    pub capabilities: Capabilities,
}

impl CheckTxV2Request {
    /// Views a basic request as a v2 request with legacy capabilities.
    pub fn from_basic(req: CheckTxRequest) -> Self {
        Self {
            repo: req.repo,
            branch: req.branch,
            peer: req.peer,
            head: req.head,
            token: req.token,
            write: req.write,
            capabilities: Capabilities::legacy(),
        }
    }
}

/// Accepted pre-flight. Rejections are sent as [`SyncMessage::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTxResponse {
    /// Session opened for this sync.
    pub session: SessionId,
    /// Negotiated commit protocol.
    pub commit: CommitProtocol,
    /// Negotiated block protocol.
    pub block: BlockProtocol,
    /// The serving side's current head of the branch.
    pub head: Option<ObjectId>,
}

impl CheckTxResponse {
    /// The negotiated versions.
    pub fn negotiated(&self) -> Negotiated {
        Negotiated {
            commit: self.commit,
            block: self.block,
        }
    }
}

/// An fs-object on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsPayload {
    /// Claimed id.
    pub id: ObjectId,
    /// Serialized fs-object.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Progress of a chunked block upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    /// Block id.
    pub id: ObjectId,
    /// Bytes verified and held so far; the next chunk starts here.
    pub committed: u64,
    /// Hex SHA-256 of the first `committed` bytes.
    pub checkpoint: String,
    /// Whether the block is stored.
    pub complete: bool,
}

/// Result of a head update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    /// The branch now points at the new head.
    Applied,
    /// The branch did not point at the expected head.
    Stale {
        /// Head found instead.
        current: Option<ObjectId>,
    },
    /// The new head does not descend from the current one.
    NonFastForward {
        /// The current head.
        current: ObjectId,
    },
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMessage {
    /// Basic pre-flight.
    CheckTx(CheckTxRequest),
    /// Pre-flight with capabilities.
    CheckTxV2(CheckTxV2Request),
    /// Pre-flight accepted.
    CheckTxAccepted(CheckTxResponse),

    /// Which of these commits are absent on the serving side?
    CommitQuery {
        /// Session.
        session: SessionId,
        /// Commits to check.
        ids: Vec<ObjectId>,
    },
    /// Send these commits.
    GetCommits {
        /// Session.
        session: SessionId,
        /// Commits wanted.
        ids: Vec<ObjectId>,
    },
    /// Commits, in the negotiated encoding.
    Commits {
        /// Records, parents first.
        records: CommitRecords,
        /// Records the receiver must store as shallow boundaries.
        shallow: Vec<ObjectId>,
    },
    /// Store these commits.
    PutCommits {
        /// Session.
        session: SessionId,
        /// Records, parents first.
        records: CommitRecords,
        /// Records to store as shallow boundaries.
        shallow: Vec<ObjectId>,
    },

    /// Which of these fs-objects are absent on the serving side?
    FsQuery {
        /// Session.
        session: SessionId,
        /// Fs-objects to check.
        ids: Vec<ObjectId>,
    },
    /// Send these fs-objects.
    GetFs {
        /// Session.
        session: SessionId,
        /// Fs-objects wanted.
        ids: Vec<ObjectId>,
    },
    /// Fs-objects.
    FsObjects {
        /// Payloads.
        objects: Vec<FsPayload>,
    },
    /// Store these fs-objects.
    PutFs {
        /// Session.
        session: SessionId,
        /// Payloads, in any order.
        objects: Vec<FsPayload>,
    },
    /// No more fs-objects follow; the listed roots must now be complete.
    FinishFs {
        /// Session.
        session: SessionId,
        /// Roots of the trees sent in this session.
        roots: Vec<ObjectId>,
    },

    /// Which of these blocks are absent on the serving side?
    BlockQuery {
        /// Session.
        session: SessionId,
        /// Blocks to check.
        ids: Vec<ObjectId>,
    },
    /// Send a whole block (v1).
    GetBlock {
        /// Session.
        session: SessionId,
        /// Block wanted.
        id: ObjectId,
    },
    /// A whole block.
    Block {
        /// Block id.
        id: ObjectId,
        /// Content.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Store a whole block (v1).
    PutBlock {
        /// Session.
        session: SessionId,
        /// Claimed id.
        id: ObjectId,
        /// Content.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Send part of a block (v2).
    GetBlockRange {
        /// Session.
        session: SessionId,
        /// Block wanted.
        id: ObjectId,
        /// First byte.
        offset: u64,
        /// Maximum length.
        len: u64,
    },
    /// Part of a block.
    BlockRange {
        /// Block id.
        id: ObjectId,
        /// Offset of `data` within the block.
        offset: u64,
        /// Block length.
        total: u64,
        /// Content.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Store part of a block (v2).
    PutBlockChunk {
        /// Session.
        session: SessionId,
        /// Claimed id of the whole block.
        id: ObjectId,
        /// Offset of `data`; must equal the committed offset.
        offset: u64,
        /// Whether this chunk ends the block.
        last: bool,
        /// Content.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Where should the upload of this block resume (v2)?
    BlockUploadStatus {
        /// Session.
        session: SessionId,
        /// Block id.
        id: ObjectId,
    },
    /// Chunked upload progress.
    ChunkAck(ChunkAck),

    /// Move the session's branch.
    UpdateBranch {
        /// Session.
        session: SessionId,
        /// Head the caller believes is current.
        expected: Option<ObjectId>,
        /// New head.
        new: ObjectId,
        /// Allow a non fast-forward update.
        force: bool,
    },
    /// Head update result.
    BranchUpdated(BranchOutcome),

    /// End a session normally.
    CloseSession {
        /// Session.
        session: SessionId,
    },
    /// End a session as failed.
    AbortSession {
        /// Session.
        session: SessionId,
        /// Why.
        reason: String,
    },

    /// Ids absent on the answering side.
    Missing {
        /// Ids, in request order.
        ids: Vec<ObjectId>,
    },
    /// Objects stored.
    Stored {
        /// How many were newly written.
        written: u64,
    },
    /// Generic success.
    Ack,
    /// Request failed.
    Error {
        /// Taxonomy entry.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl SyncMessage {
    /// Encodes this message as a CBOR frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(ProtocolError::codec)?;
        Ok(buf)
    }

    /// Decodes a CBOR frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Codec`] for a malformed frame.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::de::from_reader(bytes).map_err(ProtocolError::codec)
    }

    /// Builds an error response.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        SyncMessage::Error {
            kind,
            message: message.into(),
        }
    }

    /// The session a request belongs to, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            SyncMessage::CommitQuery { session, .. }
            | SyncMessage::GetCommits { session, .. }
            | SyncMessage::PutCommits { session, .. }
            | SyncMessage::FsQuery { session, .. }
            | SyncMessage::GetFs { session, .. }
            | SyncMessage::PutFs { session, .. }
            | SyncMessage::FinishFs { session, .. }
            | SyncMessage::BlockQuery { session, .. }
            | SyncMessage::GetBlock { session, .. }
            | SyncMessage::PutBlock { session, .. }
            | SyncMessage::GetBlockRange { session, .. }
            | SyncMessage::PutBlockChunk { session, .. }
            | SyncMessage::BlockUploadStatus { session, .. }
            | SyncMessage::UpdateBranch { session, .. }
            | SyncMessage::CloseSession { session }
            | SyncMessage::AbortSession { session, .. } => Some(*session),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncMessage::CheckTx(_) => "check_tx",
            SyncMessage::CheckTxV2(_) => "check_tx_v2",
            SyncMessage::CheckTxAccepted(_) => "check_tx_accepted",
            SyncMessage::CommitQuery { .. } => "commit_query",
            SyncMessage::GetCommits { .. } => "get_commits",
            SyncMessage::Commits { .. } => "commits",
            SyncMessage::PutCommits { .. } => "put_commits",
            SyncMessage::FsQuery { .. } => "fs_query",
            SyncMessage::GetFs { .. } => "get_fs",
            SyncMessage::FsObjects { .. } => "fs_objects",
            SyncMessage::PutFs { .. } => "put_fs",
            SyncMessage::FinishFs { .. } => "finish_fs",
            SyncMessage::BlockQuery { .. } => "block_query",
            SyncMessage::GetBlock { .. } => "get_block",
            SyncMessage::Block { .. } => "block",
            SyncMessage::PutBlock { .. } => "put_block",
            SyncMessage::GetBlockRange { .. } => "get_block_range",
            SyncMessage::BlockRange { .. } => "block_range",
            SyncMessage::PutBlockChunk { .. } => "put_block_chunk",
            SyncMessage::BlockUploadStatus { .. } => "block_upload_status",
            SyncMessage::ChunkAck(_) => "chunk_ack",
            SyncMessage::UpdateBranch { .. } => "update_branch",
            SyncMessage::BranchUpdated(_) => "branch_updated",
            SyncMessage::CloseSession { .. } => "close_session",
            SyncMessage::AbortSession { .. } => "abort_session",
            SyncMessage::Missing { .. } => "missing",
            SyncMessage::Stored { .. } => "stored",
            SyncMessage::Ack => "ack",
            SyncMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CommitRecords;
    use proptest::prelude::*;
    use reposync_core::CommitBuilder;

    #[test]
    fn frames_decode_to_the_same_message() {
        let session = SessionId::new();
        let commit = CommitBuilder::new(RepoId::new(), ObjectId::ZERO).build();
        let records =
            CommitRecords::encode(CommitProtocol::V3, &[(commit.id().unwrap(), commit)]).unwrap();
        let messages = vec![
            SyncMessage::CheckTxV2(CheckTxV2Request {
                repo: RepoId::new(),
                branch: "master".into(),
                peer: "replica-1".into(),
                head: Some(ObjectId::of(b"h")),
                token: None,
                write: true,
                capabilities: Capabilities::all(),
            }),
            SyncMessage::PutCommits {
                session,
                records,
                shallow: vec![],
            },
            SyncMessage::PutBlockChunk {
                session,
                id: ObjectId::of(b"block"),
                offset: 4096,
                last: false,
                data: vec![7; 16],
            },
            SyncMessage::BranchUpdated(BranchOutcome::Stale { current: None }),
            SyncMessage::error(ErrorKind::StaleHead, "moved"),
        ];
        for msg in messages {
            let bytes = msg.encode().unwrap();
            assert_eq!(SyncMessage::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn session_is_reported_for_requests_only() {
        let session = SessionId::new();
        assert_eq!(
            SyncMessage::CloseSession { session }.session(),
            Some(session)
        );
        assert_eq!(SyncMessage::Ack.session(), None);
    }

    #[test]
    fn basic_check_tx_implies_legacy_capabilities() {
        let req = CheckTxRequest {
            repo: RepoId::new(),
            branch: "master".into(),
            peer: "p".into(),
            head: None,
            token: None,
            write: false,
        };
        assert_eq!(
            CheckTxV2Request::from_basic(req).capabilities,
            Capabilities::legacy()
        );
    }

    proptest! {
        #[test]
        fn garbage_frames_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = SyncMessage::decode(&bytes);
        }
    }
}
