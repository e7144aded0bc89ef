//! Protocol versions and capability negotiation.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commit transfer encodings.
///
/// The transfer algorithm is the same for every version; only the record
/// layout differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitProtocol {
    /// Single parent, no format-version tag.
    V1,
    /// Adds the merge parent.
    V2,
    /// Adds the format-version tag.
    V3,
}

impl CommitProtocol {
    /// Every commit protocol version, oldest first.
    pub const ALL: [CommitProtocol; 3] = [CommitProtocol::V1, CommitProtocol::V2, CommitProtocol::V3];
}

/// Block transfer modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockProtocol {
    /// Whole-block transfer.
    V1,
    /// Chunked, resumable and ranged transfer.
    V2,
}

impl BlockProtocol {
    /// Every block protocol version, oldest first.
    pub const ALL: [BlockProtocol; 2] = [BlockProtocol::V1, BlockProtocol::V2];
}

impl fmt::Display for CommitProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitProtocol::V1 => f.write_str("commit/v1"),
            CommitProtocol::V2 => f.write_str("commit/v2"),
            CommitProtocol::V3 => f.write_str("commit/v3"),
        }
    }
}

impl fmt::Display for BlockProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockProtocol::V1 => f.write_str("block/v1"),
            BlockProtocol::V2 => f.write_str("block/v2"),
        }
    }
}

/// The protocol versions one side supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supported commit protocols.
    pub commit: Vec<CommitProtocol>,
    /// Supported block protocols.
    pub block: Vec<BlockProtocol>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl Capabilities {
    /// Every version this implementation speaks.
    pub fn all() -> Self {
        Self {
            commit: CommitProtocol::ALL.to_vec(),
            block: BlockProtocol::ALL.to_vec(),
        }
    }

    /// What a peer using the basic Check-Tx request is assumed to speak.
    pub fn legacy() -> Self {
        Self {
            commit: vec![CommitProtocol::V1],
            block: vec![BlockProtocol::V1],
        }
    }

    /// Replaces the commit protocol set.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<Vec<CommitProtocol>>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Replaces the block protocol set.
    #[must_use]
    pub fn with_block(mut self, block: impl Into<Vec<BlockProtocol>>) -> Self {
        self.block = block.into();
        self
    }

    /// Picks the highest version of each protocol both sides support.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IncompatibleVersion`] if either set has no
    /// overlap.
    pub fn negotiate(&self, peer: &Capabilities) -> ProtocolResult<Negotiated> {
        let commit = highest_common(&self.commit, &peer.commit).ok_or_else(|| {
            ProtocolError::IncompatibleVersion(format!(
                "no common commit protocol (local {:?}, peer {:?})",
                self.commit, peer.commit
            ))
        })?;
        let block = highest_common(&self.block, &peer.block).ok_or_else(|| {
            ProtocolError::IncompatibleVersion(format!(
                "no common block protocol (local {:?}, peer {:?})",
                self.block, peer.block
            ))
        })?;
        Ok(Negotiated { commit, block })
    }
}

fn highest_common<T: Copy + Ord>(ours: &[T], theirs: &[T]) -> Option<T> {
    ours.iter().filter(|v| theirs.contains(v)).max().copied()
}

/// Versions fixed for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiated {
    /// Commit protocol in use.
    pub commit: CommitProtocol,
    /// Block protocol in use.
    pub block: BlockProtocol,
}

impl fmt::Display for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.commit, self.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_common() {
        let server = Capabilities::all();
        let peer = Capabilities::all()
            .with_commit([CommitProtocol::V1, CommitProtocol::V2])
            .with_block([BlockProtocol::V1]);
        let n = server.negotiate(&peer).unwrap();
        assert_eq!(n.commit, CommitProtocol::V2);
        assert_eq!(n.block, BlockProtocol::V1);
        assert_eq!(server.negotiate(&server).unwrap().commit, CommitProtocol::V3);
    }

    #[test]
    fn legacy_peer_gets_v1() {
        let n = Capabilities::all().negotiate(&Capabilities::legacy()).unwrap();
        assert_eq!(n.commit, CommitProtocol::V1);
        assert_eq!(n.block, BlockProtocol::V1);
    }

    #[test]
    fn no_overlap_is_incompatible() {
        let server = Capabilities::all().with_commit([CommitProtocol::V3]);
        let err = server.negotiate(&Capabilities::legacy()).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompatibleVersion(_)));

        let empty = Capabilities::all().with_block(Vec::new());
        assert!(Capabilities::all().negotiate(&empty).is_err());
    }
}
