//! Commit record encodings for the three commit protocol versions.
//!
//! Object references travel as hex strings so that an empty or malformed
//! reference is reported as a dangling reference rather than a framing
//! error. A received record is rebuilt into a [`Commit`] whose id must match
//! the id it was sent under.

use crate::error::{ProtocolError, ProtocolResult};
use crate::version::CommitProtocol;
use reposync_core::{Commit, CoreError, ObjectId, ObjectKind, RepoId};
use serde::{Deserialize, Serialize};

/// Version 1 record: single parent, no format-version tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecordV1 {
    /// Commit id.
    pub id: String,
    /// Owning repo.
    pub repo_id: RepoId,
    /// Root fs-object.
    pub root_id: String,
    /// Parent, if any.
    pub parent_id: Option<String>,
    /// Author.
    pub author: String,
    /// Creation time.
    pub ctime: i64,
    /// Message.
    pub description: String,
}

/// Version 2 record: adds the merge parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecordV2 {
    /// Commit id.
    pub id: String,
    /// Owning repo.
    pub repo_id: RepoId,
    /// Root fs-object.
    pub root_id: String,
    /// First parent, if any.
    pub parent_id: Option<String>,
    /// Merge parent, if any.
    pub second_parent_id: Option<String>,
    /// Author.
    pub author: String,
    /// Creation time.
    pub ctime: i64,
    /// Message.
    pub description: String,
}

/// Version 3 record: adds the format-version tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecordV3 {
    /// Commit id.
    pub id: String,
    /// Owning repo.
    pub repo_id: RepoId,
    /// Root fs-object.
    pub root_id: String,
    /// First parent, if any.
    pub parent_id: Option<String>,
    /// Merge parent, if any.
    pub second_parent_id: Option<String>,
    /// Author.
    pub author: String,
    /// Creation time.
    pub ctime: i64,
    /// Message.
    pub description: String,
    /// Commit format version.
    pub version: u32,
}

/// A batch of commit records in one encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitRecords {
    /// Version 1 records.
    V1(Vec<CommitRecordV1>),
    /// Version 2 records.
    V2(Vec<CommitRecordV2>),
    /// Version 3 records.
    V3(Vec<CommitRecordV3>),
}

/// Format version implied by encodings without a version tag.
const UNTAGGED_VERSION: u32 = 0;

impl CommitRecords {
    /// Encodes commits for `protocol`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Unrepresentable`] for a merge commit under v1, or
    /// a commit with a non-zero format version under v1 or v2.
    pub fn encode(protocol: CommitProtocol, commits: &[(ObjectId, Commit)]) -> ProtocolResult<Self> {
        match protocol {
            CommitProtocol::V1 => commits
                .iter()
                .map(|(id, c)| -> ProtocolResult<CommitRecordV1> {
                    require(id, !c.is_merge(), "merge commits need commit protocol v2")?;
                    require(
                        id,
                        c.version == UNTAGGED_VERSION,
                        "format-version tag needs commit protocol v3",
                    )?;
                    Ok(CommitRecordV1 {
                        id: id.to_hex(),
                        repo_id: c.repo_id,
                        root_id: c.root_id.to_hex(),
                        parent_id: c.parent_id.map(|p| p.to_hex()),
                        author: c.author.clone(),
                        ctime: c.ctime,
                        description: c.description.clone(),
                    })
                })
                .collect::<ProtocolResult<_>>()
                .map(CommitRecords::V1),
            CommitProtocol::V2 => commits
                .iter()
                .map(|(id, c)| -> ProtocolResult<CommitRecordV2> {
                    require(
                        id,
                        c.version == UNTAGGED_VERSION,
                        "format-version tag needs commit protocol v3",
                    )?;
                    Ok(CommitRecordV2 {
                        id: id.to_hex(),
                        repo_id: c.repo_id,
                        root_id: c.root_id.to_hex(),
                        parent_id: c.parent_id.map(|p| p.to_hex()),
                        second_parent_id: c.second_parent_id.map(|p| p.to_hex()),
                        author: c.author.clone(),
                        ctime: c.ctime,
                        description: c.description.clone(),
                    })
                })
                .collect::<ProtocolResult<_>>()
                .map(CommitRecords::V2),
            CommitProtocol::V3 => Ok(CommitRecords::V3(
                commits
                    .iter()
                    .map(|(id, c)| CommitRecordV3 {
                        id: id.to_hex(),
                        repo_id: c.repo_id,
                        root_id: c.root_id.to_hex(),
                        parent_id: c.parent_id.map(|p| p.to_hex()),
                        second_parent_id: c.second_parent_id.map(|p| p.to_hex()),
                        author: c.author.clone(),
                        ctime: c.ctime,
                        description: c.description.clone(),
                        version: c.version,
                    })
                    .collect(),
            )),
        }
    }

    /// The encoding of this batch.
    pub fn protocol(&self) -> CommitProtocol {
        match self {
            CommitRecords::V1(_) => CommitProtocol::V1,
            CommitRecords::V2(_) => CommitProtocol::V2,
            CommitRecords::V3(_) => CommitProtocol::V3,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        match self {
            CommitRecords::V1(r) => r.len(),
            CommitRecords::V2(r) => r.len(),
            CommitRecords::V3(r) => r.len(),
        }
    }

    /// Returns true if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the commits and checks each against its claimed id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedReference`] for an empty or
    /// malformed root or parent, and [`CoreError::IntegrityMismatch`] if a
    /// rebuilt commit hashes to a different id.
    pub fn decode(&self) -> ProtocolResult<Vec<(ObjectId, Commit)>> {
        match self {
            CommitRecords::V1(records) => records
                .iter()
                .map(|r| {
                    rebuild(
                        &r.id,
                        RawCommit {
                            repo_id: r.repo_id,
                            root_id: &r.root_id,
                            parent_id: r.parent_id.as_deref(),
                            second_parent_id: None,
                            author: &r.author,
                            ctime: r.ctime,
                            description: &r.description,
                            version: UNTAGGED_VERSION,
                        },
                    )
                })
                .collect(),
            CommitRecords::V2(records) => records
                .iter()
                .map(|r| {
                    rebuild(
                        &r.id,
                        RawCommit {
                            repo_id: r.repo_id,
                            root_id: &r.root_id,
                            parent_id: r.parent_id.as_deref(),
                            second_parent_id: r.second_parent_id.as_deref(),
                            author: &r.author,
                            ctime: r.ctime,
                            description: &r.description,
                            version: UNTAGGED_VERSION,
                        },
                    )
                })
                .collect(),
            CommitRecords::V3(records) => records
                .iter()
                .map(|r| {
                    rebuild(
                        &r.id,
                        RawCommit {
                            repo_id: r.repo_id,
                            root_id: &r.root_id,
                            parent_id: r.parent_id.as_deref(),
                            second_parent_id: r.second_parent_id.as_deref(),
                            author: &r.author,
                            ctime: r.ctime,
                            description: &r.description,
                            version: r.version,
                        },
                    )
                })
                .collect(),
        }
    }
}

struct RawCommit<'a> {
    repo_id: RepoId,
    root_id: &'a str,
    parent_id: Option<&'a str>,
    second_parent_id: Option<&'a str>,
    author: &'a str,
    ctime: i64,
    description: &'a str,
    version: u32,
}

fn rebuild(claimed: &str, raw: RawCommit<'_>) -> ProtocolResult<(ObjectId, Commit)> {
    let id: ObjectId = claimed
        .parse()
        .map_err(|_| ProtocolError::codec(format!("malformed commit id {:?}", claimed)))?;
    let reference = |field: &'static str, value: &str| -> ProtocolResult<ObjectId> {
        value.parse().map_err(|_| ProtocolError::MalformedReference {
            commit: claimed.to_string(),
            field,
            value: value.to_string(),
        })
    };
    let commit = Commit {
        repo_id: raw.repo_id,
        root_id: reference("root_id", raw.root_id)?,
        parent_id: raw.parent_id.map(|p| reference("parent_id", p)).transpose()?,
        second_parent_id: raw
            .second_parent_id
            .map(|p| reference("second_parent_id", p))
            .transpose()?,
        author: raw.author.to_string(),
        ctime: raw.ctime,
        description: raw.description.to_string(),
        version: raw.version,
    };
    commit.validate()?;
    let actual = commit.id()?;
    if actual != id {
        return Err(CoreError::IntegrityMismatch {
            kind: ObjectKind::Commit,
            claimed: id,
            actual,
        }
        .into());
    }
    Ok((id, commit))
}

fn require(id: &ObjectId, ok: bool, reason: &str) -> ProtocolResult<()> {
    if ok {
        Ok(())
    } else {
        Err(CoreError::Unrepresentable {
            id: *id,
            reason: reason.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::{CommitBuilder, ErrorKind};

    fn legacy_commit() -> (ObjectId, Commit) {
        let c = CommitBuilder::new(RepoId::new(), ObjectId::of(b"root"))
            .parent(ObjectId::of(b"parent"))
            .author("bob")
            .description("legacy")
            .version(0)
            .build();
        (c.id().unwrap(), c)
    }

    #[test]
    fn every_version_carries_a_legacy_commit() {
        let commits = vec![legacy_commit()];
        for protocol in CommitProtocol::ALL {
            let records = CommitRecords::encode(protocol, &commits).unwrap();
            assert_eq!(records.protocol(), protocol);
            assert_eq!(records.decode().unwrap(), commits);
        }
    }

    #[test]
    fn merge_needs_v2() {
        let c = CommitBuilder::new(RepoId::new(), ObjectId::ZERO)
            .parent(ObjectId::of(b"a"))
            .second_parent(ObjectId::of(b"b"))
            .version(0)
            .build();
        let commits = vec![(c.id().unwrap(), c)];
        let err = CommitRecords::encode(CommitProtocol::V1, &commits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleVersion);
        let records = CommitRecords::encode(CommitProtocol::V2, &commits).unwrap();
        assert_eq!(records.decode().unwrap(), commits);
    }

    #[test]
    fn tagged_commit_needs_v3() {
        let c = CommitBuilder::new(RepoId::new(), ObjectId::ZERO).build();
        let commits = vec![(c.id().unwrap(), c)];
        assert!(CommitRecords::encode(CommitProtocol::V2, &commits).is_err());
        let records = CommitRecords::encode(CommitProtocol::V3, &commits).unwrap();
        assert_eq!(records.decode().unwrap(), commits);
    }

    #[test]
    fn empty_root_is_dangling() {
        let (id, c) = legacy_commit();
        let mut records = CommitRecords::encode(CommitProtocol::V1, &[(id, c)]).unwrap();
        if let CommitRecords::V1(r) = &mut records {
            r[0].root_id = String::new();
        }
        let err = records.decode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DanglingReference);
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let (id, c) = legacy_commit();
        let mut records = CommitRecords::encode(CommitProtocol::V3, &[(id, c)]).unwrap();
        if let CommitRecords::V3(r) = &mut records {
            r[0].description = "rewritten".into();
        }
        assert_eq!(
            records.decode().unwrap_err().kind(),
            ErrorKind::IntegrityMismatch
        );
    }
}
