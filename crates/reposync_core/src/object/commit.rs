//! Commits: immutable nodes of the history DAG.

use super::{from_cbor, to_cbor, ObjectKind};
use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use serde::{Deserialize, Serialize};

/// A snapshot of a repository: a root fs-object plus parent links.
///
/// The commit id is the SHA-256 of the CBOR serialization of this struct,
/// so every field (including `version`) is covered by the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Repo this commit belongs to.
    pub repo_id: RepoId,
    /// Root directory of the snapshot.
    pub root_id: ObjectId,
    /// First parent; `None` for an initial commit.
    pub parent_id: Option<ObjectId>,
    /// Second parent of a merge commit.
    pub second_parent_id: Option<ObjectId>,
    /// Author name or email.
    pub author: String,
    /// Creation time, seconds since the Unix epoch.
    pub ctime: i64,
    /// Commit message.
    pub description: String,
    /// Commit format version tag.
    pub version: u32,
}

impl Commit {
    /// Format version written by this implementation.
    pub const CURRENT_VERSION: u32 = 1;

    /// Highest format version this implementation can decode.
    pub const MAX_VERSION: u32 = 1;

    /// Serializes this commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Parses a commit and checks its structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for malformed input and
    /// [`CoreError::Unrepresentable`] for an unknown format version.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let commit: Commit = from_cbor(bytes)?;
        commit.validate()?;
        Ok(commit)
    }

    /// Parses a commit received under `claimed` and checks the id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityMismatch`] if the bytes hash to a
    /// different id, or any error from [`Commit::from_bytes`].
    pub fn from_bytes_verified(claimed: &ObjectId, bytes: &[u8]) -> CoreResult<Self> {
        let actual = ObjectId::of(bytes);
        if actual != *claimed {
            return Err(CoreError::IntegrityMismatch {
                kind: ObjectKind::Commit,
                claimed: *claimed,
                actual,
            });
        }
        Self::from_bytes(bytes)
    }

    /// Computes this commit's id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn id(&self) -> CoreResult<ObjectId> {
        Ok(ObjectId::of(&self.to_bytes()?))
    }

    /// Parent ids, first parent first.
    pub fn parents(&self) -> impl Iterator<Item = ObjectId> {
        self.parent_id.into_iter().chain(self.second_parent_id)
    }

    /// Returns true for a two-parent commit.
    pub fn is_merge(&self) -> bool {
        self.second_parent_id.is_some()
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for a second parent without a first, and
    /// [`CoreError::Unrepresentable`] for an unknown format version.
    pub fn validate(&self) -> CoreResult<()> {
        if self.second_parent_id.is_some() && self.parent_id.is_none() {
            return Err(CoreError::codec("second parent without first parent"));
        }
        if self.version > Self::MAX_VERSION {
            return Err(CoreError::Unrepresentable {
                id: self.id()?,
                reason: format!("unsupported commit format version {}", self.version),
            });
        }
        Ok(())
    }
}

/// Builder for [`Commit`].
#[derive(Debug, Clone)]
pub struct CommitBuilder {
    commit: Commit,
}

impl CommitBuilder {
    /// Starts a commit of `root_id` in `repo_id`.
    pub fn new(repo_id: RepoId, root_id: ObjectId) -> Self {
        Self {
            commit: Commit {
                repo_id,
                root_id,
                parent_id: None,
                second_parent_id: None,
                author: String::new(),
                ctime: 0,
                description: String::new(),
                version: Commit::CURRENT_VERSION,
            },
        }
    }

    /// Sets the first parent.
    #[must_use]
    pub fn parent(mut self, id: ObjectId) -> Self {
        self.commit.parent_id = Some(id);
        self
    }

    /// Sets the second (merge) parent.
    #[must_use]
    pub fn second_parent(mut self, id: ObjectId) -> Self {
        self.commit.second_parent_id = Some(id);
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.commit.author = author.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.commit.description = description.into();
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn ctime(mut self, ctime: i64) -> Self {
        self.commit.ctime = ctime;
        self
    }

    /// Sets the format version tag.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.commit.version = version;
        self
    }

    /// Finishes the commit.
    pub fn build(self) -> Commit {
        self.commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Commit {
        CommitBuilder::new(RepoId::new(), ObjectId::of(b"root"))
            .author("alice@example.com")
            .description("initial")
            .ctime(1_700_000_000)
            .build()
    }

    #[test]
    fn id_covers_all_fields() {
        let a = sample();
        let mut b = a.clone();
        b.version = 0;
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn verified_decode_checks_hash() {
        let commit = sample();
        let bytes = commit.to_bytes().unwrap();
        let id = commit.id().unwrap();

        assert_eq!(Commit::from_bytes_verified(&id, &bytes).unwrap(), commit);

        let wrong = ObjectId::of(b"other");
        let err = Commit::from_bytes_verified(&wrong, &bytes).unwrap_err();
        assert!(matches!(err, CoreError::IntegrityMismatch { .. }));
    }

    #[test]
    fn parents_iterates_in_order() {
        let p1 = ObjectId::of(b"p1");
        let p2 = ObjectId::of(b"p2");
        let merge = CommitBuilder::new(RepoId::new(), ObjectId::ZERO)
            .parent(p1)
            .second_parent(p2)
            .build();
        assert!(merge.is_merge());
        assert_eq!(merge.parents().collect::<Vec<_>>(), vec![p1, p2]);
        assert_eq!(sample().parents().count(), 0);
    }

    #[test]
    fn unknown_version_rejected() {
        let commit = CommitBuilder::new(RepoId::new(), ObjectId::ZERO)
            .version(Commit::MAX_VERSION + 1)
            .build();
        let bytes = commit.to_bytes().unwrap();
        assert!(matches!(
            Commit::from_bytes(&bytes),
            Err(CoreError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn orphan_second_parent_rejected() {
        let mut commit = sample();
        commit.second_parent_id = Some(ObjectId::of(b"p"));
        assert!(commit.validate().is_err());
    }
}
