//! Content-addressed object store.

use crate::clock::HybridClock;
use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use crate::object::{Commit, FsObject, ObjectKind};
use reposync_storage::ObjectBackend;
use std::collections::HashSet;
use std::sync::Arc;

const SHALLOW_NAMESPACE: &str = "shallow";

/// One stored object as seen by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Owning repo.
    pub repo: RepoId,
    /// Object id.
    pub id: ObjectId,
    /// Write stamp.
    pub stamp: u64,
    /// Stored length in bytes.
    pub len: u64,
}

/// Write-once storage for blocks, fs-objects and commits.
///
/// Objects are keyed `<repo>/<id>` inside one backend namespace per
/// [`ObjectKind`]. Every write verifies that the id matches the content, so
/// nothing is ever stored under a wrong id. Writing an id that is already
/// present is a no-op apart from refreshing its write stamp.
pub struct ObjectStore {
    backend: Arc<dyn ObjectBackend>,
    clock: Arc<HybridClock>,
}

impl ObjectStore {
    /// Creates a store over `backend`, stamping writes from `clock`.
    pub fn new(backend: Arc<dyn ObjectBackend>, clock: Arc<HybridClock>) -> Self {
        Self { backend, clock }
    }

    /// Stores a block and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn put_block(&self, repo: RepoId, data: &[u8]) -> CoreResult<ObjectId> {
        let id = ObjectId::of(data);
        self.write(ObjectKind::Block, repo, &id, data)?;
        Ok(id)
    }

    /// Stores a block received under `claimed`.
    ///
    /// Returns `true` if the block was newly written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityMismatch`] if `data` does not hash to
    /// `claimed`; nothing is stored in that case.
    pub fn put_block_verified(
        &self,
        repo: RepoId,
        claimed: &ObjectId,
        data: &[u8],
    ) -> CoreResult<bool> {
        verify(ObjectKind::Block, claimed, data)?;
        self.write(ObjectKind::Block, repo, claimed, data)
    }

    /// Reads a block.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] if the block is absent.
    pub fn get_block(&self, repo: RepoId, id: &ObjectId) -> CoreResult<Vec<u8>> {
        self.read(ObjectKind::Block, repo, id)
    }

    /// Stores an fs-object and returns its id.
    ///
    /// The empty directory is never stored; its id is returned directly.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend write fails.
    pub fn put_fs(&self, repo: RepoId, obj: &FsObject) -> CoreResult<ObjectId> {
        if obj.is_empty_dir() {
            return Ok(ObjectId::ZERO);
        }
        let bytes = obj.to_bytes()?;
        let id = ObjectId::of(&bytes);
        self.write(ObjectKind::Fs, repo, &id, &bytes)?;
        Ok(id)
    }

    /// Stores fs-object bytes received under `claimed` and returns the
    /// parsed object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityMismatch`] on a hash mismatch and
    /// [`CoreError::Codec`] if the bytes are not a valid fs-object.
    pub fn put_fs_verified(
        &self,
        repo: RepoId,
        claimed: &ObjectId,
        bytes: &[u8],
    ) -> CoreResult<FsObject> {
        if claimed.is_zero() {
            let obj = FsObject::from_bytes(bytes)?;
            if !obj.is_empty_dir() {
                return Err(CoreError::IntegrityMismatch {
                    kind: ObjectKind::Fs,
                    claimed: *claimed,
                    actual: ObjectId::of(bytes),
                });
            }
            return Ok(obj);
        }
        verify(ObjectKind::Fs, claimed, bytes)?;
        let obj = FsObject::from_bytes(bytes)?;
        self.write(ObjectKind::Fs, repo, claimed, bytes)?;
        Ok(obj)
    }

    /// Reads and parses an fs-object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] if the object is absent.
    pub fn get_fs(&self, repo: RepoId, id: &ObjectId) -> CoreResult<FsObject> {
        if id.is_zero() {
            return Ok(FsObject::empty_dir());
        }
        FsObject::from_bytes(&self.read(ObjectKind::Fs, repo, id)?)
    }

    /// Reads the stored bytes of an fs-object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] if the object is absent.
    pub fn get_fs_bytes(&self, repo: RepoId, id: &ObjectId) -> CoreResult<Vec<u8>> {
        if id.is_zero() {
            return FsObject::empty_dir().to_bytes();
        }
        self.read(ObjectKind::Fs, repo, id)
    }

    /// Stores a commit and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DanglingReference`] if a parent is neither
    /// present nor is the commit marked as a shallow boundary.
    pub fn put_commit(&self, commit: &Commit) -> CoreResult<ObjectId> {
        let bytes = commit.to_bytes()?;
        let id = ObjectId::of(&bytes);
        self.accept_commit(&id, commit, &bytes, false)?;
        Ok(id)
    }

    /// Stores a commit as a shallow boundary: its parents need not be
    /// present. The marker is written only once the commit is stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] or [`CoreError::Unrepresentable`] for a
    /// malformed commit, or a storage error.
    pub fn put_shallow_commit(&self, commit: &Commit) -> CoreResult<ObjectId> {
        let bytes = commit.to_bytes()?;
        let id = ObjectId::of(&bytes);
        self.accept_commit(&id, commit, &bytes, true)?;
        self.mark_shallow(commit.repo_id, &id)?;
        Ok(id)
    }

    /// Stores commit bytes received under `claimed`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityMismatch`] on a hash mismatch,
    /// [`CoreError::DanglingReference`] for an absent parent, and
    /// [`CoreError::Codec`] if the commit belongs to another repo.
    pub fn put_commit_verified(
        &self,
        repo: RepoId,
        claimed: &ObjectId,
        bytes: &[u8],
    ) -> CoreResult<Commit> {
        let commit = Commit::from_bytes_verified(claimed, bytes)?;
        if commit.repo_id != repo {
            return Err(CoreError::codec(format!(
                "commit {} belongs to repo {}",
                claimed, commit.repo_id
            )));
        }
        self.accept_commit(claimed, &commit, bytes, false)?;
        Ok(commit)
    }

    fn accept_commit(
        &self,
        id: &ObjectId,
        commit: &Commit,
        bytes: &[u8],
        boundary: bool,
    ) -> CoreResult<()> {
        commit.validate()?;
        let repo = commit.repo_id;
        if !boundary && !self.is_shallow(repo, id)? {
            for parent in commit.parents() {
                if !self.has(ObjectKind::Commit, repo, &parent)? {
                    return Err(CoreError::DanglingReference {
                        kind: ObjectKind::Commit,
                        id: *id,
                        missing_kind: ObjectKind::Commit,
                        missing: parent,
                    });
                }
            }
        }
        self.write(ObjectKind::Commit, repo, id, bytes)?;
        Ok(())
    }

    /// Reads and parses a commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] if the commit is absent.
    pub fn get_commit(&self, repo: RepoId, id: &ObjectId) -> CoreResult<Commit> {
        Commit::from_bytes(&self.read(ObjectKind::Commit, repo, id)?)
    }

    /// Reads the stored bytes of a commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectNotFound`] if the commit is absent.
    pub fn get_commit_bytes(&self, repo: RepoId, id: &ObjectId) -> CoreResult<Vec<u8>> {
        self.read(ObjectKind::Commit, repo, id)
    }

    /// Reads raw stored bytes of any kind, without parsing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn get_raw(
        &self,
        kind: ObjectKind,
        repo: RepoId,
        id: &ObjectId,
    ) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.backend.get(kind.namespace(), &object_key(repo, id))?)
    }

    /// Returns true if the object is present. The empty directory always is.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lookup fails.
    pub fn has(&self, kind: ObjectKind, repo: RepoId, id: &ObjectId) -> CoreResult<bool> {
        if kind == ObjectKind::Fs && id.is_zero() {
            return Ok(true);
        }
        Ok(self
            .backend
            .stat(kind.namespace(), &object_key(repo, id))?
            .is_some())
    }

    /// Stored length of an object, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lookup fails.
    pub fn size(&self, kind: ObjectKind, repo: RepoId, id: &ObjectId) -> CoreResult<Option<u64>> {
        Ok(self
            .backend
            .stat(kind.namespace(), &object_key(repo, id))?
            .map(|meta| meta.len))
    }

    /// Returns the ids from `ids` that are absent, in request order.
    ///
    /// Present objects get their write stamp refreshed, so a collection pass
    /// that started earlier treats them as new while a session relies on them.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend lookup fails.
    pub fn missing(
        &self,
        kind: ObjectKind,
        repo: RepoId,
        ids: &[ObjectId],
    ) -> CoreResult<Vec<ObjectId>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            if !seen.insert(*id) || (kind == ObjectKind::Fs && id.is_zero()) {
                continue;
            }
            let stamp = self.clock.tick();
            if !self
                .backend
                .touch(kind.namespace(), &object_key(repo, id), stamp)?
            {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    /// Records `id` as a shallow boundary: its parents need not be present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn mark_shallow(&self, repo: RepoId, id: &ObjectId) -> CoreResult<()> {
        self.backend.put(
            SHALLOW_NAMESPACE,
            &object_key(repo, id),
            &[],
            self.clock.tick(),
        )?;
        Ok(())
    }

    /// Returns true if `id` is a shallow boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lookup fails.
    pub fn is_shallow(&self, repo: RepoId, id: &ObjectId) -> CoreResult<bool> {
        Ok(self
            .backend
            .stat(SHALLOW_NAMESPACE, &object_key(repo, id))?
            .is_some())
    }

    /// Removes a shallow boundary marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend removal fails.
    pub fn unmark_shallow(&self, repo: RepoId, id: &ObjectId) -> CoreResult<bool> {
        Ok(self
            .backend
            .remove(SHALLOW_NAMESPACE, &object_key(repo, id))?)
    }

    /// Lists stored objects of one kind, for one repo or for all.
    ///
    /// Entries whose key does not parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend listing fails.
    pub fn list(&self, kind: ObjectKind, repo: Option<RepoId>) -> CoreResult<Vec<StoredObject>> {
        let prefix = repo.map(|r| format!("{}/", r)).unwrap_or_default();
        let entries = self.backend.list(kind.namespace(), &prefix)?;
        let mut objects = Vec::with_capacity(entries.len());
        for meta in entries {
            match parse_object_key(&meta.key) {
                Some((repo, id)) => objects.push(StoredObject {
                    repo,
                    id,
                    stamp: meta.stamp,
                    len: meta.len,
                }),
                None => {
                    tracing::warn!(namespace = kind.namespace(), key = %meta.key, "skipping unparsable object key");
                }
            }
        }
        Ok(objects)
    }

    /// Highest write stamp over every object and shallow marker.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend listing fails.
    pub fn high_water(&self) -> CoreResult<u64> {
        let mut high = 0;
        for namespace in ObjectKind::ALL
            .iter()
            .map(|k| k.namespace())
            .chain([SHALLOW_NAMESPACE])
        {
            for meta in self.backend.list(namespace, "")? {
                high = high.max(meta.stamp);
            }
        }
        Ok(high)
    }

    /// Removes an object if its write stamp is below `epoch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend removal fails.
    pub fn remove_if_older(
        &self,
        kind: ObjectKind,
        repo: RepoId,
        id: &ObjectId,
        epoch: u64,
    ) -> CoreResult<bool> {
        Ok(self
            .backend
            .remove_if_older(kind.namespace(), &object_key(repo, id), epoch)?)
    }

    /// Flushes the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }

    fn write(&self, kind: ObjectKind, repo: RepoId, id: &ObjectId, data: &[u8]) -> CoreResult<bool> {
        let key = object_key(repo, id);
        let stamp = self.clock.tick();
        let written = self
            .backend
            .put_if_absent(kind.namespace(), &key, data, stamp)?;
        if !written {
            self.backend.touch(kind.namespace(), &key, stamp)?;
            tracing::trace!(%kind, id = %id.short(), "dedup hit");
        }
        Ok(written)
    }

    fn read(&self, kind: ObjectKind, repo: RepoId, id: &ObjectId) -> CoreResult<Vec<u8>> {
        self.backend
            .get(kind.namespace(), &object_key(repo, id))?
            .ok_or(CoreError::ObjectNotFound { kind, id: *id })
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("clock", &self.clock.last())
            .finish_non_exhaustive()
    }
}

fn verify(kind: ObjectKind, claimed: &ObjectId, data: &[u8]) -> CoreResult<()> {
    let actual = ObjectId::of(data);
    if actual != *claimed {
        return Err(CoreError::IntegrityMismatch {
            kind,
            claimed: *claimed,
            actual,
        });
    }
    Ok(())
}

fn object_key(repo: RepoId, id: &ObjectId) -> String {
    format!("{}/{}", repo, id.to_hex())
}

fn parse_object_key(key: &str) -> Option<(RepoId, ObjectId)> {
    let (repo, id) = key.split_once('/')?;
    Some((repo.parse().ok()?, id.parse().ok()?))
}
