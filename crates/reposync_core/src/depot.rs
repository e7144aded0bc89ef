//! The depot: every piece of persisted engine state behind one handle.

use crate::branch::{BranchTable, DEFAULT_BRANCH};
use crate::clock::HybridClock;
use crate::dag;
use crate::error::{CoreError, CoreResult};
use crate::gc::GcBarrier;
use crate::id::{ObjectId, RepoId};
use crate::object::ObjectKind;
use crate::repo::{RepoInfo, RepoTable};
use crate::store::ObjectStore;
use crate::tree;
use reposync_storage::{InMemoryBackend, ObjectBackend};
use std::sync::Arc;

/// Object store, branch table and repo table over one backend.
///
/// A depot is constructed once and passed explicitly to every server
/// processor, orchestrator and collector that needs it.
#[derive(Debug)]
pub struct Depot {
    clock: Arc<HybridClock>,
    objects: ObjectStore,
    branches: BranchTable,
    repos: RepoTable,
    barrier: GcBarrier,
}

impl Depot {
    /// Opens a depot over `backend`, loading the branch and repo tables.
    ///
    /// The clock is advanced past every stored stamp, so new writes and GC
    /// epochs order after everything already persisted even when the wall
    /// clock has gone backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be loaded or the stored stamps
    /// cannot be listed.
    pub fn open(backend: Arc<dyn ObjectBackend>) -> CoreResult<Self> {
        let clock = Arc::new(HybridClock::new());
        let branches = BranchTable::open(backend.clone(), clock.clone())?;
        let repos = RepoTable::open(backend.clone(), clock.clone())?;
        let objects = ObjectStore::new(backend, clock.clone());
        clock.observe(objects.high_water()?);
        tracing::info!(repos = repos.list().len(), stamp = clock.last(), "depot opened");
        Ok(Self {
            clock,
            objects,
            branches,
            repos,
            barrier: GcBarrier::default(),
        })
    }

    /// Creates an empty depot held in memory.
    pub fn in_memory() -> Self {
        let backend: Arc<dyn ObjectBackend> = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(HybridClock::new());
        Self {
            objects: ObjectStore::new(backend.clone(), clock.clone()),
            branches: BranchTable::empty(backend.clone(), clock.clone()),
            repos: RepoTable::empty(backend, clock.clone()),
            clock,
            barrier: GcBarrier::default(),
        }
    }

    /// The object store.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The branch table.
    pub fn branches(&self) -> &BranchTable {
        &self.branches
    }

    /// The repo table.
    pub fn repos(&self) -> &RepoTable {
        &self.repos
    }

    /// The store clock.
    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    pub(crate) fn barrier(&self) -> &GcBarrier {
        &self.barrier
    }

    /// Creates a repo with an empty `master` branch.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RepoExists`] if the id is taken.
    pub fn create_repo(&self, id: RepoId, encrypted: bool) -> CoreResult<RepoInfo> {
        let info = self.repos.insert(id, encrypted)?;
        self.branches.create(id, DEFAULT_BRANCH, None)?;
        tracing::info!(repo = %id, encrypted, "repo created");
        Ok(info)
    }

    /// Deletes a repo and its branches.
    ///
    /// Its objects stay in the store until a collection pass over all repos
    /// removes them.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RepoNotFound`] if the repo is unknown.
    pub fn delete_repo(&self, id: RepoId) -> CoreResult<()> {
        if !self.repos.remove(id)? {
            return Err(CoreError::RepoNotFound(id));
        }
        let branches = self.branches.remove_repo(id)?;
        tracing::info!(repo = %id, branches, "repo deleted");
        Ok(())
    }

    /// Creates a branch, optionally pointing at an existing complete commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RepoNotFound`] for an unknown repo,
    /// [`CoreError::DanglingReference`] if `head` is not complete, and
    /// [`CoreError::StaleHead`] if the branch exists.
    pub fn create_branch(&self, repo: RepoId, name: &str, head: Option<ObjectId>) -> CoreResult<()> {
        self.repos.get(repo)?;
        let _fence = self.barrier.update_guard();
        if let Some(head) = head {
            self.check_head_complete(repo, &head, None)?;
        }
        self.branches.create(repo, name, head)?;
        if let Some(head) = head {
            self.barrier.publish(repo, head);
        }
        Ok(())
    }

    /// Moves a branch from `expected` to `new`.
    ///
    /// The new head's commit and its whole tree must be stored. The update
    /// must be a fast-forward unless `force` is set. Authorization for
    /// `force` is the caller's concern.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RepoNotFound`] / [`CoreError::BranchNotFound`]
    /// - [`CoreError::DanglingReference`] if `new` is not complete
    /// - [`CoreError::StaleHead`] if the current head is not `expected`
    /// - [`CoreError::NonFastForward`] for divergent history without `force`
    pub fn update_branch(
        &self,
        repo: RepoId,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
        force: bool,
    ) -> CoreResult<()> {
        self.repos.get(repo)?;
        let _fence = self.barrier.update_guard();

        let current = self.branches.head(repo, name)?;
        if current != expected {
            return Err(CoreError::StaleHead {
                repo,
                branch: name.to_string(),
                current,
            });
        }
        if current == Some(new) {
            return Ok(());
        }

        let base_root = match current {
            Some(old) => Some(self.objects.get_commit(repo, &old)?.root_id),
            None => None,
        };
        self.check_head_complete(repo, &new, base_root)?;

        if let Some(old) = current {
            if !force && !dag::is_ancestor(&self.objects, repo, &old, &new)? {
                return Err(CoreError::NonFastForward {
                    repo,
                    branch: name.to_string(),
                    old,
                    new,
                });
            }
        }

        self.branches.compare_and_swap(repo, name, expected, new)?;
        self.barrier.publish(repo, new);
        tracing::info!(
            %repo,
            branch = name,
            old = ?current.map(|c| c.short()),
            new = %new.short(),
            force,
            "branch updated"
        );
        Ok(())
    }

    fn check_head_complete(
        &self,
        repo: RepoId,
        head: &ObjectId,
        base_root: Option<ObjectId>,
    ) -> CoreResult<()> {
        let commit = match self.objects.get_commit(repo, head) {
            Ok(c) => c,
            Err(CoreError::ObjectNotFound { .. }) => {
                return Err(CoreError::DanglingReference {
                    kind: ObjectKind::Commit,
                    id: *head,
                    missing_kind: ObjectKind::Commit,
                    missing: *head,
                })
            }
            Err(e) => return Err(e),
        };
        match tree::check_complete(&self.objects, repo, &commit.root_id, base_root) {
            Err(CoreError::DanglingReference {
                missing_kind,
                missing,
                ..
            }) => Err(CoreError::DanglingReference {
                kind: ObjectKind::Commit,
                id: *head,
                missing_kind,
                missing,
            }),
            other => other,
        }
    }
}
