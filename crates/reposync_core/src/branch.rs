//! Branch table: mutable named heads updated by compare-and-swap.

use crate::clock::HybridClock;
use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use parking_lot::Mutex;
use reposync_storage::ObjectBackend;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the branch every repo starts with.
pub const DEFAULT_BRANCH: &str = "master";

const NAMESPACE: &str = "branches";
const MAX_NAME_LEN: usize = 255;

/// A branch and its current head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Owning repo.
    pub repo: RepoId,
    /// Branch name.
    pub name: String,
    /// Head commit; `None` until the first commit lands.
    pub head: Option<ObjectId>,
}

/// Checks that a branch name can be stored.
///
/// # Errors
///
/// Returns [`CoreError::InvalidBranchName`] describing the problem.
pub fn validate_branch_name(name: &str) -> CoreResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 255 bytes"
    } else if name.starts_with('.') {
        "name starts with '.'"
    } else if name.contains(['/', '\\', '\0']) {
        "name contains a forbidden character"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidBranchName {
        name: name.to_string(),
        reason,
    })
}

/// The single mutable source of truth for repo state.
///
/// Heads are cached in memory and written through to the backend while the
/// table lock is held, so a compare-and-swap is atomic with its persistence.
pub struct BranchTable {
    backend: Arc<dyn ObjectBackend>,
    clock: Arc<HybridClock>,
    heads: Mutex<HashMap<(RepoId, String), Option<ObjectId>>>,
}

impl BranchTable {
    /// Loads all branches from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for an unreadable record, or a storage
    /// error if the listing fails.
    pub fn open(backend: Arc<dyn ObjectBackend>, clock: Arc<HybridClock>) -> CoreResult<Self> {
        let mut heads = HashMap::new();
        for meta in backend.list(NAMESPACE, "")? {
            let (repo, name) = meta
                .key
                .split_once('/')
                .ok_or_else(|| CoreError::codec(format!("bad branch key {:?}", meta.key)))?;
            let repo: RepoId = repo.parse()?;
            clock.observe(meta.stamp);
            let value = backend.get(NAMESPACE, &meta.key)?.unwrap_or_default();
            heads.insert((repo, name.to_string()), decode_head(&value)?);
        }
        tracing::debug!(branches = heads.len(), "loaded branch table");
        Ok(Self {
            backend,
            clock,
            heads: Mutex::new(heads),
        })
    }

    pub(crate) fn empty(backend: Arc<dyn ObjectBackend>, clock: Arc<HybridClock>) -> Self {
        Self {
            backend,
            clock,
            heads: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a branch, if it exists.
    pub fn get(&self, repo: RepoId, name: &str) -> Option<Branch> {
        self.heads
            .lock()
            .get(&(repo, name.to_string()))
            .map(|head| Branch {
                repo,
                name: name.to_string(),
                head: *head,
            })
    }

    /// Returns the head of a branch.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BranchNotFound`] if the branch does not exist.
    pub fn head(&self, repo: RepoId, name: &str) -> CoreResult<Option<ObjectId>> {
        self.get(repo, name)
            .map(|b| b.head)
            .ok_or_else(|| CoreError::BranchNotFound {
                repo,
                branch: name.to_string(),
            })
    }

    /// Creates a branch.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleHead`] if the branch already exists.
    pub fn create(&self, repo: RepoId, name: &str, head: Option<ObjectId>) -> CoreResult<()> {
        validate_branch_name(name)?;
        let mut heads = self.heads.lock();
        let key = (repo, name.to_string());
        if let Some(current) = heads.get(&key) {
            return Err(CoreError::StaleHead {
                repo,
                branch: name.to_string(),
                current: *current,
            });
        }
        self.persist(repo, name, head)?;
        heads.insert(key, head);
        Ok(())
    }

    /// Moves a branch from `expected` to `new`.
    ///
    /// This performs no reachability checks; use
    /// [`Depot::update_branch`](crate::Depot::update_branch) for that.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleHead`] if the current head is not `expected`,
    /// and [`CoreError::BranchNotFound`] if the branch does not exist.
    pub fn compare_and_swap(
        &self,
        repo: RepoId,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> CoreResult<()> {
        let mut heads = self.heads.lock();
        let slot = heads
            .get_mut(&(repo, name.to_string()))
            .ok_or_else(|| CoreError::BranchNotFound {
                repo,
                branch: name.to_string(),
            })?;
        if *slot != expected {
            return Err(CoreError::StaleHead {
                repo,
                branch: name.to_string(),
                current: *slot,
            });
        }
        self.persist(repo, name, Some(new))?;
        *slot = Some(new);
        Ok(())
    }

    /// Lists the branches of a repo, sorted by name.
    pub fn list(&self, repo: RepoId) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self
            .heads
            .lock()
            .iter()
            .filter(|((r, _), _)| *r == repo)
            .map(|((r, name), head)| Branch {
                repo: *r,
                name: name.clone(),
                head: *head,
            })
            .collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        branches
    }

    /// Removes every branch of a repo. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a removal fails.
    pub(crate) fn remove_repo(&self, repo: RepoId) -> CoreResult<usize> {
        let mut heads = self.heads.lock();
        let names: Vec<String> = heads
            .keys()
            .filter(|(r, _)| *r == repo)
            .map(|(_, name)| name.clone())
            .collect();
        for name in &names {
            self.backend.remove(NAMESPACE, &branch_key(repo, name))?;
            heads.remove(&(repo, name.clone()));
        }
        Ok(names.len())
    }

    fn persist(&self, repo: RepoId, name: &str, head: Option<ObjectId>) -> CoreResult<()> {
        let value = head.map(|id| id.to_hex()).unwrap_or_default();
        self.backend.put(
            NAMESPACE,
            &branch_key(repo, name),
            value.as_bytes(),
            self.clock.tick(),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for BranchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTable")
            .field("branches", &self.heads.lock().len())
            .finish_non_exhaustive()
    }
}

fn branch_key(repo: RepoId, name: &str) -> String {
    format!("{}/{}", repo, name)
}

fn decode_head(value: &[u8]) -> CoreResult<Option<ObjectId>> {
    if value.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(value).map_err(CoreError::codec)?;
    Ok(Some(text.parse()?))
}
