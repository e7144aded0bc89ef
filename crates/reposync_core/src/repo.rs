//! Repo records.

use crate::clock::HybridClock;
use crate::error::{CoreError, CoreResult};
use crate::id::RepoId;
use crate::object::{from_cbor, to_cbor};
use parking_lot::RwLock;
use reposync_storage::ObjectBackend;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const NAMESPACE: &str = "repos";

/// What the engine knows about a repo. Quotas, ACLs and ownership live in
/// the metadata layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repo id.
    pub id: RepoId,
    /// Whether repo content is encrypted client-side.
    pub encrypted: bool,
    /// Creation time, seconds since the Unix epoch.
    pub created: i64,
}

/// The set of known repos.
pub struct RepoTable {
    backend: Arc<dyn ObjectBackend>,
    clock: Arc<HybridClock>,
    repos: RwLock<HashMap<RepoId, RepoInfo>>,
}

impl RepoTable {
    /// Loads all repo records from the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be read or decoded.
    pub fn open(backend: Arc<dyn ObjectBackend>, clock: Arc<HybridClock>) -> CoreResult<Self> {
        let mut repos = HashMap::new();
        for meta in backend.list(NAMESPACE, "")? {
            clock.observe(meta.stamp);
            let Some(bytes) = backend.get(NAMESPACE, &meta.key)? else {
                continue;
            };
            let info: RepoInfo = from_cbor(&bytes)?;
            repos.insert(info.id, info);
        }
        Ok(Self {
            backend,
            clock,
            repos: RwLock::new(repos),
        })
    }

    pub(crate) fn empty(backend: Arc<dyn ObjectBackend>, clock: Arc<HybridClock>) -> Self {
        Self {
            backend,
            clock,
            repos: RwLock::new(HashMap::new()),
        }
    }

    /// Records a new repo.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RepoExists`] if the id is taken.
    pub(crate) fn insert(&self, id: RepoId, encrypted: bool) -> CoreResult<RepoInfo> {
        let mut repos = self.repos.write();
        if repos.contains_key(&id) {
            return Err(CoreError::RepoExists(id));
        }
        let info = RepoInfo {
            id,
            encrypted,
            created: unix_seconds(),
        };
        self.backend.put(
            NAMESPACE,
            &id.to_string(),
            &to_cbor(&info)?,
            self.clock.tick(),
        )?;
        repos.insert(id, info.clone());
        Ok(info)
    }

    /// Forgets a repo. Returns false if it was unknown.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal fails.
    pub(crate) fn remove(&self, id: RepoId) -> CoreResult<bool> {
        let mut repos = self.repos.write();
        if repos.remove(&id).is_none() {
            return Ok(false);
        }
        self.backend.remove(NAMESPACE, &id.to_string())?;
        Ok(true)
    }

    /// Returns a repo record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RepoNotFound`] if the repo is unknown.
    pub fn get(&self, id: RepoId) -> CoreResult<RepoInfo> {
        self.repos
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::RepoNotFound(id))
    }

    /// Returns true if the repo exists.
    pub fn contains(&self, id: RepoId) -> bool {
        self.repos.read().contains_key(&id)
    }

    /// Lists all repos, ordered by id.
    pub fn list(&self) -> Vec<RepoInfo> {
        let mut repos: Vec<RepoInfo> = self.repos.read().values().cloned().collect();
        repos.sort_by_key(|r| r.id);
        repos
    }
}

impl std::fmt::Debug for RepoTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoTable")
            .field("repos", &self.repos.read().len())
            .finish_non_exhaustive()
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
