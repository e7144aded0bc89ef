//! Commit DAG walks.
//!
//! Walks stop at shallow boundaries: a commit marked shallow is allowed to
//! have parents that are not in the store.

use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use crate::object::{Commit, ObjectKind};
use crate::store::ObjectStore;
use std::collections::{HashMap, HashSet, VecDeque};

/// A commit loaded on the sending side of a transfer.
#[derive(Debug, Clone)]
pub struct LoadedCommit {
    /// Commit id.
    pub id: ObjectId,
    /// The commit.
    pub commit: Commit,
    /// Whether the sender holds it as a shallow boundary.
    pub shallow: bool,
}

/// Commits one side lacks, parents first.
#[derive(Debug, Clone, Default)]
pub struct CommitFrontier {
    /// Commits to transfer in an order where parents precede children.
    pub commits: Vec<LoadedCommit>,
    /// Ids among `commits` the receiver must record as shallow boundaries.
    pub shallow: Vec<ObjectId>,
}

impl CommitFrontier {
    /// Returns true if there is nothing to transfer.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Ids of the commits to transfer.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.commits.iter().map(|c| c.id)
    }

    /// Returns true if `id` is part of this frontier.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.commits.iter().any(|c| c.id == *id)
    }
}

/// Finds the commits reachable from `heads` that the receiver lacks.
///
/// The walk proceeds one generation at a time. `lacking` asks the receiver
/// which ids of a generation it does not have; only those are loaded via
/// `load` and have their parents explored, so the walk stops at the first
/// commit both sides share. With a `depth`, commits at that distance from
/// the heads become shallow boundaries.
///
/// # Errors
///
/// Propagates errors from `lacking` and `load`; returns
/// [`CoreError::ObjectNotFound`] if `load` omits a requested commit.
pub fn frontier<E, L, K>(
    heads: &[ObjectId],
    depth: Option<usize>,
    mut lacking: L,
    mut load: K,
) -> Result<CommitFrontier, E>
where
    E: From<CoreError>,
    L: FnMut(&[ObjectId]) -> Result<Vec<ObjectId>, E>,
    K: FnMut(&[ObjectId]) -> Result<Vec<LoadedCommit>, E>,
{
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut found: Vec<LoadedCommit> = Vec::new();
    let mut shallow = Vec::new();
    let mut generation: Vec<ObjectId> = heads.iter().copied().filter(|h| visited.insert(*h)).collect();
    let mut distance = 1usize;

    while !generation.is_empty() {
        let wanted = lacking(&generation)?;
        if wanted.is_empty() {
            break;
        }
        let loaded = load(&wanted)?;
        let by_id: HashMap<ObjectId, LoadedCommit> =
            loaded.into_iter().map(|c| (c.id, c)).collect();

        let mut next = Vec::new();
        for id in &wanted {
            let entry = by_id.get(id).ok_or(CoreError::ObjectNotFound {
                kind: ObjectKind::Commit,
                id: *id,
            })?;
            let at_limit = depth.is_some_and(|d| distance >= d);
            if entry.shallow || (at_limit && entry.commit.parent_id.is_some()) {
                shallow.push(*id);
            } else {
                next.extend(entry.commit.parents().filter(|p| visited.insert(*p)));
            }
            found.push(entry.clone());
        }
        generation = next;
        distance += 1;
    }

    Ok(CommitFrontier {
        commits: parents_first(found),
        shallow,
    })
}

/// Orders commits so that every parent inside the set precedes its children.
pub fn parents_first(commits: Vec<LoadedCommit>) -> Vec<LoadedCommit> {
    let ids: HashSet<ObjectId> = commits.iter().map(|c| c.id).collect();
    let mut pending: HashMap<ObjectId, usize> = HashMap::new();
    let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    for c in &commits {
        let inside: Vec<ObjectId> = c.commit.parents().filter(|p| ids.contains(p)).collect();
        pending.insert(c.id, inside.len());
        for p in inside {
            children.entry(p).or_default().push(c.id);
        }
    }

    let mut by_id: HashMap<ObjectId, LoadedCommit> =
        commits.into_iter().map(|c| (c.id, c)).collect();
    let mut ready: VecDeque<ObjectId> = {
        let mut roots: Vec<ObjectId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        roots.sort();
        roots.into()
    };

    let mut ordered = Vec::with_capacity(by_id.len());
    while let Some(id) = ready.pop_front() {
        if let Some(c) = by_id.remove(&id) {
            ordered.push(c);
        }
        for child in children.get(&id).into_iter().flatten() {
            if let Some(n) = pending.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    ready.push_back(*child);
                }
            }
        }
    }
    ordered
}

/// Collects every commit reachable from `head` in the local store.
///
/// # Errors
///
/// Returns [`CoreError::ObjectNotFound`] if a reachable commit is absent and
/// its child is not a shallow boundary.
pub fn ancestors(
    store: &ObjectStore,
    repo: RepoId,
    head: &ObjectId,
) -> CoreResult<HashMap<ObjectId, Commit>> {
    let mut seen = HashMap::new();
    let mut queue = VecDeque::from([*head]);
    let mut visited = HashSet::from([*head]);
    while let Some(id) = queue.pop_front() {
        let commit = store.get_commit(repo, &id)?;
        let shallow = store.is_shallow(repo, &id)?;
        for parent in commit.parents() {
            if !visited.insert(parent) {
                continue;
            }
            if shallow && !store.has(ObjectKind::Commit, repo, &parent)? {
                continue;
            }
            queue.push_back(parent);
        }
        seen.insert(id, commit);
    }
    Ok(seen)
}

/// Returns true if `ancestor` is reachable from `descendant` (or equal).
///
/// Commits that are not in the local store end their path of the search.
///
/// # Errors
///
/// Returns an error if a stored commit cannot be read.
pub fn is_ancestor(
    store: &ObjectStore,
    repo: RepoId,
    ancestor: &ObjectId,
    descendant: &ObjectId,
) -> CoreResult<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut queue = VecDeque::from([*descendant]);
    let mut visited = HashSet::from([*descendant]);
    while let Some(id) = queue.pop_front() {
        let commit = match store.get_commit(repo, &id) {
            Ok(c) => c,
            Err(CoreError::ObjectNotFound { .. }) => continue,
            Err(e) => return Err(e),
        };
        for parent in commit.parents() {
            if parent == *ancestor {
                return Ok(true);
            }
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// Loads commits from the local store for the sending side of a transfer.
///
/// # Errors
///
/// Returns [`CoreError::ObjectNotFound`] for an absent commit.
pub fn load_local(
    store: &ObjectStore,
    repo: RepoId,
    ids: &[ObjectId],
) -> CoreResult<Vec<LoadedCommit>> {
    ids.iter()
        .map(|id| {
            Ok(LoadedCommit {
                id: *id,
                commit: store.get_commit(repo, id)?,
                shallow: store.is_shallow(repo, id)?,
            })
        })
        .collect()
}
