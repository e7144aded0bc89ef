//! Fs-object tree walks and path-aligned diffs.
//!
//! A diff compares a new root against a base root that the receiving side is
//! known to hold completely. Entries whose id is unchanged at the same path
//! are skipped together with their whole subtree; everything else is loaded
//! from an [`FsSource`] and reported, along with the blocks of every changed
//! file that the base file at that path did not already reference.

use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use crate::object::{FsObject, ObjectKind};
use crate::store::ObjectStore;
use std::collections::{HashMap, HashSet};

/// Where the new side of a diff is loaded from.
///
/// Uploads read from the local store; downloads fetch from the peer.
pub trait FsSource {
    /// Error type of the source.
    type Error: From<CoreError>;

    /// Loads the given fs-objects. Every requested id must be returned.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be loaded.
    fn load(&mut self, ids: &[ObjectId]) -> Result<Vec<(ObjectId, FsObject)>, Self::Error>;
}

/// Loads fs-objects from a local store.
#[derive(Debug)]
pub struct LocalSource<'a> {
    store: &'a ObjectStore,
    repo: RepoId,
}

impl<'a> LocalSource<'a> {
    /// Creates a source reading `repo` from `store`.
    pub fn new(store: &'a ObjectStore, repo: RepoId) -> Self {
        Self { store, repo }
    }
}

impl FsSource for LocalSource<'_> {
    type Error = CoreError;

    fn load(&mut self, ids: &[ObjectId]) -> CoreResult<Vec<(ObjectId, FsObject)>> {
        ids.iter()
            .map(|id| Ok((*id, self.store.get_fs(self.repo, id)?)))
            .collect()
    }
}

/// Result of a tree diff.
#[derive(Debug, Clone, Default)]
pub struct TreeDelta {
    /// Changed fs-objects, parents before children.
    pub fs: Vec<(ObjectId, FsObject)>,
    /// Blocks referenced by changed files and absent from the base.
    pub blocks: Vec<ObjectId>,
}

impl TreeDelta {
    /// Ids of the changed fs-objects.
    pub fn fs_ids(&self) -> Vec<ObjectId> {
        self.fs.iter().map(|(id, _)| *id).collect()
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.fs.is_empty() && self.blocks.is_empty()
    }
}

/// Diffs each `(new_root, base_root)` pair.
///
/// Base objects are read from `store`; a base that is not stored locally is
/// treated as absent. New objects come from `source`, one tree level per
/// call.
///
/// # Errors
///
/// Propagates errors from `source` and from local store reads.
pub fn diff<S: FsSource>(
    store: &ObjectStore,
    repo: RepoId,
    pairs: &[(ObjectId, Option<ObjectId>)],
    source: &mut S,
) -> Result<TreeDelta, S::Error> {
    let mut delta = TreeDelta::default();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut blocks_seen: HashSet<ObjectId> = HashSet::new();

    let mut level: Vec<(ObjectId, Option<ObjectId>)> = pairs
        .iter()
        .filter(|(new, base)| !new.is_zero() && Some(*new) != *base)
        .filter(|(new, _)| visited.insert(*new))
        .copied()
        .collect();

    while !level.is_empty() {
        let ids: Vec<ObjectId> = level.iter().map(|(new, _)| *new).collect();
        let loaded: HashMap<ObjectId, FsObject> = source.load(&ids)?.into_iter().collect();

        let mut next = Vec::new();
        for (new, base) in level {
            let obj = loaded
                .get(&new)
                .cloned()
                .ok_or(CoreError::ObjectNotFound {
                    kind: ObjectKind::Fs,
                    id: new,
                })?;
            let base_obj = match base {
                Some(b) => load_base(store, repo, &b)?,
                None => None,
            };

            match (&obj, &base_obj) {
                (FsObject::Dir(dir), base_obj) => {
                    let base_dir = match base_obj {
                        Some(FsObject::Dir(d)) => Some(d),
                        _ => None,
                    };
                    for entry in dir.entries() {
                        if entry.id.is_zero() {
                            continue;
                        }
                        let base_id = base_dir
                            .and_then(|d| d.get(&entry.name))
                            .filter(|b| b.kind == entry.kind)
                            .map(|b| b.id);
                        if base_id == Some(entry.id) || !visited.insert(entry.id) {
                            continue;
                        }
                        next.push((entry.id, base_id));
                    }
                }
                (FsObject::File(file), base_obj) => {
                    let base_blocks: HashSet<ObjectId> = match base_obj {
                        Some(FsObject::File(f)) => f.blocks.iter().map(|b| b.id).collect(),
                        _ => HashSet::new(),
                    };
                    for block in &file.blocks {
                        if !base_blocks.contains(&block.id) && blocks_seen.insert(block.id) {
                            delta.blocks.push(block.id);
                        }
                    }
                }
            }
            delta.fs.push((new, obj));
        }
        level = next;
    }
    Ok(delta)
}

fn load_base(store: &ObjectStore, repo: RepoId, id: &ObjectId) -> CoreResult<Option<FsObject>> {
    match store.get_fs(repo, id) {
        Ok(obj) => Ok(Some(obj)),
        Err(CoreError::ObjectNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks that the tree under `root` is fully stored.
///
/// `base` names a root already known to be complete; subtrees it shares with
/// `root` at the same path are not re-checked.
///
/// # Errors
///
/// Returns [`CoreError::DanglingReference`] naming the first absent
/// fs-object or block.
pub fn check_complete(
    store: &ObjectStore,
    repo: RepoId,
    root: &ObjectId,
    base: Option<ObjectId>,
) -> CoreResult<()> {
    let dangling = |missing_kind, missing| CoreError::DanglingReference {
        kind: ObjectKind::Fs,
        id: *root,
        missing_kind,
        missing,
    };
    let delta = match diff(store, repo, &[(*root, base)], &mut LocalSource::new(store, repo)) {
        Ok(delta) => delta,
        Err(CoreError::ObjectNotFound { kind, id }) => return Err(dangling(kind, id)),
        Err(e) => return Err(e),
    };
    for block in &delta.blocks {
        if !store.has(ObjectKind::Block, repo, block)? {
            return Err(dangling(ObjectKind::Block, *block));
        }
    }
    Ok(())
}

/// Adds every fs-object and block reachable from `root` to the given sets.
///
/// Subtrees whose root is already in `fs` are skipped.
///
/// # Errors
///
/// Returns [`CoreError::ObjectNotFound`] if a reachable fs-object is absent.
pub fn reachable(
    store: &ObjectStore,
    repo: RepoId,
    root: &ObjectId,
    fs: &mut HashSet<ObjectId>,
    blocks: &mut HashSet<ObjectId>,
) -> CoreResult<()> {
    if root.is_zero() || !fs.insert(*root) {
        return Ok(());
    }
    let mut stack = vec![*root];
    while let Some(id) = stack.pop() {
        let obj = store.get_fs(repo, &id)?;
        blocks.extend(obj.block_ids());
        stack.extend(obj.child_ids().filter(|child| fs.insert(*child)));
    }
    Ok(())
}
