//! Test fixtures: depots and repositories built from file maps.

use reposync_core::tree;
use reposync_core::{
    BlockRef, CommitBuilder, Depot, DirEntry, Dir, FileManifest, FsObject, ObjectId, RepoId,
};
use reposync_storage::FileBackend;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Default block size used when splitting file content.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// File contents keyed by `/`-separated path.
pub type Files = BTreeMap<String, Vec<u8>>;

/// Builds a [`Files`] map from `(path, content)` pairs.
pub fn files(entries: &[(&str, &[u8])]) -> Files {
    entries
        .iter()
        .map(|(path, content)| ((*path).to_string(), content.to_vec()))
        .collect()
}

/// A depot for tests, file-backed ones cleaned up on drop.
pub struct TestDepot {
    depot: Arc<Depot>,
    temp_dir: Option<TempDir>,
}

impl TestDepot {
    /// Creates an in-memory depot.
    pub fn memory() -> Self {
        Self {
            depot: Arc::new(Depot::in_memory()),
            temp_dir: None,
        }
    }

    /// Creates a depot over a file backend in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let depot = open_file_depot(temp_dir.path());
        Self {
            depot: Arc::new(depot),
            temp_dir: Some(temp_dir),
        }
    }

    /// Opens a second depot over the same directory, as after a restart.
    ///
    /// Returns `None` for an in-memory depot.
    pub fn reopen(&self) -> Option<Depot> {
        self.temp_dir.as_ref().map(|dir| open_file_depot(dir.path()))
    }

    /// The backing directory, if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// A shared handle to the depot.
    pub fn arc(&self) -> Arc<Depot> {
        self.depot.clone()
    }
}

impl std::ops::Deref for TestDepot {
    type Target = Depot;

    fn deref(&self) -> &Self::Target {
        &self.depot
    }
}

fn open_file_depot(path: &Path) -> Depot {
    let backend = FileBackend::open(path).expect("Failed to open file backend");
    Depot::open(Arc::new(backend)).expect("Failed to open depot")
}

/// Builds trees and commits inside one repo of a depot.
///
/// # Example
///
/// ```rust,ignore
/// let depot = TestDepot::memory();
/// let mut repo = RepoBuilder::create(&depot);
/// let c1 = repo.commit("master", &files(&[("a.txt", b"hello")]));
/// ```
pub struct RepoBuilder<'a> {
    depot: &'a Depot,
    repo: RepoId,
    block_size: usize,
    version: Option<u32>,
    counter: i64,
}

impl<'a> RepoBuilder<'a> {
    /// Creates a fresh repo in `depot`.
    pub fn create(depot: &'a Depot) -> Self {
        let repo = RepoId::new();
        depot.create_repo(repo, false).expect("Failed to create repo");
        Self::open(depot, repo)
    }

    /// Works on an existing repo, creating it if `depot` lacks it.
    pub fn open(depot: &'a Depot, repo: RepoId) -> Self {
        if !depot.repos().contains(repo) {
            depot.create_repo(repo, false).expect("Failed to create repo");
        }
        Self {
            depot,
            repo,
            block_size: DEFAULT_BLOCK_SIZE,
            version: None,
            counter: 0,
        }
    }

    /// Sets the size files are split into blocks at.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size.max(1);
        self
    }

    /// Sets the format version of built commits; `0` makes them
    /// representable under every commit protocol.
    pub fn with_commit_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// The repo id.
    pub fn repo(&self) -> RepoId {
        self.repo
    }

    /// Current head of `branch`.
    pub fn head(&self, branch: &str) -> Option<ObjectId> {
        self.depot.branches().get(self.repo, branch).and_then(|b| b.head)
    }

    /// Stores a file and its blocks; returns the file's id.
    pub fn file(&self, content: &[u8]) -> ObjectId {
        let objects = self.depot.objects();
        let blocks = content
            .chunks(self.block_size)
            .map(|chunk| BlockRef {
                id: objects
                    .put_block(self.repo, chunk)
                    .expect("Failed to store block"),
                size: u32::try_from(chunk.len()).expect("block too large"),
            })
            .collect();
        objects
            .put_fs(self.repo, &FsObject::File(FileManifest::new(blocks)))
            .expect("Failed to store file")
    }

    /// Stores the tree for `files`; returns the root id.
    pub fn tree(&self, files: &Files) -> ObjectId {
        let paths: Vec<(Vec<&str>, &[u8])> = files
            .iter()
            .map(|(path, content)| (path.split('/').collect(), content.as_slice()))
            .collect();
        self.dir(&paths)
    }

    fn dir(&self, files: &[(Vec<&str>, &[u8])]) -> ObjectId {
        let mut subdirs: BTreeMap<&str, Vec<(Vec<&str>, &[u8])>> = BTreeMap::new();
        let mut entries = Vec::new();
        for (path, content) in files {
            match path.as_slice() {
                [name] => entries.push(DirEntry::file(*name, self.file(content))),
                [dir, rest @ ..] => subdirs
                    .entry(*dir)
                    .or_default()
                    .push((rest.to_vec(), *content)),
                [] => {}
            }
        }
        for (name, sub) in subdirs {
            entries.push(DirEntry::dir(name, self.dir(&sub)));
        }
        let dir = Dir::new(entries).expect("Invalid directory");
        self.depot
            .objects()
            .put_fs(self.repo, &FsObject::Dir(dir))
            .expect("Failed to store directory")
    }

    /// Stores a commit of `root` with the given parents without moving any
    /// branch; returns its id.
    pub fn commit_root(&mut self, root: ObjectId, parents: &[ObjectId]) -> ObjectId {
        self.counter += 1;
        let mut builder = CommitBuilder::new(self.repo, root)
            .author("tester@example.com")
            .description(format!("commit {}", self.counter))
            .ctime(1_700_000_000 + self.counter);
        if let Some(first) = parents.first() {
            builder = builder.parent(*first);
        }
        if let Some(second) = parents.get(1) {
            builder = builder.second_parent(*second);
        }
        if let Some(version) = self.version {
            builder = builder.version(version);
        }
        self.depot
            .objects()
            .put_commit(&builder.build())
            .expect("Failed to store commit")
    }

    /// Commits `files` on top of `branch` and moves the branch; returns the
    /// new head. The branch is created if missing.
    pub fn commit(&mut self, branch: &str, files: &Files) -> ObjectId {
        let root = self.tree(files);
        let parent = self.head(branch);
        let id = self.commit_root(root, parent.as_slice());
        self.set_head(branch, id);
        id
    }

    /// Points `branch` at `head`, forcing if needed.
    pub fn set_head(&self, branch: &str, head: ObjectId) {
        match self.depot.branches().get(self.repo, branch) {
            Some(current) => self
                .depot
                .update_branch(self.repo, branch, current.head, head, true)
                .expect("Failed to move branch"),
            None => self
                .depot
                .create_branch(self.repo, branch, Some(head))
                .expect("Failed to create branch"),
        }
    }
}

/// Asserts that `head` and its whole tree are stored in `depot`.
pub fn assert_complete(depot: &Depot, repo: RepoId, head: &ObjectId) {
    let commit = depot
        .objects()
        .get_commit(repo, head)
        .expect("head commit missing");
    tree::check_complete(depot.objects(), repo, &commit.root_id, None)
        .expect("head tree incomplete");
}

/// Fs-objects and blocks reachable from the tree of `commit`.
pub fn tree_objects(depot: &Depot, repo: RepoId, commit: &ObjectId) -> (HashSet<ObjectId>, HashSet<ObjectId>) {
    let root = depot
        .objects()
        .get_commit(repo, commit)
        .expect("commit missing")
        .root_id;
    let mut fs = HashSet::new();
    let mut blocks = HashSet::new();
    tree::reachable(depot.objects(), repo, &root, &mut fs, &mut blocks).expect("tree incomplete");
    (fs, blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::ObjectKind;

    #[test]
    fn builds_nested_trees() {
        let depot = TestDepot::memory();
        let mut repo = RepoBuilder::create(&depot).with_block_size(4);
        let head = repo.commit(
            "master",
            &files(&[("a.txt", b"hello world"), ("dir/b.txt", b"bee"), ("dir/sub/c", b"")]),
        );

        assert_eq!(repo.head("master"), Some(head));
        assert_complete(&depot, repo.repo(), &head);
        let (fs, blocks) = tree_objects(&depot, repo.repo(), &head);
        // root, a.txt, dir, b.txt, sub, c
        assert_eq!(fs.len(), 6);
        // "hell" "o wo" "rld" "bee"
        assert_eq!(blocks.len(), 4);
    }

    #[test]
    fn commits_chain_on_the_branch() {
        let depot = TestDepot::memory();
        let mut repo = RepoBuilder::create(&depot);
        let c1 = repo.commit("master", &files(&[("a", b"1")]));
        let c2 = repo.commit("master", &files(&[("a", b"2")]));
        let commit = depot.objects().get_commit(repo.repo(), &c2).unwrap();
        assert_eq!(commit.parent_id, Some(c1));
    }

    #[test]
    fn same_content_shares_objects() {
        let depot = TestDepot::memory();
        let repo = RepoBuilder::create(&depot);
        let a = repo.tree(&files(&[("x", b"same"), ("y", b"other")]));
        let b = repo.tree(&files(&[("x", b"same"), ("y", b"other")]));
        assert_eq!(a, b);
        assert_eq!(repo.tree(&Files::new()), ObjectId::ZERO);
    }

    #[test]
    fn file_depot_survives_reopen() {
        let depot = TestDepot::file();
        let mut repo = RepoBuilder::create(&depot);
        let head = repo.commit("master", &files(&[("a", b"persisted")]));
        let repo_id = repo.repo();

        let reopened = depot.reopen().unwrap();
        assert_eq!(reopened.branches().head(repo_id, "master").unwrap(), Some(head));
        assert!(reopened
            .objects()
            .has(ObjectKind::Commit, repo_id, &head)
            .unwrap());
        assert!(depot.path().is_some());
    }
}
