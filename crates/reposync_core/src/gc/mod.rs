//! Mark-and-sweep garbage collection.
//!
//! A pass takes an epoch from the store clock before it marks anything. The
//! sweep only removes objects whose write stamp is below that epoch, so an
//! object written (or deduplicated, or confirmed present to a peer) after the
//! pass began always survives, reachable or not.
//!
//! Head updates that land while a pass is running are published to it
//! through the barrier and marked before the next sweep batch deletes
//! anything.
//!
//! ```rust
//! use reposync_core::gc::{Collector, GcConfig, GcScope};
//! use reposync_core::{Depot, RepoId};
//!
//! let depot = Depot::in_memory();
//! let repo = RepoId::new();
//! depot.create_repo(repo, false).unwrap();
//! depot.objects().put_block(repo, b"orphan").unwrap();
//!
//! let report = Collector::new(&depot, GcConfig::default())
//!     .run(GcScope::Repo(repo))
//!     .unwrap();
//! assert_eq!(report.removed_blocks, 1);
//! ```

mod barrier;
mod progress;

pub(crate) use barrier::GcBarrier;
pub use progress::{GcHandle, GcPhase, GcProgress};

use crate::dag;
use crate::depot::Depot;
use crate::error::CoreResult;
use crate::id::{ObjectId, RepoId};
use crate::object::ObjectKind;
use crate::store::StoredObject;
use crate::tree;
use barrier::PassToken;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What a pass may remove.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcMode {
    /// Only unreachable blocks.
    #[default]
    BlocksOnly,
    /// Unreachable blocks, fs-objects and commits.
    Full,
}

impl GcMode {
    fn kinds(self) -> &'static [ObjectKind] {
        match self {
            GcMode::BlocksOnly => &[ObjectKind::Block],
            GcMode::Full => &ObjectKind::ALL,
        }
    }
}

/// Which repos a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcScope {
    /// A single repo.
    Repo(RepoId),
    /// Every repo, plus objects of repos that no longer exist.
    All,
}

impl GcScope {
    pub(crate) fn covers(&self, repo: RepoId) -> bool {
        match self {
            GcScope::Repo(r) => *r == repo,
            GcScope::All => true,
        }
    }

    pub(crate) fn overlaps(&self, other: &GcScope) -> bool {
        match (self, other) {
            (GcScope::Repo(a), GcScope::Repo(b)) => a == b,
            _ => true,
        }
    }

    fn repo(&self) -> Option<RepoId> {
        match self {
            GcScope::Repo(r) => Some(*r),
            GcScope::All => None,
        }
    }
}

/// Collector settings.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// What to remove.
    pub mode: GcMode,
    /// Objects examined per barrier-held sweep batch.
    pub batch_size: usize,
    /// Count what would be removed without removing it.
    pub dry_run: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            mode: GcMode::BlocksOnly,
            batch_size: 256,
            dry_run: false,
        }
    }
}

impl GcConfig {
    /// Sets the mode.
    #[must_use]
    pub fn with_mode(mut self, mode: GcMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the sweep batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enables or disables dry-run.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Position of the last object an aborted sweep examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCheckpoint {
    /// Kind being swept.
    pub kind: ObjectKind,
    /// Repo of the last examined object.
    pub repo: RepoId,
    /// Id of the last examined object.
    pub id: ObjectId,
}

impl SweepCheckpoint {
    fn position(&self) -> (usize, RepoId, ObjectId) {
        (kind_rank(self.kind), self.repo, self.id)
    }
}

/// Outcome of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Scope swept.
    pub scope: GcScope,
    /// Mode used.
    pub mode: GcMode,
    /// Mark epoch.
    pub epoch: u64,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Objects examined.
    pub scanned: u64,
    /// Blocks removed.
    pub removed_blocks: u64,
    /// Fs-objects removed.
    pub removed_fs: u64,
    /// Commits removed.
    pub removed_commits: u64,
    /// Bytes freed by the removals.
    pub reclaimed_bytes: u64,
    /// Objects kept because they were newer than the epoch.
    pub kept_young: u64,
    /// Whether the pass stopped on request.
    pub aborted: bool,
    /// Where a later pass may resume, if aborted.
    pub checkpoint: Option<SweepCheckpoint>,
}

impl GcReport {
    fn new(scope: GcScope, mode: GcMode, epoch: u64, dry_run: bool) -> Self {
        Self {
            scope,
            mode,
            epoch,
            dry_run,
            scanned: 0,
            removed_blocks: 0,
            removed_fs: 0,
            removed_commits: 0,
            reclaimed_bytes: 0,
            kept_young: 0,
            aborted: false,
            checkpoint: None,
        }
    }

    /// Total objects removed.
    pub fn removed(&self) -> u64 {
        self.removed_blocks + self.removed_fs + self.removed_commits
    }

    fn count_removed(&mut self, kind: ObjectKind, len: u64) {
        match kind {
            ObjectKind::Block => self.removed_blocks += 1,
            ObjectKind::Fs => self.removed_fs += 1,
            ObjectKind::Commit => self.removed_commits += 1,
        }
        self.reclaimed_bytes += len;
    }
}

#[derive(Debug, Default)]
struct Marks {
    commits: HashSet<ObjectId>,
    fs: HashSet<ObjectId>,
    blocks: HashSet<ObjectId>,
}

impl Marks {
    fn contains(&self, kind: ObjectKind, id: &ObjectId) -> bool {
        match kind {
            ObjectKind::Block => self.blocks.contains(id),
            ObjectKind::Fs => self.fs.contains(id),
            ObjectKind::Commit => self.commits.contains(id),
        }
    }
}

/// Runs collection passes over a [`Depot`].
#[derive(Debug)]
pub struct Collector<'a> {
    depot: &'a Depot,
    config: GcConfig,
    handle: GcHandle,
}

impl<'a> Collector<'a> {
    /// Creates a collector.
    pub fn new(depot: &'a Depot, config: GcConfig) -> Self {
        Self {
            depot,
            config,
            handle: GcHandle::default(),
        }
    }

    /// Returns a handle for progress queries and abort.
    pub fn handle(&self) -> GcHandle {
        self.handle.clone()
    }

    /// Runs a full pass: begin, mark, sweep.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GcBusy`](crate::CoreError::GcBusy) if an
    /// overlapping pass is running, or any error that stopped mark or sweep.
    pub fn run(&self, scope: GcScope) -> CoreResult<GcReport> {
        let mut pass = self.begin(scope)?;
        pass.mark()?;
        pass.sweep()
    }

    /// Runs a pass whose sweep starts after `checkpoint`.
    ///
    /// # Errors
    ///
    /// Same as [`Collector::run`].
    pub fn resume(&self, scope: GcScope, checkpoint: SweepCheckpoint) -> CoreResult<GcReport> {
        let mut pass = self.begin(scope)?;
        pass.resume_after = Some(checkpoint);
        pass.mark()?;
        pass.sweep()
    }

    /// Registers a pass and takes its epoch.
    ///
    /// The pass registers with the barrier before the epoch is taken, so no
    /// head update can fall between the two unseen.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GcBusy`](crate::CoreError::GcBusy) if an
    /// overlapping pass is running.
    pub fn begin(&self, scope: GcScope) -> CoreResult<GcPass<'_, 'a>> {
        let token = self.depot.barrier().register(scope)?;
        let epoch = self.depot.clock().tick();
        self.handle.reset();
        tracing::info!(?scope, epoch, mode = ?self.config.mode, dry_run = self.config.dry_run, "gc pass started");
        Ok(GcPass {
            collector: self,
            token,
            scope,
            epoch,
            marks: HashMap::new(),
            resume_after: None,
        })
    }
}

/// One registered collection pass.
///
/// Dropping the pass unregisters it from the barrier.
#[derive(Debug)]
pub struct GcPass<'c, 'a> {
    collector: &'c Collector<'a>,
    token: PassToken,
    scope: GcScope,
    epoch: u64,
    marks: HashMap<RepoId, Marks>,
    resume_after: Option<SweepCheckpoint>,
}

impl GcPass<'_, '_> {
    /// The mark epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Marks everything reachable from the branch heads in scope.
    ///
    /// # Errors
    ///
    /// Returns an error if a repo in scope does not exist or a reachable
    /// commit or fs-object cannot be read. The pass is then failed and
    /// nothing is removed.
    pub fn mark(&mut self) -> CoreResult<()> {
        let collector = self.collector;
        let handle = &collector.handle;
        handle.set_phase(GcPhase::Marking);
        let result = self.mark_all();
        if let Err(e) = &result {
            handle.set_phase(GcPhase::Failed);
            tracing::error!(scope = ?self.scope, error = %e, "gc mark failed");
        }
        result
    }

    fn mark_all(&mut self) -> CoreResult<()> {
        let depot = self.collector.depot;
        let repos: Vec<RepoId> = match self.scope {
            GcScope::Repo(r) => vec![depot.repos().get(r)?.id],
            GcScope::All => depot.repos().list().into_iter().map(|r| r.id).collect(),
        };
        for repo in repos {
            self.marks.entry(repo).or_default();
            for branch in depot.branches().list(repo) {
                if let Some(head) = branch.head {
                    self.mark_head(repo, &head)?;
                }
            }
            let marks = &self.marks[&repo];
            tracing::debug!(
                %repo,
                commits = marks.commits.len(),
                fs = marks.fs.len(),
                blocks = marks.blocks.len(),
                "marked repo"
            );
        }
        Ok(())
    }

    fn mark_head(&mut self, repo: RepoId, head: &ObjectId) -> CoreResult<()> {
        let depot = self.collector.depot;
        let store = depot.objects();
        let marks = self.marks.entry(repo).or_default();
        if marks.commits.contains(head) {
            return Ok(());
        }
        for (id, commit) in dag::ancestors(store, repo, head)? {
            if marks.commits.insert(id) {
                tree::reachable(store, repo, &commit.root_id, &mut marks.fs, &mut marks.blocks)?;
            }
        }
        Ok(())
    }

    /// Removes unreachable objects older than the epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; objects removed before the
    /// failure stay removed, which is always a subset of the correct result.
    pub fn sweep(mut self) -> CoreResult<GcReport> {
        let handle = self.collector.handle.clone();
        handle.set_phase(GcPhase::Sweeping);
        match self.sweep_all(&handle) {
            Ok(report) => {
                let phase = if report.aborted {
                    GcPhase::Aborted
                } else {
                    GcPhase::Done
                };
                handle.set_phase(phase);
                tracing::info!(
                    scope = ?report.scope,
                    scanned = report.scanned,
                    removed = report.removed(),
                    reclaimed_bytes = report.reclaimed_bytes,
                    kept_young = report.kept_young,
                    aborted = report.aborted,
                    "gc pass finished"
                );
                Ok(report)
            }
            Err(e) => {
                handle.set_phase(GcPhase::Failed);
                tracing::error!(scope = ?self.scope, error = %e, "gc sweep failed");
                Err(e)
            }
        }
    }

    fn sweep_all(&mut self, handle: &GcHandle) -> CoreResult<GcReport> {
        let collector = self.collector;
        let depot = collector.depot;
        let config = &collector.config;
        let mut report = GcReport::new(self.scope, config.mode, self.epoch, config.dry_run);

        let mut candidates: Vec<(ObjectKind, StoredObject)> = Vec::new();
        for kind in config.mode.kinds() {
            for obj in depot.objects().list(*kind, self.scope.repo())? {
                candidates.push((*kind, obj));
            }
        }
        candidates.sort_by_key(|(kind, obj)| (kind_rank(*kind), obj.repo, obj.id));
        if let Some(after) = self.resume_after {
            let start = after.position();
            candidates.retain(|(kind, obj)| (kind_rank(*kind), obj.repo, obj.id) > start);
        }
        handle.set_total(candidates.len() as u64);

        for batch in candidates.chunks(config.batch_size.max(1)) {
            let _fence = depot.barrier().sweep_guard();
            for (repo, head) in depot.barrier().drain(&self.token) {
                tracing::debug!(%repo, head = %head.short(), "marking head published mid-pass");
                self.mark_head(repo, &head)?;
            }

            let mut removed_in_batch = 0u64;
            for (kind, obj) in batch {
                if handle.abort_requested() {
                    report.aborted = true;
                    break;
                }
                report.scanned += 1;
                handle.add_processed(1);
                report.checkpoint = Some(SweepCheckpoint {
                    kind: *kind,
                    repo: obj.repo,
                    id: obj.id,
                });

                if obj.stamp >= self.epoch {
                    report.kept_young += 1;
                    continue;
                }
                let orphaned = !depot.repos().contains(obj.repo);
                let reachable = self
                    .marks
                    .get(&obj.repo)
                    .is_some_and(|m| m.contains(*kind, &obj.id));
                if reachable && !orphaned {
                    continue;
                }

                let removed = if config.dry_run {
                    true
                } else {
                    depot
                        .objects()
                        .remove_if_older(*kind, obj.repo, &obj.id, self.epoch)?
                };
                if removed {
                    if *kind == ObjectKind::Commit && !config.dry_run {
                        depot.objects().unmark_shallow(obj.repo, &obj.id)?;
                    }
                    report.count_removed(*kind, obj.len);
                    removed_in_batch += 1;
                } else {
                    report.kept_young += 1;
                }
            }
            handle.add_removed(removed_in_batch);
            tracing::debug!(batch = batch.len(), removed = removed_in_batch, "gc sweep batch");
            if report.aborted {
                break;
            }
        }

        if !report.aborted {
            report.checkpoint = None;
            if !config.dry_run {
                depot.objects().sync()?;
            }
        }
        Ok(report)
    }
}

impl Drop for GcPass<'_, '_> {
    fn drop(&mut self) {
        self.collector.depot.barrier().unregister(&self.token);
    }
}

fn kind_rank(kind: ObjectKind) -> usize {
    ObjectKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(ObjectKind::ALL.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{BlockRef, CommitBuilder, Dir, DirEntry, FileManifest, FsObject};
    use crate::{CoreError, DEFAULT_BRANCH};

    struct Fixture {
        depot: Depot,
        repo: RepoId,
        blocks: Vec<ObjectId>,
        fs: Vec<ObjectId>,
        commits: Vec<ObjectId>,
    }

    /// Builds C1 <- C2 on master, each with its own one-file tree.
    fn two_commit_repo() -> Fixture {
        let depot = Depot::in_memory();
        let repo = RepoId::new();
        depot.create_repo(repo, false).unwrap();
        let store = depot.objects();

        let mut blocks = Vec::new();
        let mut fs = Vec::new();
        let mut commits: Vec<ObjectId> = Vec::new();
        for (i, content) in [b"block one".as_slice(), b"block two".as_slice()].iter().enumerate() {
            let block = store.put_block(repo, content).unwrap();
            let file = store
                .put_fs(
                    repo,
                    &FsObject::File(FileManifest::new(vec![BlockRef {
                        id: block,
                        size: content.len() as u32,
                    }])),
                )
                .unwrap();
            let root = store
                .put_fs(
                    repo,
                    &FsObject::Dir(Dir::new(vec![DirEntry::file(format!("f{i}"), file)]).unwrap()),
                )
                .unwrap();
            let mut builder = CommitBuilder::new(repo, root).description(format!("c{i}"));
            if let Some(parent) = commits.last() {
                builder = builder.parent(*parent);
            }
            let commit = store.put_commit(&builder.build()).unwrap();
            depot
                .update_branch(repo, DEFAULT_BRANCH, commits.last().copied(), commit, false)
                .unwrap();
            blocks.push(block);
            fs.extend([file, root]);
            commits.push(commit);
        }
        Fixture {
            depot,
            repo,
            blocks,
            fs,
            commits,
        }
    }

    fn has(f: &Fixture, kind: ObjectKind, id: &ObjectId) -> bool {
        f.depot.objects().has(kind, f.repo, id).unwrap()
    }

    #[test]
    fn removes_exactly_the_orphan_block() {
        let f = two_commit_repo();
        let orphan = f.depot.objects().put_block(f.repo, b"orphan").unwrap();

        let report = Collector::new(&f.depot, GcConfig::default())
            .run(GcScope::Repo(f.repo))
            .unwrap();

        assert_eq!(report.removed_blocks, 1);
        assert_eq!(report.removed(), 1);
        assert!(!has(&f, ObjectKind::Block, &orphan));
        for b in &f.blocks {
            assert!(has(&f, ObjectKind::Block, b));
        }
    }

    #[test]
    fn block_written_mid_pass_survives() {
        let f = two_commit_repo();
        let collector = Collector::new(&f.depot, GcConfig::default());
        let mut pass = collector.begin(GcScope::Repo(f.repo)).unwrap();
        pass.mark().unwrap();

        let young = f.depot.objects().put_block(f.repo, b"uploaded during gc").unwrap();
        let report = pass.sweep().unwrap();

        assert!(has(&f, ObjectKind::Block, &young));
        assert_eq!(report.removed(), 0);
        assert_eq!(report.kept_young, 1);
    }

    #[test]
    fn full_mode_removes_unreachable_history() {
        let f = two_commit_repo();
        let store = f.depot.objects();
        let stray_root = store
            .put_fs(
                f.repo,
                &FsObject::Dir(Dir::new(vec![DirEntry::file("x", ObjectId::of(b"x"))]).unwrap()),
            )
            .unwrap();
        let stray = store
            .put_commit(&CommitBuilder::new(f.repo, stray_root).description("stray").build())
            .unwrap();

        let report = Collector::new(&f.depot, GcConfig::default().with_mode(GcMode::Full))
            .run(GcScope::Repo(f.repo))
            .unwrap();

        assert_eq!(report.removed_commits, 1);
        assert_eq!(report.removed_fs, 1);
        assert!(!has(&f, ObjectKind::Commit, &stray));
        for c in &f.commits {
            assert!(has(&f, ObjectKind::Commit, c));
        }
        for id in &f.fs {
            assert!(has(&f, ObjectKind::Fs, id));
        }
    }

    #[test]
    fn dry_run_removes_nothing() {
        let f = two_commit_repo();
        let orphan = f.depot.objects().put_block(f.repo, b"orphan").unwrap();
        let report = Collector::new(&f.depot, GcConfig::default().with_dry_run(true))
            .run(GcScope::Repo(f.repo))
            .unwrap();
        assert_eq!(report.removed_blocks, 1);
        assert!(has(&f, ObjectKind::Block, &orphan));
    }

    #[test]
    fn head_published_mid_pass_is_kept() {
        let f = two_commit_repo();
        let store = f.depot.objects();
        let block = store.put_block(f.repo, b"late").unwrap();
        let file = store
            .put_fs(
                f.repo,
                &FsObject::File(FileManifest::new(vec![BlockRef { id: block, size: 4 }])),
            )
            .unwrap();
        let root = store
            .put_fs(
                f.repo,
                &FsObject::Dir(Dir::new(vec![DirEntry::file("late", file)]).unwrap()),
            )
            .unwrap();
        let commit = store
            .put_commit(&CommitBuilder::new(f.repo, root).parent(f.commits[1]).build())
            .unwrap();

        // The objects above predate the epoch; only the published head keeps them.
        let collector = Collector::new(&f.depot, GcConfig::default().with_mode(GcMode::Full));
        let mut pass = collector.begin(GcScope::Repo(f.repo)).unwrap();
        pass.mark().unwrap();
        f.depot
            .update_branch(f.repo, DEFAULT_BRANCH, Some(f.commits[1]), commit, false)
            .unwrap();
        let report = pass.sweep().unwrap();

        assert_eq!(report.removed(), 0);
        assert!(has(&f, ObjectKind::Block, &block));
        assert!(has(&f, ObjectKind::Commit, &commit));
    }

    #[test]
    fn abort_reports_checkpoint_and_resume_finishes() {
        let f = two_commit_repo();
        let orphans: Vec<ObjectId> = (0..5u8)
            .map(|i| f.depot.objects().put_block(f.repo, &[b'o', i]).unwrap())
            .collect();

        let collector = Collector::new(&f.depot, GcConfig::default().with_batch_size(1));
        let handle = collector.handle();
        handle.abort();
        let mut pass = collector.begin(GcScope::Repo(f.repo)).unwrap();
        // begin() clears the flag.
        pass.mark().unwrap();
        handle.abort();
        let report = pass.sweep().unwrap();
        assert!(report.aborted);
        assert_eq!(report.removed(), 0);
        assert_eq!(handle.progress().phase, GcPhase::Aborted);
        assert!(report.checkpoint.is_none());

        let report = collector.run(GcScope::Repo(f.repo)).unwrap();
        assert!(!report.aborted);
        assert_eq!(report.removed_blocks, orphans.len() as u64);
    }

    #[test]
    fn resume_skips_examined_objects() {
        let f = two_commit_repo();
        let store = f.depot.objects();
        let mut orphans: Vec<ObjectId> = (0..4u8)
            .map(|i| store.put_block(f.repo, &[b'x', i]).unwrap())
            .collect();
        orphans.sort();

        let checkpoint = SweepCheckpoint {
            kind: ObjectKind::Block,
            repo: f.repo,
            id: orphans[1],
        };
        let report = Collector::new(&f.depot, GcConfig::default())
            .resume(GcScope::Repo(f.repo), checkpoint)
            .unwrap();

        assert!(has(&f, ObjectKind::Block, &orphans[0]));
        assert!(has(&f, ObjectKind::Block, &orphans[1]));
        assert!(!has(&f, ObjectKind::Block, &orphans[2]));
        assert!(!has(&f, ObjectKind::Block, &orphans[3]));
        assert_eq!(report.removed_blocks, 2);
    }

    #[test]
    fn mark_failure_removes_nothing() {
        let f = two_commit_repo();
        let orphan = f.depot.objects().put_block(f.repo, b"orphan").unwrap();
        // Lose a reachable fs-object behind the collector's back.
        f.depot
            .objects()
            .remove_if_older(ObjectKind::Fs, f.repo, &f.fs[0], u64::MAX)
            .unwrap();

        let collector = Collector::new(&f.depot, GcConfig::default());
        assert!(collector.run(GcScope::Repo(f.repo)).is_err());
        assert_eq!(collector.handle().progress().phase, GcPhase::Failed);
        assert!(has(&f, ObjectKind::Block, &orphan));
    }

    #[test]
    fn deleted_repo_objects_are_orphans() {
        let f = two_commit_repo();
        let other = RepoId::new();
        f.depot.create_repo(other, false).unwrap();
        let kept = f.depot.objects().put_block(other, b"unrelated").unwrap();
        f.depot.delete_repo(f.repo).unwrap();

        let report = Collector::new(&f.depot, GcConfig::default().with_mode(GcMode::Full))
            .run(GcScope::All)
            .unwrap();

        assert_eq!(report.removed_blocks, 3);
        assert_eq!(report.removed_commits, 2);
        assert!(!has(&f, ObjectKind::Block, &f.blocks[0]));
        // Unreachable in `other`, so it goes too.
        assert!(!f.depot.objects().has(ObjectKind::Block, other, &kept).unwrap());
    }

    #[test]
    fn overlapping_pass_is_busy() {
        let f = two_commit_repo();
        let collector = Collector::new(&f.depot, GcConfig::default());
        let _pass = collector.begin(GcScope::Repo(f.repo)).unwrap();
        assert!(matches!(
            Collector::new(&f.depot, GcConfig::default()).run(GcScope::All),
            Err(CoreError::GcBusy)
        ));
    }
}
