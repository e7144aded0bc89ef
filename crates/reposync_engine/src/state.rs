//! Orchestrator state, statistics and reports.

use reposync_core::{ObjectId, RepoId};
use reposync_protocol::Negotiated;
use std::fmt;
use std::time::{Duration, Instant};

/// Where the orchestrator is in a sync.
///
/// A sync moves through `Negotiating`, `Commits`, `Fs`, `Blocks` and
/// `Committing` in that order and ends in `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncState {
    /// No sync has run yet.
    Idle,
    /// Check-Tx in flight.
    Negotiating,
    /// Transferring commits.
    Commits,
    /// Transferring fs-objects.
    Fs,
    /// Transferring blocks.
    Blocks,
    /// Moving the branch head.
    Committing,
    /// The last sync completed.
    Done,
    /// The last sync failed.
    Failed,
    /// Waiting before a retry.
    RetryWait,
}

impl SyncState {
    /// Returns true while a sync is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Negotiating
                | SyncState::Commits
                | SyncState::Fs
                | SyncState::Blocks
                | SyncState::Committing
        )
    }

    /// Returns true if a new sync may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Done | SyncState::Failed | SyncState::RetryWait
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Negotiating => "negotiating",
            SyncState::Commits => "commits",
            SyncState::Fs => "fs",
            SyncState::Blocks => "blocks",
            SyncState::Committing => "committing",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
            SyncState::RetryWait => "retry-wait",
        };
        f.write_str(name)
    }
}

/// Which way a sync moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local branch to the server.
    Upload,
    /// Server branch to the local depot.
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Outcome of one completed sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Direction of the sync.
    pub direction: Direction,
    /// The repo.
    pub repo: RepoId,
    /// The branch.
    pub branch: String,
    /// Versions used by the session.
    pub negotiated: Option<Negotiated>,
    /// Head the branch points at afterwards.
    pub head: Option<ObjectId>,
    /// Both sides already agreed; nothing moved.
    pub up_to_date: bool,
    /// Commits transferred.
    pub commits: u64,
    /// Commits recorded as shallow boundaries.
    pub shallow: u64,
    /// Fs-objects transferred.
    pub fs_objects: u64,
    /// Blocks transferred.
    pub blocks: u64,
    /// Block payload bytes transferred.
    pub block_bytes: u64,
    /// Wall time of the sync.
    pub duration: Duration,
}

impl SyncReport {
    pub(crate) fn new(direction: Direction, repo: RepoId, branch: &str) -> Self {
        Self {
            direction,
            repo,
            branch: branch.to_string(),
            negotiated: None,
            head: None,
            up_to_date: false,
            commits: 0,
            shallow: 0,
            fs_objects: 0,
            blocks: 0,
            block_bytes: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Counters over the orchestrator's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Syncs completed.
    pub syncs_completed: u64,
    /// Syncs failed, retries included.
    pub syncs_failed: u64,
    /// Commits uploaded.
    pub commits_sent: u64,
    /// Commits downloaded.
    pub commits_received: u64,
    /// Fs-objects moved in either direction.
    pub fs_objects: u64,
    /// Blocks moved in either direction.
    pub blocks: u64,
    /// Block bytes moved in either direction.
    pub block_bytes: u64,
    /// Retries performed.
    pub retries: u64,
    /// When the last sync completed.
    pub last_sync_time: Option<Instant>,
    /// The last error.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record(&mut self, report: &SyncReport) {
        self.syncs_completed += 1;
        match report.direction {
            Direction::Upload => self.commits_sent += report.commits,
            Direction::Download => self.commits_received += report.commits,
        }
        self.fs_objects += report.fs_objects;
        self.blocks += report.blocks;
        self.block_bytes += report.block_bytes;
        self.last_sync_time = Some(Instant::now());
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_order_like_the_session() {
        assert!(SyncState::Negotiating < SyncState::Commits);
        assert!(SyncState::Commits < SyncState::Fs);
        assert!(SyncState::Fs < SyncState::Blocks);
        assert!(SyncState::Blocks < SyncState::Committing);
        assert!(SyncState::Committing < SyncState::Done);
    }

    #[test]
    fn start_rules() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Failed.can_start_sync());
        assert!(!SyncState::Blocks.can_start_sync());
        assert!(SyncState::Blocks.is_active());
        assert!(!SyncState::Done.is_active());
    }

    #[test]
    fn stats_accumulate_reports() {
        let mut stats = SyncStats::default();
        let mut report = SyncReport::new(Direction::Upload, RepoId::new(), "master");
        report.commits = 2;
        report.blocks = 3;
        stats.record(&report);
        report.direction = Direction::Download;
        stats.record(&report);
        assert_eq!(stats.syncs_completed, 2);
        assert_eq!(stats.commits_sent, 2);
        assert_eq!(stats.commits_received, 2);
        assert_eq!(stats.blocks, 6);
        assert!(stats.last_sync_time.is_some());
    }
}
