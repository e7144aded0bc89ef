//! The sync orchestrator.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::{Direction, SyncReport, SyncState, SyncStats};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use reposync_core::dag::CommitFrontier;
use reposync_core::{Commit, CoreError, Depot, ObjectId, ObjectStore, RepoId};
use reposync_protocol::{
    CheckTxRequest, CheckTxV2Request, Negotiated, SessionId, SyncMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One server session as seen by the orchestrator.
#[derive(Debug, Clone)]
pub(crate) struct Session<'a> {
    pub(crate) id: SessionId,
    pub(crate) repo: RepoId,
    pub(crate) branch: &'a str,
    pub(crate) negotiated: Negotiated,
    /// Server head when the session opened.
    pub(crate) remote_head: Option<ObjectId>,
}

/// Drives full sync transactions between a local [`Depot`] and a server.
///
/// Each sync opens one server session and runs it through commits,
/// fs-objects, blocks and the head update, in that order. A failed sync
/// leaves whatever objects it already wrote in place; nothing is rolled back
/// and no branch moves.
pub struct Orchestrator<T: SyncTransport> {
    pub(crate) config: SyncConfig,
    pub(crate) depot: Arc<Depot>,
    transport: T,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    /// Ranged downloads cut short, kept for the next attempt.
    pub(crate) partial_blocks: Mutex<HashMap<(RepoId, ObjectId), Vec<u8>>>,
}

impl<T: SyncTransport> Orchestrator<T> {
    /// Creates an orchestrator syncing `depot` through `transport`.
    pub fn new(config: SyncConfig, depot: Arc<Depot>, transport: T) -> Self {
        Self {
            config,
            depot,
            transport,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            partial_blocks: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local depot.
    pub fn depot(&self) -> &Arc<Depot> {
        &self.depot
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the running sync at its next request.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Uploads the local `branch` of `repo` to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StaleHead`] if the server branch moved during
    /// the sync (retryable), [`SyncError::NonFastForward`] for divergent
    /// history without force, and [`SyncError::Remote`] for any failure the
    /// server reports.
    pub fn upload(&self, repo: RepoId, branch: &str) -> SyncResult<SyncReport> {
        self.run(Direction::Upload, repo, branch)
    }

    /// Downloads the server's `branch` of `repo` into the local depot.
    ///
    /// The repo must exist locally; the branch is created if missing.
    ///
    /// # Errors
    ///
    /// As for [`Orchestrator::upload`], with the head update applied to the
    /// local branch.
    pub fn download(&self, repo: RepoId, branch: &str) -> SyncResult<SyncReport> {
        self.run(Direction::Download, repo, branch)
    }

    /// Uploads, retrying transient failures per the retry configuration.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once
    /// attempts run out.
    pub fn upload_with_retry(&self, repo: RepoId, branch: &str) -> SyncResult<SyncReport> {
        self.with_retry(|| self.upload(repo, branch))
    }

    /// Downloads, retrying transient failures per the retry configuration.
    ///
    /// # Errors
    ///
    /// As for [`Orchestrator::upload_with_retry`].
    pub fn download_with_retry(&self, repo: RepoId, branch: &str) -> SyncResult<SyncReport> {
        self.with_retry(|| self.download(repo, branch))
    }

    fn with_retry(&self, mut attempt_sync: impl FnMut() -> SyncResult<SyncReport>) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            match attempt_sync() {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    tracing::info!(attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run(&self, direction: Direction, repo: RepoId, branch: &str) -> SyncResult<SyncReport> {
        let start = Instant::now();
        {
            let mut state = self.state.write();
            if !state.can_start_sync() {
                return Err(SyncError::InvalidStateTransition {
                    from: state.to_string(),
                    to: direction.to_string(),
                });
            }
            *state = SyncState::Negotiating;
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let mut report = SyncReport::new(direction, repo, branch);
        let result = match direction {
            Direction::Upload => self.upload_once(repo, branch, &mut report),
            Direction::Download => self.download_once(repo, branch, &mut report),
        };
        report.duration = start.elapsed();

        match result {
            Ok(()) => {
                self.set_state(SyncState::Done);
                self.stats.write().record(&report);
                tracing::info!(
                    %direction,
                    %repo,
                    branch,
                    head = ?report.head.map(|h| h.short()),
                    up_to_date = report.up_to_date,
                    commits = report.commits,
                    fs_objects = report.fs_objects,
                    blocks = report.blocks,
                    bytes = report.block_bytes,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(SyncState::Failed);
                {
                    let mut stats = self.stats.write();
                    stats.syncs_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                tracing::warn!(%direction, %repo, branch, kind = %e.kind(), error = %e, "sync failed");
                Err(e)
            }
        }
    }

    pub(crate) fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sends a request. An error response becomes [`SyncError::Remote`].
    pub(crate) fn call(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        self.check_cancelled()?;
        let name = request.name();
        match self.transport.round_trip(request)? {
            SyncMessage::Error { kind, message } => Err(SyncError::Remote {
                request: name,
                kind,
                message,
            }),
            response => Ok(response),
        }
    }

    /// Sends an id query in batches and collects the ids the server lacks.
    pub(crate) fn query(
        &self,
        ids: &[ObjectId],
        make: impl Fn(Vec<ObjectId>) -> SyncMessage,
    ) -> SyncResult<Vec<ObjectId>> {
        let mut missing = Vec::new();
        for batch in ids.chunks(self.config.batch_size) {
            let request = make(batch.to_vec());
            let name = request.name();
            match self.call(request)? {
                SyncMessage::Missing { ids } => missing.extend(ids),
                other => return Err(unexpected(name, &other)),
            }
        }
        Ok(missing)
    }

    pub(crate) fn open_session<'b>(
        &self,
        repo: RepoId,
        branch: &'b str,
        head: Option<ObjectId>,
        write: bool,
    ) -> SyncResult<Session<'b>> {
        let config = &self.config;
        let request = if config.basic_check_tx {
            SyncMessage::CheckTx(CheckTxRequest {
                repo,
                branch: branch.to_string(),
                peer: config.peer.clone(),
                head,
                token: config.token.clone(),
                write,
            })
        } else {
            SyncMessage::CheckTxV2(CheckTxV2Request {
                repo,
                branch: branch.to_string(),
                peer: config.peer.clone(),
                head,
                token: config.token.clone(),
                write,
                capabilities: config.capabilities.clone(),
            })
        };
        let name = request.name();
        match self.call(request)? {
            SyncMessage::CheckTxAccepted(accepted) => {
                tracing::debug!(
                    session = %accepted.session,
                    %repo,
                    branch,
                    negotiated = %accepted.negotiated(),
                    remote_head = ?accepted.head.map(|h| h.short()),
                    "session opened"
                );
                Ok(Session {
                    id: accepted.session,
                    repo,
                    branch,
                    negotiated: accepted.negotiated(),
                    remote_head: accepted.head,
                })
            }
            other => Err(unexpected(name, &other)),
        }
    }

    /// Runs `body` inside `session`, aborting the session if `body` fails
    /// while the server still holds it.
    pub(crate) fn within<R>(
        &self,
        session: &Session<'_>,
        body: impl FnOnce() -> SyncResult<R>,
    ) -> SyncResult<R> {
        let result = body();
        if let Err(e) = &result {
            if !e.session_ended() {
                let abort = SyncMessage::AbortSession {
                    session: session.id,
                    reason: e.to_string(),
                };
                if let Err(abort_err) = self.transport.round_trip(abort) {
                    tracing::debug!(session = %session.id, error = %abort_err, "abort not delivered");
                }
            }
        }
        result
    }

    pub(crate) fn close(&self, session: &Session<'_>) -> SyncResult<()> {
        let request = SyncMessage::CloseSession { session: session.id };
        let name = request.name();
        match self.call(request)? {
            SyncMessage::Ack => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    /// `(root, base)` pairs to diff for `frontier` plus `head`, parents first.
    ///
    /// A commit's base is its first parent's root, but only when the
    /// receiving side is known to hold that parent's whole tree: the parent
    /// is transferred in this sync, or is `complete_head` or one of its
    /// ancestors. Otherwise the tree is diffed against nothing.
    pub(crate) fn tree_pairs(
        &self,
        repo: RepoId,
        frontier: &CommitFrontier,
        head: ObjectId,
        complete_head: Option<ObjectId>,
    ) -> SyncResult<Vec<(ObjectId, Option<ObjectId>)>> {
        let store = self.depot.objects();
        let mut commits: Vec<Commit> = frontier.commits.iter().map(|c| c.commit.clone()).collect();
        if !frontier.contains(&head) {
            commits.push(store.get_commit(repo, &head)?);
        }

        let mut pairs = Vec::with_capacity(commits.len());
        for commit in &commits {
            let base = match commit.parent_id {
                Some(parent) if self.known_complete(store, repo, frontier, &parent, complete_head)? => {
                    local_root(store, repo, &parent)?
                }
                _ => None,
            };
            pairs.push((commit.root_id, base));
        }
        Ok(pairs)
    }

    fn known_complete(
        &self,
        store: &ObjectStore,
        repo: RepoId,
        frontier: &CommitFrontier,
        commit: &ObjectId,
        complete_head: Option<ObjectId>,
    ) -> SyncResult<bool> {
        if frontier.contains(commit) {
            return Ok(true);
        }
        match complete_head {
            Some(head) => Ok(reposync_core::dag::is_ancestor(store, repo, commit, &head)?),
            None => Ok(false),
        }
    }
}

impl<T: SyncTransport> std::fmt::Debug for Orchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

fn local_root(store: &ObjectStore, repo: RepoId, commit: &ObjectId) -> SyncResult<Option<ObjectId>> {
    match store.get_commit(repo, commit) {
        Ok(c) => Ok(Some(c.root_id)),
        Err(CoreError::ObjectNotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn unexpected(request: &'static str, response: &SyncMessage) -> SyncError {
    SyncError::UnexpectedResponse {
        request,
        response: response.name(),
    }
}

pub(crate) fn to_index(n: u64) -> SyncResult<usize> {
    usize::try_from(n).map_err(|_| SyncError::transport_fatal(format!("offset {n} out of range")))
}
