//! Session registry.
//!
//! A session is opened by Check-Tx and named by every later request. The
//! registry only holds live sessions: finishing, failing, superseding or
//! expiring a session removes it, and later requests naming it get
//! [`ServerError::SessionNotFound`].

use crate::auth::Permission;
use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use reposync_core::{ObjectId, RepoId};
use reposync_protocol::{Negotiated, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Server-side phase of a session. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    /// Check-Tx accepted, nothing transferred yet.
    Negotiating,
    /// Commit queries and transfers.
    Commits,
    /// Fs-object queries and transfers.
    Fs,
    /// Block queries and transfers.
    Blocks,
    /// Head update in progress.
    Committing,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
}

impl SessionPhase {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Commits => "commits",
            SessionPhase::Fs => "fs",
            SessionPhase::Blocks => "blocks",
            SessionPhase::Committing => "committing",
            SessionPhase::Done => "done",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a session's fixed parameters and current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Target repo.
    pub repo: RepoId,
    /// Branch the session reads or moves.
    pub branch: String,
    /// Peer identity.
    pub peer: String,
    /// What the peer may do.
    pub permission: Permission,
    /// Whether the peer announced an upload.
    pub write: bool,
    /// Versions fixed at Check-Tx.
    pub negotiated: Negotiated,
    /// Current phase.
    pub phase: SessionPhase,
}

/// An fs child referenced by a received object but not yet stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChild {
    /// The referencing fs-object.
    pub parent: ObjectId,
    /// The absent child.
    pub child: ObjectId,
    /// When the reference was first seen.
    pub since: Instant,
}

#[derive(Debug)]
struct Session {
    info: SessionInfo,
    last_active: Instant,
    pending: HashMap<ObjectId, PendingChild>,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    active: HashMap<(RepoId, String), SessionId>,
}

impl Registry {
    fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        let key = (session.info.repo, session.info.peer.clone());
        if self.active.get(&key) == Some(id) {
            self.active.remove(&key);
        }
        Some(session)
    }
}

/// Live sessions, at most one per (repo, peer).
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<Registry>,
    timeout: Duration,
}

impl SessionRegistry {
    /// Creates a registry reaping sessions idle longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            timeout,
        }
    }

    /// Opens a session in [`SessionPhase::Negotiating`].
    ///
    /// An active session of the same (repo, peer) is superseded and fails.
    pub fn open(
        &self,
        repo: RepoId,
        branch: String,
        peer: String,
        permission: Permission,
        write: bool,
        negotiated: Negotiated,
    ) -> SessionInfo {
        let info = SessionInfo {
            id: SessionId::new(),
            repo,
            branch,
            peer,
            permission,
            write,
            negotiated,
            phase: SessionPhase::Negotiating,
        };
        let mut reg = self.inner.lock();
        let key = (repo, info.peer.clone());
        if let Some(old) = reg.active.get(&key).copied() {
            if let Some(old) = reg.remove(&old) {
                tracing::warn!(
                    session = %old.info.id,
                    %repo,
                    peer = %info.peer,
                    phase = %old.info.phase,
                    "session superseded"
                );
            }
        }
        reg.active.insert(key, info.id);
        reg.sessions.insert(
            info.id,
            Session {
                info: info.clone(),
                last_active: Instant::now(),
                pending: HashMap::new(),
            },
        );
        info
    }

    /// Moves a session to `phase` for the duration of a request.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::SessionNotFound`] for an unknown or expired
    /// session and [`ServerError::PhaseRegression`] if the session already
    /// left `phase`; the session is failed in that case.
    pub fn enter(&self, id: SessionId, phase: SessionPhase) -> ServerResult<SessionInfo> {
        let mut reg = self.inner.lock();
        let now = Instant::now();
        let (expired, current) = match reg.sessions.get(&id) {
            Some(s) => (now.duration_since(s.last_active) > self.timeout, s.info.phase),
            None => return Err(ServerError::SessionNotFound(id)),
        };
        if expired {
            reg.remove(&id);
            tracing::warn!(session = %id, "session expired");
            return Err(ServerError::SessionNotFound(id));
        }
        if phase < current {
            reg.remove(&id);
            return Err(ServerError::PhaseRegression {
                session: id,
                current,
                requested: phase,
            });
        }
        let session = reg
            .sessions
            .get_mut(&id)
            .ok_or(ServerError::SessionNotFound(id))?;
        session.info.phase = phase;
        session.last_active = now;
        Ok(session.info.clone())
    }

    /// Ends a session with a terminal phase and returns its final state.
    pub fn finish(&self, id: SessionId, phase: SessionPhase) -> Option<SessionInfo> {
        let mut session = self.inner.lock().remove(&id)?;
        session.info.phase = phase;
        Some(session.info)
    }

    /// Returns a snapshot of a live session.
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.inner.lock().sessions.get(&id).map(|s| s.info.clone())
    }

    /// Records children referenced by received fs-objects that are absent.
    pub fn add_pending(&self, id: SessionId, refs: impl IntoIterator<Item = (ObjectId, ObjectId)>) {
        let mut reg = self.inner.lock();
        if let Some(session) = reg.sessions.get_mut(&id) {
            let now = Instant::now();
            for (parent, child) in refs {
                session.pending.entry(child).or_insert(PendingChild {
                    parent,
                    child,
                    since: now,
                });
            }
        }
    }

    /// Children still awaited by a session.
    pub fn pending(&self, id: SessionId) -> Vec<PendingChild> {
        self.inner
            .lock()
            .sessions
            .get(&id)
            .map(|s| s.pending.values().copied().collect())
            .unwrap_or_default()
    }

    /// Forgets children that have arrived.
    pub fn resolve_pending(&self, id: SessionId, arrived: &[ObjectId]) {
        if let Some(session) = self.inner.lock().sessions.get_mut(&id) {
            for child in arrived {
                session.pending.remove(child);
            }
        }
    }

    /// Removes sessions idle longer than the timeout. Returns how many.
    pub fn reap(&self) -> usize {
        let mut reg = self.inner.lock();
        let now = Instant::now();
        let idle: Vec<SessionId> = reg
            .sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_active) > self.timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &idle {
            reg.remove(id);
            tracing::debug!(session = %id, "idle session reaped");
        }
        idle.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns true if no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
