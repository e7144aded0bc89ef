//! Branch transfer: the compare-and-swap head update that ends an upload,
//! plus session close and abort.

use crate::auth::Permission;
use crate::error::{ServerError, ServerResult};
use crate::handler::{require_write, RequestHandler};
use crate::session::SessionPhase;
use reposync_core::{CoreError, ObjectId};
use reposync_protocol::{BranchOutcome, SessionId, SyncMessage};

impl RequestHandler {
    pub(crate) fn update_branch(
        &self,
        session: SessionId,
        expected: Option<ObjectId>,
        new: ObjectId,
        force: bool,
    ) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Committing)?;
        require_write(&info)?;
        if force && info.permission < Permission::Admin {
            return Err(ServerError::NotAuthorized(format!(
                "forced update of {} needs admin access",
                info.branch
            )));
        }

        let depot = &self.context.depot;
        let result = if expected.is_none() && depot.branches().get(info.repo, &info.branch).is_none() {
            depot.create_branch(info.repo, &info.branch, Some(new))
        } else {
            depot.update_branch(info.repo, &info.branch, expected, new, force)
        };

        let outcome = match result {
            Ok(()) => BranchOutcome::Applied,
            Err(CoreError::StaleHead { current, .. }) => BranchOutcome::Stale { current },
            Err(CoreError::NonFastForward { old, .. }) => BranchOutcome::NonFastForward { current: old },
            Err(e) => return Err(e.into()),
        };

        if outcome == BranchOutcome::Applied {
            self.context.sessions.finish(session, SessionPhase::Done);
            tracing::info!(
                session = %session,
                repo = %info.repo,
                peer = %info.peer,
                branch = %info.branch,
                new = %new.short(),
                force,
                "session done"
            );
        } else {
            self.context.sessions.finish(session, SessionPhase::Failed);
            tracing::warn!(
                session = %session,
                repo = %info.repo,
                branch = %info.branch,
                ?outcome,
                "head update rejected"
            );
        }
        Ok(SyncMessage::BranchUpdated(outcome))
    }

    pub(crate) fn close_session(&self, session: SessionId) -> ServerResult<SyncMessage> {
        let info = self
            .context
            .sessions
            .finish(session, SessionPhase::Done)
            .ok_or(ServerError::SessionNotFound(session))?;
        tracing::info!(session = %session, repo = %info.repo, peer = %info.peer, "session closed");
        Ok(SyncMessage::Ack)
    }

    pub(crate) fn abort_session(&self, session: SessionId, reason: &str) -> ServerResult<SyncMessage> {
        let info = self
            .context
            .sessions
            .finish(session, SessionPhase::Failed)
            .ok_or(ServerError::SessionNotFound(session))?;
        tracing::warn!(session = %session, repo = %info.repo, peer = %info.peer, reason, "session aborted by peer");
        Ok(SyncMessage::Ack)
    }
}

#[cfg(test)]
mod tests {
    use crate::processor::testing::{server, session};
    use crate::{Authorizer, HandlerContext, Permission, ServerConfig, ServerResult, SyncServer};
    use reposync_core::{CommitBuilder, Depot, ErrorKind, ObjectId, RepoId};
    use reposync_protocol::{
        BranchOutcome, Capabilities, CheckTxV2Request, SyncMessage,
    };
    use std::sync::Arc;

    fn commit(server: &SyncServer, repo: RepoId, parent: Option<ObjectId>, msg: &str) -> ObjectId {
        let mut b = CommitBuilder::new(repo, ObjectId::ZERO).description(msg);
        if let Some(p) = parent {
            b = b.parent(p);
        }
        server.depot().objects().put_commit(&b.build()).unwrap()
    }

    fn update(server: &SyncServer, repo: RepoId, expected: Option<ObjectId>, new: ObjectId, force: bool) -> SyncMessage {
        let s = session(server, repo);
        server.handle_message(SyncMessage::UpdateBranch {
            session: s,
            expected,
            new,
            force,
        })
    }

    #[test]
    fn cas_applies_then_goes_stale() {
        let (server, repo) = server();
        let c1 = commit(&server, repo, None, "c1");
        let c2 = commit(&server, repo, Some(c1), "c2");

        assert_eq!(
            update(&server, repo, None, c1, false),
            SyncMessage::BranchUpdated(BranchOutcome::Applied)
        );
        assert_eq!(
            update(&server, repo, None, c2, false),
            SyncMessage::BranchUpdated(BranchOutcome::Stale { current: Some(c1) })
        );
        assert_eq!(
            update(&server, repo, Some(c1), c2, false),
            SyncMessage::BranchUpdated(BranchOutcome::Applied)
        );
        assert_eq!(server.depot().branches().head(repo, "master").unwrap(), Some(c2));
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn divergent_update_needs_force() {
        let (server, repo) = server();
        let base = commit(&server, repo, None, "base");
        let left = commit(&server, repo, Some(base), "left");
        let right = commit(&server, repo, Some(base), "right");
        update(&server, repo, None, left, false);

        assert_eq!(
            update(&server, repo, Some(left), right, false),
            SyncMessage::BranchUpdated(BranchOutcome::NonFastForward { current: left })
        );
        assert_eq!(
            update(&server, repo, Some(left), right, true),
            SyncMessage::BranchUpdated(BranchOutcome::Applied)
        );
    }

    struct ReadWriteOnly;

    impl Authorizer for ReadWriteOnly {
        fn authorize(&self, _: &str, _: RepoId, _: Option<&str>) -> ServerResult<Permission> {
            Ok(Permission::ReadWrite)
        }
    }

    #[test]
    fn force_needs_admin() {
        let depot = Arc::new(Depot::in_memory());
        let repo = RepoId::new();
        depot.create_repo(repo, false).unwrap();
        let context = HandlerContext::with_authorizer(ServerConfig::default(), depot, Arc::new(ReadWriteOnly));
        let server = SyncServer::with_context(Arc::new(context));
        let c1 = commit(&server, repo, None, "c1");

        let SyncMessage::CheckTxAccepted(r) = server.handle_message(SyncMessage::CheckTxV2(CheckTxV2Request {
            repo,
            branch: "master".into(),
            peer: "p".into(),
            head: None,
            token: None,
            write: true,
            capabilities: Capabilities::all(),
        })) else {
            panic!("check-tx rejected");
        };
        let resp = server.handle_message(SyncMessage::UpdateBranch {
            session: r.session,
            expected: None,
            new: c1,
            force: true,
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::Unauthorized,
                ..
            }
        ));
    }

    #[test]
    fn incomplete_head_is_dangling() {
        let (server, repo) = server();
        let missing_root = ObjectId::of(b"tree never uploaded");
        let c = server
            .depot()
            .objects()
            .put_commit(&CommitBuilder::new(repo, missing_root).build())
            .unwrap();
        assert!(matches!(
            update(&server, repo, None, c, false),
            SyncMessage::Error {
                kind: ErrorKind::DanglingReference,
                ..
            }
        ));
        assert_eq!(server.depot().branches().head(repo, "master").unwrap(), None);
    }

    #[test]
    fn close_and_abort_end_the_session() {
        let (server, repo) = server();
        let s = session(&server, repo);
        assert_eq!(server.handle_message(SyncMessage::CloseSession { session: s }), SyncMessage::Ack);
        assert!(matches!(
            server.handle_message(SyncMessage::CloseSession { session: s }),
            SyncMessage::Error {
                kind: ErrorKind::SessionNotFound,
                ..
            }
        ));

        let s = session(&server, repo);
        let resp = server.handle_message(SyncMessage::AbortSession {
            session: s,
            reason: "peer shutting down".into(),
        });
        assert_eq!(resp, SyncMessage::Ack);
        assert!(server.session(s).is_none());
    }
}
