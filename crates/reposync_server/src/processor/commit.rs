//! Commit transfer, all three encodings.

use crate::error::{ServerError, ServerResult};
use crate::handler::{require_write, RequestHandler};
use crate::session::SessionPhase;
use reposync_core::{ObjectId, ObjectKind};
use reposync_protocol::{CommitRecords, SessionId, SyncMessage};
use std::collections::HashSet;

impl RequestHandler {
    pub(crate) fn commit_query(&self, session: SessionId, ids: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Commits)?;
        self.check_batch(ids.len())?;
        let missing = self
            .context
            .depot
            .objects()
            .missing(ObjectKind::Commit, info.repo, ids)?;
        tracing::debug!(session = %session, asked = ids.len(), missing = missing.len(), "commit query");
        Ok(SyncMessage::Missing { ids: missing })
    }

    pub(crate) fn get_commits(&self, session: SessionId, ids: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Commits)?;
        self.check_batch(ids.len())?;
        let objects = self.context.depot.objects();
        let mut commits = Vec::with_capacity(ids.len());
        let mut shallow = Vec::new();
        for id in ids {
            commits.push((*id, objects.get_commit(info.repo, id)?));
            if objects.is_shallow(info.repo, id)? {
                shallow.push(*id);
            }
        }
        let records = CommitRecords::encode(info.negotiated.commit, &commits)?;
        tracing::debug!(session = %session, count = records.len(), protocol = %info.negotiated.commit, "commits sent");
        Ok(SyncMessage::Commits { records, shallow })
    }

    /// Stores commits in the order given, which must put parents first.
    ///
    /// A commit named in `shallow` is stored as a boundary only when one of
    /// its parents is absent; with every parent present the marker is
    /// dropped and the commit is stored normally.
    pub(crate) fn put_commits(
        &self,
        session: SessionId,
        records: &CommitRecords,
        shallow: &[ObjectId],
    ) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Commits)?;
        require_write(&info)?;
        if records.protocol() != info.negotiated.commit {
            return Err(ServerError::ProtocolMismatch(format!(
                "session negotiated {}, records are {}",
                info.negotiated.commit,
                records.protocol()
            )));
        }
        self.check_batch(records.len())?;

        let commits = records.decode()?;
        let shallow: HashSet<ObjectId> = shallow.iter().copied().collect();
        if !shallow.is_empty() && !self.context.config.shallow_uploads {
            return Err(ServerError::InvalidRequest(
                "this server does not accept shallow uploads".into(),
            ));
        }
        if let Some(stray) = shallow.iter().find(|s| !commits.iter().any(|(id, _)| id == *s)) {
            return Err(ServerError::InvalidRequest(format!(
                "shallow id {} is not among the uploaded commits",
                stray.short()
            )));
        }

        let objects = self.context.depot.objects();
        let mut written = 0u64;
        for (id, commit) in commits {
            if commit.repo_id != info.repo {
                return Err(ServerError::InvalidRequest(format!(
                    "commit {} belongs to repo {}",
                    id.short(),
                    commit.repo_id
                )));
            }
            let existed = objects.has(ObjectKind::Commit, info.repo, &id)?;
            let boundary = shallow.contains(&id)
                && !objects
                    .missing(ObjectKind::Commit, info.repo, &commit.parents().collect::<Vec<_>>())?
                    .is_empty();
            if boundary {
                objects.put_shallow_commit(&commit)?;
            } else {
                if shallow.contains(&id) {
                    tracing::trace!(session = %session, commit = %id.short(), "parents present, shallow marker dropped");
                }
                objects.put_commit(&commit)?;
            }
            if !existed {
                written += 1;
            }
        }
        tracing::debug!(session = %session, received = records.len(), written, "commits stored");
        Ok(SyncMessage::Stored { written })
    }
}

#[cfg(test)]
mod tests {
    use crate::processor::testing::{open, server, server_with, session};
    use crate::ServerConfig;
    use reposync_core::{CommitBuilder, ErrorKind, ObjectId, ObjectKind};
    use reposync_protocol::{Capabilities, CommitProtocol, CommitRecords, SyncMessage};

    #[test]
    fn put_then_query_and_get() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let c1 = CommitBuilder::new(repo, ObjectId::ZERO).description("c1").build();
        let id1 = c1.id().unwrap();
        let c2 = CommitBuilder::new(repo, ObjectId::ZERO).parent(id1).description("c2").build();
        let id2 = c2.id().unwrap();
        let records =
            CommitRecords::encode(CommitProtocol::V3, &[(id1, c1), (id2, c2)]).unwrap();

        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records: records.clone(),
            shallow: vec![],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 2 });

        // Idempotent.
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records: records.clone(),
            shallow: vec![],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 0 });

        let other = ObjectId::of(b"unknown");
        let resp = server.handle_message(SyncMessage::CommitQuery {
            session: s,
            ids: vec![id1, other],
        });
        assert_eq!(resp, SyncMessage::Missing { ids: vec![other] });

        let resp = server.handle_message(SyncMessage::GetCommits {
            session: s,
            ids: vec![id1, id2],
        });
        assert_eq!(
            resp,
            SyncMessage::Commits {
                records,
                shallow: vec![]
            }
        );
    }

    #[test]
    fn orphan_commit_is_dangling_and_fails_session() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let c = CommitBuilder::new(repo, ObjectId::ZERO)
            .parent(ObjectId::of(b"absent"))
            .build();
        let records = CommitRecords::encode(CommitProtocol::V3, &[(c.id().unwrap(), c)]).unwrap();
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::DanglingReference,
                ..
            }
        ));
        assert!(server.session(s).is_none());
    }

    #[test]
    fn shallow_boundary_is_accepted() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let c = CommitBuilder::new(repo, ObjectId::ZERO)
            .parent(ObjectId::of(b"truncated history"))
            .build();
        let id = c.id().unwrap();
        let records = CommitRecords::encode(CommitProtocol::V3, &[(id, c)]).unwrap();
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![id],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 1 });
        let objects = server.depot().objects();
        assert!(objects.has(ObjectKind::Commit, repo, &id).unwrap());
        assert!(objects.is_shallow(repo, &id).unwrap());
    }

    #[test]
    fn shallow_marker_on_a_complete_commit_is_dropped() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let base = CommitBuilder::new(repo, ObjectId::ZERO).description("base").build();
        let base_id = base.id().unwrap();
        let child = CommitBuilder::new(repo, ObjectId::ZERO).parent(base_id).build();
        let child_id = child.id().unwrap();
        let records =
            CommitRecords::encode(CommitProtocol::V3, &[(base_id, base), (child_id, child)]).unwrap();

        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![child_id],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 2 });
        assert!(!server.depot().objects().is_shallow(repo, &child_id).unwrap());
    }

    #[test]
    fn shallow_id_outside_the_batch_is_rejected() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let c = CommitBuilder::new(repo, ObjectId::ZERO).build();
        let records = CommitRecords::encode(CommitProtocol::V3, &[(c.id().unwrap(), c)]).unwrap();
        let elsewhere = ObjectId::of(b"some other commit");
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![elsewhere],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::InvalidRequest,
                ..
            }
        ));
        assert!(!server.depot().objects().is_shallow(repo, &elsewhere).unwrap());
    }

    #[test]
    fn shallow_uploads_can_be_refused() {
        let (server, repo) = server_with(ServerConfig::default().with_shallow_uploads(false));
        let s = session(&server, repo);
        let c = CommitBuilder::new(repo, ObjectId::ZERO)
            .parent(ObjectId::of(b"truncated history"))
            .build();
        let id = c.id().unwrap();
        let records = CommitRecords::encode(CommitProtocol::V3, &[(id, c)]).unwrap();
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![id],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::InvalidRequest,
                ..
            }
        ));
        let objects = server.depot().objects();
        assert!(!objects.has(ObjectKind::Commit, repo, &id).unwrap());
        assert!(!objects.is_shallow(repo, &id).unwrap());
    }

    #[test]
    fn records_must_match_negotiated_version() {
        let (server, repo) = server();
        let s = open(
            &server,
            repo,
            true,
            Capabilities::all().with_commit([CommitProtocol::V1, CommitProtocol::V2]),
        )
        .session;
        let c = CommitBuilder::new(repo, ObjectId::ZERO).version(0).build();
        let records = CommitRecords::encode(CommitProtocol::V1, &[(c.id().unwrap(), c)]).unwrap();
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::IncompatibleVersion,
                ..
            }
        ));
    }

    #[test]
    fn read_only_session_cannot_upload() {
        let (server, repo) = server();
        let s = open(&server, repo, false, Capabilities::all()).session;
        let c = CommitBuilder::new(repo, ObjectId::ZERO).build();
        let records = CommitRecords::encode(CommitProtocol::V3, &[(c.id().unwrap(), c)]).unwrap();
        let resp = server.handle_message(SyncMessage::PutCommits {
            session: s,
            records,
            shallow: vec![],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::Unauthorized,
                ..
            }
        ));
    }
}
