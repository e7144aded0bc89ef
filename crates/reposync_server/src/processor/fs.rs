//! Fs-object transfer.
//!
//! Received objects are stored as they arrive, in any order. Children they
//! reference that are neither stored nor delivered yet are tracked per
//! session and must show up within the missing-child wait.

use crate::error::ServerResult;
use crate::handler::{require_write, RequestHandler};
use crate::session::{PendingChild, SessionInfo, SessionPhase};
use reposync_core::{CoreError, ObjectId, ObjectKind};
use reposync_protocol::{FsPayload, SessionId, SyncMessage};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl RequestHandler {
    pub(crate) fn fs_query(&self, session: SessionId, ids: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Fs)?;
        self.check_batch(ids.len())?;
        let missing = self
            .context
            .depot
            .objects()
            .missing(ObjectKind::Fs, info.repo, ids)?;
        tracing::debug!(session = %session, asked = ids.len(), missing = missing.len(), "fs query");
        Ok(SyncMessage::Missing { ids: missing })
    }

    pub(crate) fn get_fs(&self, session: SessionId, ids: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Fs)?;
        self.check_batch(ids.len())?;
        let objects = ids
            .iter()
            .map(|id| {
                Ok(FsPayload {
                    id: *id,
                    data: self.context.depot.objects().get_fs_bytes(info.repo, id)?,
                })
            })
            .collect::<ServerResult<Vec<_>>>()?;
        tracing::debug!(session = %session, count = objects.len(), "fs-objects sent");
        Ok(SyncMessage::FsObjects { objects })
    }

    pub(crate) fn put_fs(&self, session: SessionId, payloads: &[FsPayload]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Fs)?;
        require_write(&info)?;
        self.check_batch(payloads.len())?;

        let objects = self.context.depot.objects();
        let mut stored = Vec::with_capacity(payloads.len());
        let mut absent = Vec::new();
        let mut written = 0u64;
        for payload in payloads {
            let existed = objects.has(ObjectKind::Fs, info.repo, &payload.id)?;
            let obj = objects.put_fs_verified(info.repo, &payload.id, &payload.data)?;
            for child in obj.child_ids() {
                if !objects.has(ObjectKind::Fs, info.repo, &child)? {
                    absent.push((payload.id, child));
                }
            }
            stored.push(payload.id);
            if !existed {
                written += 1;
            }
        }
        self.context.sessions.add_pending(session, absent);
        self.context.sessions.resolve_pending(session, &stored);
        self.await_children(&info, false)?;

        tracing::debug!(session = %session, received = payloads.len(), written, "fs-objects stored");
        Ok(SyncMessage::Stored { written })
    }

    /// Ends the fs phase: every root must be stored and every child
    /// referenced during the session must arrive within the wait.
    pub(crate) fn finish_fs(&self, session: SessionId, roots: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Fs)?;
        require_write(&info)?;
        let objects = self.context.depot.objects();
        for root in roots {
            if !objects.has(ObjectKind::Fs, info.repo, root)? {
                return Err(CoreError::DanglingReference {
                    kind: ObjectKind::Fs,
                    id: *root,
                    missing_kind: ObjectKind::Fs,
                    missing: *root,
                }
                .into());
            }
        }
        self.await_children(&info, true)?;
        tracing::debug!(session = %session, roots = roots.len(), "fs phase complete");
        Ok(SyncMessage::Ack)
    }

    /// Re-checks pending children. Fails with `MissingChild` once one has
    /// been absent for the full wait; with `block` set, polls until then.
    fn await_children(&self, info: &SessionInfo, block: bool) -> ServerResult<()> {
        let wait = self.context.config.missing_child_wait;
        let sessions = &self.context.sessions;
        let objects = self.context.depot.objects();
        loop {
            let mut arrived = Vec::new();
            let mut oldest: Option<PendingChild> = None;
            for pending in sessions.pending(info.id) {
                if objects.has(ObjectKind::Fs, info.repo, &pending.child)? {
                    arrived.push(pending.child);
                } else if oldest.map_or(true, |o| pending.since < o.since) {
                    oldest = Some(pending);
                }
            }
            sessions.resolve_pending(info.id, &arrived);

            let Some(oldest) = oldest else {
                return Ok(());
            };
            let waited = oldest.since.elapsed();
            if waited >= wait {
                return Err(CoreError::MissingChild {
                    parent: oldest.parent,
                    child: oldest.child,
                }
                .into());
            }
            if !block {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL.min(wait - waited));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::processor::testing::{server_with, session};
    use crate::ServerConfig;
    use reposync_core::{
        BlockRef, Dir, DirEntry, ErrorKind, FileManifest, FsObject, ObjectId, ObjectKind,
    };
    use reposync_protocol::{FsPayload, SyncMessage};
    use std::time::Duration;

    fn payload(obj: &FsObject) -> FsPayload {
        let data = obj.to_bytes().unwrap();
        FsPayload {
            id: ObjectId::of(&data),
            data,
        }
    }

    fn file(content: &[u8]) -> FsObject {
        FsObject::File(FileManifest::new(vec![BlockRef {
            id: ObjectId::of(content),
            size: content.len() as u32,
        }]))
    }

    fn config() -> ServerConfig {
        ServerConfig::default().with_missing_child_wait(Duration::from_millis(50))
    }

    #[test]
    fn parent_before_child_is_accepted() {
        let (server, repo) = server_with(config());
        let s = session(&server, repo);
        let child = payload(&file(b"a"));
        let root = payload(&FsObject::Dir(
            Dir::new(vec![DirEntry::file("a.txt", child.id)]).unwrap(),
        ));

        let resp = server.handle_message(SyncMessage::PutFs {
            session: s,
            objects: vec![root.clone()],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 1 });
        let resp = server.handle_message(SyncMessage::PutFs {
            session: s,
            objects: vec![child.clone()],
        });
        assert_eq!(resp, SyncMessage::Stored { written: 1 });

        let resp = server.handle_message(SyncMessage::FinishFs {
            session: s,
            roots: vec![root.id],
        });
        assert_eq!(resp, SyncMessage::Ack);

        let resp = server.handle_message(SyncMessage::FsQuery {
            session: s,
            ids: vec![root.id, child.id, ObjectId::ZERO],
        });
        assert_eq!(resp, SyncMessage::Missing { ids: vec![] });
    }

    #[test]
    fn undelivered_child_fails_after_wait() {
        let (server, repo) = server_with(config());
        let s = session(&server, repo);
        let never_sent = ObjectId::of(b"never sent");
        let root = payload(&FsObject::Dir(
            Dir::new(vec![DirEntry::dir("sub", never_sent)]).unwrap(),
        ));
        server.handle_message(SyncMessage::PutFs {
            session: s,
            objects: vec![root.clone()],
        });

        let resp = server.handle_message(SyncMessage::FinishFs {
            session: s,
            roots: vec![root.id],
        });
        match resp {
            SyncMessage::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::MissingChild);
                assert!(message.contains(&never_sent.to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(server.session(s).is_none());
        // The parent stays stored; it is harmless.
        assert!(server
            .depot()
            .objects()
            .has(ObjectKind::Fs, repo, &root.id)
            .unwrap());
    }

    #[test]
    fn tampered_fs_object_is_rejected() {
        let (server, repo) = server_with(config());
        let s = session(&server, repo);
        let mut p = payload(&file(b"x"));
        p.id = ObjectId::of(b"something else");
        let resp = server.handle_message(SyncMessage::PutFs {
            session: s,
            objects: vec![p.clone()],
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::IntegrityMismatch,
                ..
            }
        ));
        assert!(!server.depot().objects().has(ObjectKind::Fs, repo, &p.id).unwrap());
    }

    #[test]
    fn get_fs_returns_stored_bytes() {
        let (server, repo) = server_with(config());
        let obj = file(b"content");
        let id = server.depot().objects().put_fs(repo, &obj).unwrap();
        let s = session(&server, repo);
        let resp = server.handle_message(SyncMessage::GetFs {
            session: s,
            ids: vec![id],
        });
        assert_eq!(
            resp,
            SyncMessage::FsObjects {
                objects: vec![payload(&obj)]
            }
        );
    }
}
