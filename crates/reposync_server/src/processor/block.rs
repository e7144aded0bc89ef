//! Block transfer: whole blocks (v1) and chunked, resumable, ranged
//! transfer (v2).

use crate::error::{ServerError, ServerResult};
use crate::handler::{require_write, RequestHandler};
use crate::session::{SessionInfo, SessionPhase};
use crate::uploads::ChunkOutcome;
use reposync_core::{ObjectId, ObjectKind};
use reposync_protocol::{BlockProtocol, ChunkAck, SessionId, SyncMessage};

impl RequestHandler {
    pub(crate) fn block_query(&self, session: SessionId, ids: &[ObjectId]) -> ServerResult<SyncMessage> {
        let info = self.context.sessions.enter(session, SessionPhase::Blocks)?;
        self.check_batch(ids.len())?;
        let missing = self
            .context
            .depot
            .objects()
            .missing(ObjectKind::Block, info.repo, ids)?;
        tracing::debug!(session = %session, asked = ids.len(), missing = missing.len(), "block query");
        Ok(SyncMessage::Missing { ids: missing })
    }

    pub(crate) fn get_block(&self, session: SessionId, id: &ObjectId) -> ServerResult<SyncMessage> {
        let info = self.enter_blocks(session, BlockProtocol::V1)?;
        let data = self.context.depot.objects().get_block(info.repo, id)?;
        Ok(SyncMessage::Block { id: *id, data })
    }

    pub(crate) fn put_block(&self, session: SessionId, id: &ObjectId, data: &[u8]) -> ServerResult<SyncMessage> {
        let info = self.enter_blocks(session, BlockProtocol::V1)?;
        require_write(&info)?;
        let objects = self.context.depot.objects();
        if self.already_stored(&info, id)?.is_some() {
            tracing::trace!(session = %session, block = %id.short(), "block dedup");
            return Ok(SyncMessage::Stored { written: 0 });
        }
        self.check_size(id, data.len() as u64)?;
        let written = objects.put_block_verified(info.repo, id, data)?;
        Ok(SyncMessage::Stored {
            written: u64::from(written),
        })
    }

    pub(crate) fn get_block_range(
        &self,
        session: SessionId,
        id: &ObjectId,
        offset: u64,
        len: u64,
    ) -> ServerResult<SyncMessage> {
        let info = self.enter_blocks(session, BlockProtocol::V2)?;
        let data = self.context.depot.objects().get_block(info.repo, id)?;
        let total = data.len() as u64;
        if offset > total {
            return Err(ServerError::InvalidRequest(format!(
                "offset {} past end of block {} ({} bytes)",
                offset,
                id.short(),
                total
            )));
        }
        let end = offset.saturating_add(len.min(self.context.config.chunk_size)).min(total);
        let range = to_index(offset)?..to_index(end)?;
        Ok(SyncMessage::BlockRange {
            id: *id,
            offset,
            total,
            data: data[range].to_vec(),
        })
    }

    pub(crate) fn put_block_chunk(
        &self,
        session: SessionId,
        id: &ObjectId,
        offset: u64,
        data: &[u8],
        last: bool,
    ) -> ServerResult<SyncMessage> {
        let info = self.enter_blocks(session, BlockProtocol::V2)?;
        require_write(&info)?;
        let uploads = &self.context.uploads;
        if let Some(size) = self.already_stored(&info, id)? {
            uploads.discard(info.repo, id);
            return Ok(SyncMessage::ChunkAck(complete(id, size)));
        }

        let ack = match uploads.append(info.repo, id, offset, data, last)? {
            ChunkOutcome::Partial {
                committed,
                checkpoint,
            } => ChunkAck {
                id: *id,
                committed,
                checkpoint,
                complete: false,
            },
            ChunkOutcome::Complete(block) => {
                self.context
                    .depot
                    .objects()
                    .put_block_verified(info.repo, id, &block)?;
                tracing::trace!(session = %session, block = %id.short(), len = block.len(), "chunked upload complete");
                complete(id, block.len() as u64)
            }
        };
        Ok(SyncMessage::ChunkAck(ack))
    }

    pub(crate) fn block_upload_status(&self, session: SessionId, id: &ObjectId) -> ServerResult<SyncMessage> {
        let info = self.enter_blocks(session, BlockProtocol::V2)?;
        if let Some(size) = self.already_stored(&info, id)? {
            return Ok(SyncMessage::ChunkAck(complete(id, size)));
        }
        let (committed, checkpoint) = self.context.uploads.status(info.repo, id);
        Ok(SyncMessage::ChunkAck(ChunkAck {
            id: *id,
            committed,
            checkpoint,
            complete: false,
        }))
    }

    fn enter_blocks(&self, session: SessionId, required: BlockProtocol) -> ServerResult<SessionInfo> {
        let info = self.context.sessions.enter(session, SessionPhase::Blocks)?;
        if info.negotiated.block != required {
            return Err(ServerError::ProtocolMismatch(format!(
                "session negotiated {}, request needs {}",
                info.negotiated.block, required
            )));
        }
        Ok(info)
    }

    /// Size of the block if it is stored; refreshes its stamp.
    fn already_stored(&self, info: &SessionInfo, id: &ObjectId) -> ServerResult<Option<u64>> {
        let objects = self.context.depot.objects();
        if !objects.missing(ObjectKind::Block, info.repo, &[*id])?.is_empty() {
            return Ok(None);
        }
        Ok(objects.size(ObjectKind::Block, info.repo, id)?)
    }

    fn check_size(&self, id: &ObjectId, len: u64) -> ServerResult<()> {
        let max = self.context.config.max_block_size;
        if len > max {
            return Err(ServerError::InvalidRequest(format!(
                "block {} of {} bytes exceeds {}",
                id.short(),
                len,
                max
            )));
        }
        Ok(())
    }
}

fn complete(id: &ObjectId, size: u64) -> ChunkAck {
    ChunkAck {
        id: *id,
        committed: size,
        checkpoint: id.to_hex(),
        complete: true,
    }
}

fn to_index(n: u64) -> ServerResult<usize> {
    usize::try_from(n).map_err(|_| ServerError::InvalidRequest(format!("offset {n} out of range")))
}

#[cfg(test)]
mod tests {
    use crate::processor::testing::{open, open_as, server, session};
    use reposync_core::{ErrorKind, ObjectId, ObjectKind};
    use reposync_protocol::{BlockProtocol, Capabilities, ChunkAck, SyncMessage};

    fn v1_session(server: &crate::SyncServer, repo: reposync_core::RepoId) -> reposync_protocol::SessionId {
        open(server, repo, true, Capabilities::all().with_block([BlockProtocol::V1])).session
    }

    #[test]
    fn v1_mismatched_block_is_rejected_and_absent() {
        let (server, repo) = server();
        let s = v1_session(&server, repo);
        let claimed = ObjectId::of(b"the real content");
        let resp = server.handle_message(SyncMessage::PutBlock {
            session: s,
            id: claimed,
            data: b"forged content".to_vec(),
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::IntegrityMismatch,
                ..
            }
        ));
        assert!(!server
            .depot()
            .objects()
            .has(ObjectKind::Block, repo, &claimed)
            .unwrap());
    }

    #[test]
    fn v1_round_trip_and_dedup() {
        let (server, repo) = server();
        let s = v1_session(&server, repo);
        let data = b"block body".to_vec();
        let id = ObjectId::of(&data);
        let put = |data: Vec<u8>| {
            server.handle_message(SyncMessage::PutBlock {
                session: s,
                id,
                data,
            })
        };
        assert_eq!(put(data.clone()), SyncMessage::Stored { written: 1 });
        // The duplicate body is not even looked at.
        assert_eq!(put(Vec::new()), SyncMessage::Stored { written: 0 });

        let resp = server.handle_message(SyncMessage::GetBlock { session: s, id });
        assert_eq!(resp, SyncMessage::Block { id, data });
    }

    #[test]
    fn v2_chunked_upload_resumes() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let data: Vec<u8> = (0..100u8).collect();
        let id = ObjectId::of(&data);
        let chunk = |offset: usize, end: usize, last: bool| {
            server.handle_message(SyncMessage::PutBlockChunk {
                session: s,
                id,
                offset: offset as u64,
                last,
                data: data[offset..end].to_vec(),
            })
        };

        match chunk(0, 40, false) {
            SyncMessage::ChunkAck(ack) => {
                assert_eq!(ack.committed, 40);
                assert!(!ack.complete);
            }
            other => panic!("unexpected {other:?}"),
        }

        // A dropped connection: ask where to resume.
        let status = server.handle_message(SyncMessage::BlockUploadStatus { session: s, id });
        let SyncMessage::ChunkAck(ChunkAck { committed, .. }) = status else {
            panic!("unexpected {status:?}");
        };
        assert_eq!(committed, 40);

        match chunk(40, 100, true) {
            SyncMessage::ChunkAck(ack) => {
                assert!(ack.complete);
                assert_eq!(ack.committed, 100);
                assert_eq!(ack.checkpoint, id.to_hex());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.depot().objects().get_block(repo, &id).unwrap(), data);
    }

    #[test]
    fn v2_same_block_from_two_peers_is_idempotent() {
        let (server, repo) = server();
        let first = session(&server, repo);
        let second = open_as(&server, repo, "peer-2", true, Capabilities::all()).session;
        let data: Vec<u8> = (0..100u8).collect();
        let id = ObjectId::of(&data);
        let chunk = |s: reposync_protocol::SessionId, offset: usize, end: usize, last: bool| {
            match server.handle_message(SyncMessage::PutBlockChunk {
                session: s,
                id,
                offset: offset as u64,
                last,
                data: data[offset..end].to_vec(),
            }) {
                SyncMessage::ChunkAck(ack) => ack,
                other => panic!("unexpected {other:?}"),
            }
        };

        assert_eq!(chunk(first, 0, 40, false).committed, 40);
        // The second peer starts over and catches up with the held prefix.
        assert_eq!(chunk(second, 0, 40, false).committed, 40);
        assert!(chunk(second, 40, 100, true).complete);
        // The first peer's remaining chunk lands on a stored block.
        let ack = chunk(first, 40, 100, true);
        assert!(ack.complete);
        assert_eq!(ack.committed, 100);

        assert!(server.session(first).is_some());
        assert!(server.session(second).is_some());
        assert_eq!(server.depot().objects().get_block(repo, &id).unwrap(), data);
    }

    #[test]
    fn v2_ranged_read() {
        let (server, repo) = server();
        let data: Vec<u8> = (0..50u8).collect();
        let id = server.depot().objects().put_block(repo, &data).unwrap();
        let s = session(&server, repo);
        let resp = server.handle_message(SyncMessage::GetBlockRange {
            session: s,
            id,
            offset: 10,
            len: 15,
        });
        assert_eq!(
            resp,
            SyncMessage::BlockRange {
                id,
                offset: 10,
                total: 50,
                data: data[10..25].to_vec(),
            }
        );
    }

    #[test]
    fn v1_request_in_v2_session_is_incompatible() {
        let (server, repo) = server();
        let s = session(&server, repo);
        let resp = server.handle_message(SyncMessage::GetBlock {
            session: s,
            id: ObjectId::of(b"x"),
        });
        assert!(matches!(
            resp,
            SyncMessage::Error {
                kind: ErrorKind::IncompatibleVersion,
                ..
            }
        ));
    }
}
