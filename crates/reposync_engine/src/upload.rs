//! Upload: local branch to the server.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{to_index, unexpected, Orchestrator, Session};
use crate::state::{SyncReport, SyncState};
use crate::transport::SyncTransport;
use reposync_core::dag::{self, CommitFrontier};
use reposync_core::tree::{self, LocalSource, TreeDelta};
use reposync_core::{ObjectId, RepoId};
use reposync_protocol::{
    BlockProtocol, BranchOutcome, CommitRecords, FsPayload, SyncMessage,
};
use std::collections::HashSet;

impl<T: SyncTransport> Orchestrator<T> {
    pub(crate) fn upload_once(
        &self,
        repo: RepoId,
        branch: &str,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let head = self
            .depot
            .branches()
            .head(repo, branch)?
            .ok_or_else(|| SyncError::EmptyBranch(branch.to_string()))?;

        let session = self.open_session(repo, branch, Some(head), true)?;
        report.negotiated = Some(session.negotiated);
        report.head = Some(head);

        self.within(&session, || {
            if session.remote_head == Some(head) {
                report.up_to_date = true;
                return self.close(&session);
            }

            self.set_state(SyncState::Commits);
            let frontier = self.send_commits(&session, head)?;
            report.commits = frontier.commits.len() as u64;
            report.shallow = frontier.shallow.len() as u64;

            self.set_state(SyncState::Fs);
            let delta = self.send_fs(&session, &frontier, head, report)?;

            self.set_state(SyncState::Blocks);
            self.send_blocks(&session, &delta, report)?;

            self.set_state(SyncState::Committing);
            self.move_remote_head(&session, head)
        })
    }

    fn send_commits(&self, session: &Session<'_>, head: ObjectId) -> SyncResult<CommitFrontier> {
        let store = self.depot.objects();
        let frontier = dag::frontier::<SyncError, _, _>(
            &[head],
            self.config.depth,
            |ids| {
                self.query(ids, |ids| SyncMessage::CommitQuery {
                    session: session.id,
                    ids,
                })
            },
            |ids| Ok(dag::load_local(store, session.repo, ids)?),
        )?;

        let shallow: HashSet<ObjectId> = frontier.shallow.iter().copied().collect();
        for batch in frontier.commits.chunks(self.config.batch_size) {
            let commits: Vec<_> = batch.iter().map(|c| (c.id, c.commit.clone())).collect();
            let request = SyncMessage::PutCommits {
                session: session.id,
                records: CommitRecords::encode(session.negotiated.commit, &commits)?,
                shallow: batch
                    .iter()
                    .map(|c| c.id)
                    .filter(|id| shallow.contains(id))
                    .collect(),
            };
            let name = request.name();
            match self.call(request)? {
                SyncMessage::Stored { .. } => {}
                other => return Err(unexpected(name, &other)),
            }
        }
        tracing::debug!(
            session = %session.id,
            commits = frontier.commits.len(),
            shallow = frontier.shallow.len(),
            "commits sent"
        );
        Ok(frontier)
    }

    fn send_fs(
        &self,
        session: &Session<'_>,
        frontier: &CommitFrontier,
        head: ObjectId,
        report: &mut SyncReport,
    ) -> SyncResult<TreeDelta> {
        let store = self.depot.objects();
        let pairs = self.tree_pairs(session.repo, frontier, head, session.remote_head)?;
        let delta = tree::diff(
            store,
            session.repo,
            &pairs,
            &mut LocalSource::new(store, session.repo),
        )?;

        let missing: HashSet<ObjectId> = self
            .query(&delta.fs_ids(), |ids| SyncMessage::FsQuery {
                session: session.id,
                ids,
            })?
            .into_iter()
            .collect();
        let to_send: Vec<ObjectId> = delta
            .fs
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| missing.contains(id))
            .collect();

        for batch in to_send.chunks(self.config.batch_size) {
            let objects = batch
                .iter()
                .map(|id| {
                    Ok(FsPayload {
                        id: *id,
                        data: store.get_fs_bytes(session.repo, id)?,
                    })
                })
                .collect::<SyncResult<Vec<_>>>()?;
            let request = SyncMessage::PutFs {
                session: session.id,
                objects,
            };
            let name = request.name();
            match self.call(request)? {
                SyncMessage::Stored { .. } => {}
                other => return Err(unexpected(name, &other)),
            }
        }
        report.fs_objects = to_send.len() as u64;

        let mut seen = HashSet::new();
        let roots: Vec<ObjectId> = pairs
            .iter()
            .map(|(root, _)| *root)
            .filter(|root| !root.is_zero() && seen.insert(*root))
            .collect();
        let request = SyncMessage::FinishFs {
            session: session.id,
            roots,
        };
        let name = request.name();
        match self.call(request)? {
            SyncMessage::Ack => {}
            other => return Err(unexpected(name, &other)),
        }
        tracing::debug!(
            session = %session.id,
            changed = delta.fs.len(),
            sent = to_send.len(),
            "fs-objects sent"
        );
        Ok(delta)
    }

    fn send_blocks(
        &self,
        session: &Session<'_>,
        delta: &TreeDelta,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let missing = self.query(&delta.blocks, |ids| SyncMessage::BlockQuery {
            session: session.id,
            ids,
        })?;

        let store = self.depot.objects();
        for id in &missing {
            let data = store.get_block(session.repo, id)?;
            let sent = match session.negotiated.block {
                BlockProtocol::V1 => self.put_block(session, *id, data)?,
                BlockProtocol::V2 => self.put_block_chunked(session, *id, &data)?,
            };
            report.blocks += 1;
            report.block_bytes += sent;
        }
        tracing::debug!(
            session = %session.id,
            referenced = delta.blocks.len(),
            sent = missing.len(),
            bytes = report.block_bytes,
            "blocks sent"
        );
        Ok(())
    }

    fn put_block(&self, session: &Session<'_>, id: ObjectId, data: Vec<u8>) -> SyncResult<u64> {
        let len = data.len() as u64;
        let request = SyncMessage::PutBlock {
            session: session.id,
            id,
            data,
        };
        let name = request.name();
        match self.call(request)? {
            SyncMessage::Stored { .. } => Ok(len),
            other => Err(unexpected(name, &other)),
        }
    }

    /// Sends a block in chunks, resuming from what the server already holds
    /// when its checkpoint matches our prefix.
    /// Returns the bytes actually sent.
    fn put_block_chunked(&self, session: &Session<'_>, id: ObjectId, data: &[u8]) -> SyncResult<u64> {
        let len = data.len() as u64;
        let request = SyncMessage::BlockUploadStatus {
            session: session.id,
            id,
        };
        let name = request.name();
        let status = match self.call(request)? {
            SyncMessage::ChunkAck(ack) => ack,
            other => return Err(unexpected(name, &other)),
        };
        if status.complete {
            return Ok(0);
        }
        let mut offset = status.committed.min(len);
        if offset > 0 {
            // The checkpoint is the hex SHA-256 of the held prefix.
            let prefix = &data[..to_index(offset)?];
            if status.checkpoint == ObjectId::of(prefix).to_hex() {
                tracing::debug!(block = %id.short(), committed = offset, "resuming block upload");
            } else {
                tracing::warn!(
                    block = %id.short(),
                    committed = offset,
                    "held prefix does not match, restarting block upload"
                );
                offset = 0;
            }
        }
        let mut sent = 0u64;
        loop {
            let end = offset.saturating_add(self.config.chunk_size).min(len);
            let last = end == len;
            let chunk = data[to_index(offset)?..to_index(end)?].to_vec();
            sent += chunk.len() as u64;
            let request = SyncMessage::PutBlockChunk {
                session: session.id,
                id,
                offset,
                last,
                data: chunk,
            };
            let name = request.name();
            let ack = match self.call(request)? {
                SyncMessage::ChunkAck(ack) => ack,
                other => return Err(unexpected(name, &other)),
            };
            if ack.complete {
                return Ok(sent);
            }
            if last || ack.committed <= offset {
                return Err(SyncError::transport_fatal(format!(
                    "block {} stalled at offset {}",
                    id.short(),
                    ack.committed
                )));
            }
            offset = ack.committed.min(len);
        }
    }

    fn move_remote_head(&self, session: &Session<'_>, head: ObjectId) -> SyncResult<()> {
        let request = SyncMessage::UpdateBranch {
            session: session.id,
            expected: session.remote_head,
            new: head,
            force: self.config.force,
        };
        let name = request.name();
        match self.call(request)? {
            SyncMessage::BranchUpdated(BranchOutcome::Applied) => Ok(()),
            SyncMessage::BranchUpdated(BranchOutcome::Stale { current }) => {
                Err(SyncError::StaleHead {
                    branch: session.branch.to_string(),
                    expected: session.remote_head,
                    current,
                })
            }
            SyncMessage::BranchUpdated(BranchOutcome::NonFastForward { current }) => {
                Err(SyncError::NonFastForward {
                    branch: session.branch.to_string(),
                    current,
                    new: head,
                })
            }
            other => Err(unexpected(name, &other)),
        }
    }
}
