//! Download: server branch into the local depot.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{to_index, unexpected, Orchestrator, Session};
use crate::state::{SyncReport, SyncState};
use crate::transport::SyncTransport;
use reposync_core::dag::{self, CommitFrontier, LoadedCommit};
use reposync_core::tree::{self, FsSource};
use reposync_core::{CoreError, FsObject, ObjectId, ObjectKind, RepoId};
use reposync_protocol::{BlockProtocol, SyncMessage};
use std::collections::HashSet;

impl<T: SyncTransport> Orchestrator<T> {
    pub(crate) fn download_once(
        &self,
        repo: RepoId,
        branch: &str,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        self.depot.repos().get(repo)?;
        let local = self.depot.branches().get(repo, branch);
        let local_head = local.as_ref().and_then(|b| b.head);

        let session = self.open_session(repo, branch, local_head, false)?;
        report.negotiated = Some(session.negotiated);
        report.head = local_head;

        let remote_head = self.within(&session, || {
            let remote_head = match session.remote_head {
                Some(head) if Some(head) != local_head => head,
                _ => {
                    report.up_to_date = true;
                    self.close(&session)?;
                    return Ok(None);
                }
            };

            self.set_state(SyncState::Commits);
            let frontier = self.fetch_commits(&session, remote_head)?;
            report.commits = frontier.commits.len() as u64;
            report.shallow = frontier.shallow.len() as u64;

            self.set_state(SyncState::Fs);
            let blocks = self.fetch_fs(&session, &frontier, remote_head, local_head, report)?;

            self.set_state(SyncState::Blocks);
            self.fetch_blocks(&session, &blocks, report)?;

            self.close(&session)?;
            Ok(Some(remote_head))
        })?;

        let Some(remote_head) = remote_head else {
            return Ok(());
        };
        self.set_state(SyncState::Committing);
        self.move_local_head(repo, branch, local.is_some(), local_head, remote_head)?;
        report.head = Some(remote_head);
        Ok(())
    }

    /// Fetches and stores the commits the local store lacks, parents first.
    fn fetch_commits(&self, session: &Session<'_>, head: ObjectId) -> SyncResult<CommitFrontier> {
        let store = self.depot.objects();
        let frontier = dag::frontier::<SyncError, _, _>(
            &[head],
            self.config.depth,
            |ids| Ok(store.missing(ObjectKind::Commit, session.repo, ids)?),
            |ids| self.get_commits(session, ids),
        )?;

        let shallow: HashSet<ObjectId> = frontier.shallow.iter().copied().collect();
        for loaded in &frontier.commits {
            let id = loaded.commit.id()?;
            if id != loaded.id {
                return Err(CoreError::IntegrityMismatch {
                    kind: ObjectKind::Commit,
                    claimed: loaded.id,
                    actual: id,
                }
                .into());
            }
            if shallow.contains(&id) {
                store.put_shallow_commit(&loaded.commit)?;
            } else {
                store.put_commit(&loaded.commit)?;
            }
        }
        tracing::debug!(
            session = %session.id,
            commits = frontier.commits.len(),
            shallow = frontier.shallow.len(),
            "commits received"
        );
        Ok(frontier)
    }

    fn get_commits(&self, session: &Session<'_>, ids: &[ObjectId]) -> SyncResult<Vec<LoadedCommit>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.config.batch_size) {
            let request = SyncMessage::GetCommits {
                session: session.id,
                ids: batch.to_vec(),
            };
            let name = request.name();
            let (records, shallow) = match self.call(request)? {
                SyncMessage::Commits { records, shallow } => (records, shallow),
                other => return Err(unexpected(name, &other)),
            };
            for (id, commit) in records.decode()? {
                if commit.repo_id != session.repo {
                    return Err(CoreError::codec(format!(
                        "commit {} belongs to repo {}",
                        id.short(),
                        commit.repo_id
                    ))
                    .into());
                }
                loaded.push(LoadedCommit {
                    id,
                    shallow: shallow.contains(&id),
                    commit,
                });
            }
        }
        Ok(loaded)
    }

    /// Fetches the changed fs-objects and returns the blocks they reference.
    fn fetch_fs(
        &self,
        session: &Session<'_>,
        frontier: &CommitFrontier,
        head: ObjectId,
        local_head: Option<ObjectId>,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<ObjectId>> {
        let pairs = self.tree_pairs(session.repo, frontier, head, local_head)?;
        let mut source = RemoteSource {
            orchestrator: self,
            session,
            fetched: 0,
        };
        let delta = tree::diff(self.depot.objects(), session.repo, &pairs, &mut source)?;
        report.fs_objects = source.fetched;
        tracing::debug!(
            session = %session.id,
            changed = delta.fs.len(),
            fetched = source.fetched,
            "fs-objects received"
        );
        Ok(delta.blocks)
    }

    fn fetch_blocks(
        &self,
        session: &Session<'_>,
        blocks: &[ObjectId],
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let store = self.depot.objects();
        let missing = store.missing(ObjectKind::Block, session.repo, blocks)?;
        for id in &missing {
            let received = match session.negotiated.block {
                BlockProtocol::V1 => self.get_block(session, *id)?,
                BlockProtocol::V2 => self.get_block_ranged(session, *id)?,
            };
            report.blocks += 1;
            report.block_bytes += received;
        }
        tracing::debug!(
            session = %session.id,
            referenced = blocks.len(),
            fetched = missing.len(),
            bytes = report.block_bytes,
            "blocks received"
        );
        Ok(())
    }

    fn get_block(&self, session: &Session<'_>, id: ObjectId) -> SyncResult<u64> {
        let request = SyncMessage::GetBlock {
            session: session.id,
            id,
        };
        let name = request.name();
        let data = match self.call(request)? {
            SyncMessage::Block { data, .. } => data,
            other => return Err(unexpected(name, &other)),
        };
        self.depot
            .objects()
            .put_block_verified(session.repo, &id, &data)?;
        Ok(data.len() as u64)
    }

    /// Reads a block in ranges. Bytes received before a failure are kept
    /// and the next attempt continues after them.
    fn get_block_ranged(&self, session: &Session<'_>, id: ObjectId) -> SyncResult<u64> {
        let key = (session.repo, id);
        let mut buf = self.partial_blocks.lock().remove(&key).unwrap_or_default();
        let resumed = buf.len() as u64;
        if resumed > 0 {
            tracing::debug!(block = %id.short(), offset = resumed, "resuming block download");
        }

        if let Err(e) = self.read_ranges(session, id, &mut buf) {
            if !buf.is_empty() {
                self.partial_blocks.lock().insert(key, buf);
            }
            return Err(e);
        }
        self.depot
            .objects()
            .put_block_verified(session.repo, &id, &buf)?;
        Ok(buf.len() as u64 - resumed)
    }

    fn read_ranges(&self, session: &Session<'_>, id: ObjectId, buf: &mut Vec<u8>) -> SyncResult<()> {
        loop {
            let offset = buf.len() as u64;
            let request = SyncMessage::GetBlockRange {
                session: session.id,
                id,
                offset,
                len: self.config.chunk_size,
            };
            let name = request.name();
            let (start, total, data) = match self.call(request)? {
                SyncMessage::BlockRange {
                    offset, total, data, ..
                } => (offset, total, data),
                other => return Err(unexpected(name, &other)),
            };
            if start != offset || to_index(total)? < buf.len() + data.len() {
                return Err(SyncError::transport_fatal(format!(
                    "block {} range out of place at offset {offset}",
                    id.short()
                )));
            }
            buf.extend_from_slice(&data);
            if buf.len() as u64 == total {
                return Ok(());
            }
            if data.is_empty() {
                return Err(SyncError::transport_fatal(format!(
                    "block {} ended early at offset {offset} of {total}",
                    id.short()
                )));
            }
        }
    }

    fn move_local_head(
        &self,
        repo: RepoId,
        branch: &str,
        exists: bool,
        local_head: Option<ObjectId>,
        remote_head: ObjectId,
    ) -> SyncResult<()> {
        let result = if exists {
            self.depot
                .update_branch(repo, branch, local_head, remote_head, self.config.force)
        } else {
            self.depot.create_branch(repo, branch, Some(remote_head))
        };
        result.map_err(|e| match e {
            CoreError::StaleHead { current, .. } => SyncError::StaleHead {
                branch: branch.to_string(),
                expected: local_head,
                current,
            },
            CoreError::NonFastForward { old, new, .. } => SyncError::NonFastForward {
                branch: branch.to_string(),
                current: old,
                new,
            },
            other => other.into(),
        })
    }
}

/// Serves the new side of a download diff: local objects first, the rest
/// fetched from the server and stored on arrival.
struct RemoteSource<'o, 's, T: SyncTransport> {
    orchestrator: &'o Orchestrator<T>,
    session: &'s Session<'s>,
    fetched: u64,
}

impl<T: SyncTransport> FsSource for RemoteSource<'_, '_, T> {
    type Error = SyncError;

    fn load(&mut self, ids: &[ObjectId]) -> SyncResult<Vec<(ObjectId, FsObject)>> {
        let repo = self.session.repo;
        let store = self.orchestrator.depot.objects();
        let absent: HashSet<ObjectId> = store
            .missing(ObjectKind::Fs, repo, ids)?
            .into_iter()
            .collect();

        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids.iter().filter(|id| !absent.contains(id)) {
            loaded.push((*id, store.get_fs(repo, id)?));
        }

        let wanted: Vec<ObjectId> = ids.iter().copied().filter(|id| absent.contains(id)).collect();
        for batch in wanted.chunks(self.orchestrator.config.batch_size) {
            let request = SyncMessage::GetFs {
                session: self.session.id,
                ids: batch.to_vec(),
            };
            let name = request.name();
            let objects = match self.orchestrator.call(request)? {
                SyncMessage::FsObjects { objects } => objects,
                other => return Err(unexpected(name, &other)),
            };
            for payload in objects {
                let obj = store.put_fs_verified(repo, &payload.id, &payload.data)?;
                self.fetched += 1;
                loaded.push((payload.id, obj));
            }
        }
        Ok(loaded)
    }
}
