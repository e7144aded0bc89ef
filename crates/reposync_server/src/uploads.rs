//! Partial block uploads for block protocol v2.
//!
//! Each upload keeps the bytes received so far and a running SHA-256 over
//! them. The digest of the committed prefix is the checkpoint a peer can
//! compare against before resuming.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use reposync_core::{ObjectId, RepoId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct PartialUpload {
    data: Vec<u8>,
    hasher: Sha256,
    last_active: Instant,
}

impl PartialUpload {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            hasher: Sha256::new(),
            last_active: Instant::now(),
        }
    }

    fn checkpoint(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Outcome of appending a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected.
    Partial {
        /// Bytes held so far.
        committed: u64,
        /// Hex digest of those bytes.
        checkpoint: String,
    },
    /// The block is whole and its digest matches the claimed id.
    Complete(Vec<u8>),
}

/// Partial uploads keyed by (repo, block).
pub struct PartialUploads {
    uploads: Mutex<HashMap<(RepoId, ObjectId), PartialUpload>>,
    expiry: Duration,
    max_size: u64,
}

impl PartialUploads {
    /// Creates a tracker discarding uploads idle longer than `expiry` and
    /// rejecting blocks larger than `max_size`.
    pub fn new(expiry: Duration, max_size: u64) -> Self {
        Self {
            uploads: Mutex::new(HashMap::new()),
            expiry,
            max_size,
        }
    }

    /// Committed offset and checkpoint of an upload; `(0, digest of nothing)`
    /// if none is in progress.
    pub fn status(&self, repo: RepoId, id: &ObjectId) -> (u64, String) {
        let uploads = self.uploads.lock();
        match uploads.get(&(repo, *id)) {
            Some(u) => (u.data.len() as u64, u.checkpoint()),
            None => (0, PartialUpload::new().checkpoint()),
        }
    }

    /// Appends a chunk at `offset`.
    ///
    /// Uploads are shared by every session sending the same block. A chunk
    /// that starts inside the held prefix must agree with the bytes it
    /// overlaps; only its tail is appended, so a peer resending what another
    /// peer already delivered gets the current ack back. A chunk at offset 0
    /// that disagrees with the held prefix replaces the upload.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidRequest`] if `offset` is past the committed
    ///   offset, the chunk disagrees with a held prefix at a non-zero offset,
    ///   a last chunk ends before the held bytes do, or the block would
    ///   exceed the size limit
    /// - [`reposync_core::CoreError::IntegrityMismatch`] if the finished block
    ///   does not hash to `id`; the partial upload is discarded
    pub fn append(
        &self,
        repo: RepoId,
        id: &ObjectId,
        offset: u64,
        chunk: &[u8],
        last: bool,
    ) -> ServerResult<ChunkOutcome> {
        let mut uploads = self.uploads.lock();
        let key = (repo, *id);
        let upload = uploads.entry(key).or_insert_with(PartialUpload::new);
        let committed = upload.data.len() as u64;
        if offset > committed {
            return Err(ServerError::InvalidRequest(format!(
                "chunk for block {} at offset {}, committed offset is {}",
                id.short(),
                offset,
                committed
            )));
        }
        let end = offset + chunk.len() as u64;
        if end > self.max_size {
            uploads.remove(&key);
            return Err(ServerError::InvalidRequest(format!(
                "block {} exceeds {} bytes",
                id.short(),
                self.max_size
            )));
        }

        // Both bounds are at most `committed`, a length of `upload.data`.
        let start = offset as usize;
        let overlap = (committed - offset).min(chunk.len() as u64) as usize;
        if upload.data[start..start + overlap] != chunk[..overlap] {
            if offset > 0 {
                return Err(ServerError::InvalidRequest(format!(
                    "chunk for block {} at offset {} disagrees with the held bytes",
                    id.short(),
                    offset
                )));
            }
            tracing::debug!(block = %id.short(), held = committed, "restarting partial upload");
            *upload = PartialUpload::new();
            upload.data.extend_from_slice(chunk);
            upload.hasher.update(chunk);
        } else {
            let tail = &chunk[overlap..];
            upload.data.extend_from_slice(tail);
            upload.hasher.update(tail);
        }
        upload.last_active = Instant::now();

        let held = upload.data.len() as u64;
        if !last {
            return Ok(ChunkOutcome::Partial {
                committed: held,
                checkpoint: upload.checkpoint(),
            });
        }
        if end != held {
            return Err(ServerError::InvalidRequest(format!(
                "last chunk of block {} ends at {}, {} bytes are held",
                id.short(),
                end,
                held
            )));
        }

        let Some(upload) = uploads.remove(&key) else {
            return Err(ServerError::InvalidRequest("upload vanished".into()));
        };
        let actual = ObjectId::from_bytes(upload.hasher.finalize().into());
        if actual != *id {
            return Err(reposync_core::CoreError::IntegrityMismatch {
                kind: reposync_core::ObjectKind::Block,
                claimed: *id,
                actual,
            }
            .into());
        }
        Ok(ChunkOutcome::Complete(upload.data))
    }

    /// Drops an upload.
    pub fn discard(&self, repo: RepoId, id: &ObjectId) {
        self.uploads.lock().remove(&(repo, *id));
    }

    /// Drops uploads idle longer than the expiry. Returns how many.
    pub fn expire(&self) -> usize {
        let mut uploads = self.uploads.lock();
        let before = uploads.len();
        let expiry = self.expiry;
        uploads.retain(|_, u| u.last_active.elapsed() <= expiry);
        before - uploads.len()
    }

    /// Number of uploads in progress.
    pub fn len(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Returns true if no upload is in progress.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PartialUploads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialUploads")
            .field("in_progress", &self.len())
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::ErrorKind;

    fn uploads() -> PartialUploads {
        PartialUploads::new(Duration::from_secs(60), 1024)
    }

    #[test]
    fn chunks_assemble_and_verify() {
        let up = uploads();
        let repo = RepoId::new();
        let data = b"hello, chunked world".to_vec();
        let id = ObjectId::of(&data);

        let first = up.append(repo, &id, 0, &data[..5], false).unwrap();
        assert_eq!(
            first,
            ChunkOutcome::Partial {
                committed: 5,
                checkpoint: hex::encode(Sha256::digest(&data[..5])),
            }
        );
        assert_eq!(up.status(repo, &id).0, 5);

        let done = up.append(repo, &id, 5, &data[5..], true).unwrap();
        assert_eq!(done, ChunkOutcome::Complete(data));
        assert!(up.is_empty());
    }

    #[test]
    fn gap_is_rejected_and_keeps_progress() {
        let up = uploads();
        let repo = RepoId::new();
        let id = ObjectId::of(b"abcdef");
        up.append(repo, &id, 0, b"abc", false).unwrap();
        assert!(up.append(repo, &id, 4, b"ef", false).is_err());
        assert_eq!(up.status(repo, &id).0, 3);
    }

    #[test]
    fn resent_prefix_is_acknowledged_without_change() {
        let up = uploads();
        let repo = RepoId::new();
        let data: Vec<u8> = (0..100u8).collect();
        let id = ObjectId::of(&data);
        up.append(repo, &id, 0, &data[..40], false).unwrap();

        let again = up.append(repo, &id, 0, &data[..40], false).unwrap();
        assert_eq!(
            again,
            ChunkOutcome::Partial {
                committed: 40,
                checkpoint: hex::encode(Sha256::digest(&data[..40])),
            }
        );

        // Straddles the committed offset; only the tail is new.
        let tail = up.append(repo, &id, 20, &data[20..60], false).unwrap();
        assert!(matches!(tail, ChunkOutcome::Partial { committed: 60, .. }));

        let done = up.append(repo, &id, 60, &data[60..], true).unwrap();
        assert_eq!(done, ChunkOutcome::Complete(data));
    }

    #[test]
    fn disagreeing_chunk_at_zero_restarts_the_upload() {
        let up = uploads();
        let repo = RepoId::new();
        let data = b"the genuine block".to_vec();
        let id = ObjectId::of(&data);
        up.append(repo, &id, 0, b"forged p", false).unwrap();

        assert!(up.append(repo, &id, 4, b"uine", false).is_err());
        up.append(repo, &id, 0, &data[..4], false).unwrap();
        assert_eq!(up.status(repo, &id).0, 4);
        let done = up.append(repo, &id, 4, &data[4..], true).unwrap();
        assert_eq!(done, ChunkOutcome::Complete(data));
    }

    #[test]
    fn last_chunk_short_of_held_bytes_is_rejected() {
        let up = uploads();
        let repo = RepoId::new();
        let id = ObjectId::of(b"abcdef");
        up.append(repo, &id, 0, b"abcdef", false).unwrap();
        assert!(up.append(repo, &id, 0, b"abc", true).is_err());
    }

    #[test]
    fn mismatch_discards_upload() {
        let up = uploads();
        let repo = RepoId::new();
        let id = ObjectId::of(b"expected");
        let err = up.append(repo, &id, 0, b"something else", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
        assert_eq!(up.status(repo, &id).0, 0);
    }

    #[test]
    fn oversized_block_is_rejected() {
        let up = PartialUploads::new(Duration::from_secs(60), 4);
        let id = ObjectId::of(b"too big");
        assert!(up.append(RepoId::new(), &id, 0, b"too big", true).is_err());
    }

    #[test]
    fn idle_uploads_expire() {
        let up = PartialUploads::new(Duration::from_millis(5), 1024);
        up.append(RepoId::new(), &ObjectId::of(b"x"), 0, b"x", false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(up.expire(), 1);
    }
}
