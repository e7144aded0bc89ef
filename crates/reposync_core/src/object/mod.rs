//! Stored object types.
//!
//! Blocks are raw bytes and need no type. Fs-objects and commits serialize
//! to CBOR; their id is the SHA-256 of that serialization.

mod commit;
mod fs;

pub use commit::{Commit, CommitBuilder};
pub use fs::{BlockRef, Dir, DirEntry, EntryKind, FileManifest, FsObject};

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three content-addressed object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Opaque content chunk.
    Block,
    /// Directory or file manifest node.
    Fs,
    /// History node.
    Commit,
}

impl ObjectKind {
    /// All kinds, in sweep order.
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Commit, ObjectKind::Fs, ObjectKind::Block];

    /// Backend namespace holding objects of this kind.
    pub const fn namespace(self) -> &'static str {
        match self {
            ObjectKind::Block => "blocks",
            ObjectKind::Fs => "fs",
            ObjectKind::Commit => "commits",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Block => "block",
            ObjectKind::Fs => "fs-object",
            ObjectKind::Commit => "commit",
        };
        f.write_str(name)
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(CoreError::codec)?;
    Ok(buf)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(CoreError::codec)
}
