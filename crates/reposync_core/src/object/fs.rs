//! Fs-objects: directory and file manifest nodes.

use super::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use crate::id::ObjectId;
use serde::{Deserialize, Serialize};

/// Whether a directory entry names a file or a subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Points at a [`FileManifest`].
    File,
    /// Points at a [`Dir`].
    Dir,
}

/// One named child of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name, unique within the directory.
    pub name: String,
    /// Id of the child fs-object.
    pub id: ObjectId,
    /// Child type.
    pub kind: EntryKind,
    /// Unix mode bits.
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

impl DirEntry {
    /// Creates a file entry.
    pub fn file(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            id,
            kind: EntryKind::File,
            mode: 0o100644,
            mtime: 0,
        }
    }

    /// Creates a directory entry.
    pub fn dir(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            id,
            kind: EntryKind::Dir,
            mode: 0o040000,
            mtime: 0,
        }
    }
}

/// A directory node. Entries are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dir {
    entries: Vec<DirEntry>,
}

impl Dir {
    /// Creates a directory from entries, sorting them by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if two entries share a name or a name is
    /// empty or contains `/`.
    pub fn new(mut entries: Vec<DirEntry>) -> CoreResult<Self> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let dir = Self { entries };
        dir.validate()?;
        Ok(dir)
    }

    /// Returns the entries in name order.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    fn validate(&self) -> CoreResult<()> {
        for entry in &self.entries {
            if entry.name.is_empty() || entry.name.contains('/') || entry.name == ".." {
                return Err(CoreError::codec(format!(
                    "invalid entry name {:?}",
                    entry.name
                )));
            }
        }
        if self.entries.windows(2).any(|w| w[0].name >= w[1].name) {
            return Err(CoreError::codec("directory entries not strictly sorted"));
        }
        Ok(())
    }
}

/// Reference from a file manifest to one of its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block id.
    pub id: ObjectId,
    /// Block length in bytes.
    pub size: u32,
}

/// A file node: the ordered list of blocks making up its content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Total file size in bytes.
    pub size: u64,
    /// Content blocks in file order.
    pub blocks: Vec<BlockRef>,
}

impl FileManifest {
    /// Creates a manifest from block references, summing their sizes.
    pub fn new(blocks: Vec<BlockRef>) -> Self {
        let size = blocks.iter().map(|b| u64::from(b.size)).sum();
        Self { size, blocks }
    }
}

/// A node of the filesystem tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsObject {
    /// Directory node.
    Dir(Dir),
    /// File node.
    File(FileManifest),
}

impl FsObject {
    /// The empty directory, whose id is [`ObjectId::ZERO`].
    pub fn empty_dir() -> Self {
        FsObject::Dir(Dir::default())
    }

    /// Returns true for a directory without entries.
    pub fn is_empty_dir(&self) -> bool {
        matches!(self, FsObject::Dir(d) if d.entries.is_empty())
    }

    /// Serializes this node.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Parses a node, checking directory invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let obj: FsObject = from_cbor(bytes)?;
        if let FsObject::Dir(dir) = &obj {
            dir.validate()?;
        }
        Ok(obj)
    }

    /// Computes this node's id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn id(&self) -> CoreResult<ObjectId> {
        if self.is_empty_dir() {
            return Ok(ObjectId::ZERO);
        }
        Ok(ObjectId::of(&self.to_bytes()?))
    }

    /// Ids of child fs-objects (directories only).
    pub fn child_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let entries: &[DirEntry] = match self {
            FsObject::Dir(dir) => dir.entries.as_slice(),
            FsObject::File(_) => &[],
        };
        entries.iter().map(|e| e.id).filter(|id| !id.is_zero())
    }

    /// Ids of referenced blocks (file manifests only).
    pub fn block_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let blocks: &[BlockRef] = match self {
            FsObject::File(file) => file.blocks.as_slice(),
            FsObject::Dir(_) => &[],
        };
        blocks.iter().map(|b| b.id)
    }
}
