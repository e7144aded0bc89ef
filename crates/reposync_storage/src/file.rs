//! File-based object backend for persistent storage.

use crate::backend::{validate_key, validate_namespace, ObjectBackend, ObjectMeta};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TMP_DIR: &str = ".tmp";

/// A file-based object backend.
///
/// Every value is one file at `<root>/<namespace>/<key>`, with `/` in the key
/// mapping onto subdirectories. The write stamp is stored as the file's
/// modification time in milliseconds since the Unix epoch.
///
/// # Durability
///
/// - Values are written to `<root>/.tmp`, synced, then renamed into place, so
///   a reader never observes a partially written value
/// - `sync()` syncs the root directory
///
/// # Thread Safety
///
/// Mutations take an internal lock, so `put_if_absent` and `remove_if_older`
/// are atomic with respect to other users of the same `FileBackend`. They
/// are not atomic against other processes writing the same directory.
///
/// # Example
///
/// ```no_run
/// use reposync_storage::{ObjectBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("objects")).unwrap();
/// backend.put_if_absent("blocks", "repo/ab12", b"persistent data", 1).unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
    tmp_counter: AtomicU64,
}

impl FileBackend {
    /// Opens or creates a file backend rooted at `root`.
    ///
    /// Leftover temporary files from an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        let tmp = root.join(TMP_DIR);
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;

        Ok(Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, namespace: &str, key: &str) -> StorageResult<PathBuf> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut path = self.root.join(namespace);
        path.extend(key.split('/'));
        Ok(path)
    }

    fn write_file(&self, path: &Path, data: &[u8], stamp: u64) -> StorageResult<()> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(format!("{}-{}", std::process::id(), n));

        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.set_modified(stamp_to_time(stamp))?;
            file.sync_all()?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn meta_of(path: &Path, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                stamp: time_to_stamp(meta.modified()?),
                len: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn walk(dir: &Path, key_prefix: &str, out: &mut Vec<ObjectMeta>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().into_string().map_err(|name| {
                StorageError::Corrupted(format!("non UTF-8 file name {:?}", name))
            })?;
            let key = format!("{}{}", key_prefix, name);
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::walk(&entry.path(), &format!("{}/", key), out)?;
            } else if let Some(meta) = Self::meta_of(&entry.path(), &key)? {
                out.push(meta);
            }
        }
        Ok(())
    }
}

fn stamp_to_time(stamp: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(stamp)
}

fn time_to_stamp(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ObjectBackend for FileBackend {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_of(namespace, key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, namespace: &str, key: &str, data: &[u8], stamp: u64) -> StorageResult<()> {
        let path = self.path_of(namespace, key)?;
        let _guard = self.write_lock.lock();
        self.write_file(&path, data, stamp)
    }

    fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
        stamp: u64,
    ) -> StorageResult<bool> {
        let path = self.path_of(namespace, key)?;
        let _guard = self.write_lock.lock();
        if path.exists() {
            return Ok(false);
        }
        self.write_file(&path, data, stamp)?;
        Ok(true)
    }

    fn stat(&self, namespace: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.path_of(namespace, key)?;
        Self::meta_of(&path, key)
    }

    fn touch(&self, namespace: &str, key: &str, stamp: u64) -> StorageResult<bool> {
        let path = self.path_of(namespace, key)?;
        let _guard = self.write_lock.lock();
        let Some(meta) = Self::meta_of(&path, key)? else {
            return Ok(false);
        };
        if stamp > meta.stamp {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_modified(stamp_to_time(stamp))?;
        }
        Ok(true)
    }

    fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let path = self.path_of(namespace, key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_if_older(&self, namespace: &str, key: &str, epoch: u64) -> StorageResult<bool> {
        let path = self.path_of(namespace, key)?;
        let _guard = self.write_lock.lock();
        match Self::meta_of(&path, key)? {
            Some(meta) if meta.stamp < epoch => {
                fs::remove_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self, namespace: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        validate_namespace(namespace)?;

        // Only descend into the directory named by the prefix
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        let mut dir = self.root.join(namespace);
        dir.extend(dir_part.split('/').filter(|s| !s.is_empty()));

        let mut out = Vec::new();
        Self::walk(&dir, dir_part, &mut out)?;
        out.retain(|meta| meta.key.starts_with(prefix));
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn sync(&self) -> StorageResult<()> {
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");

        let backend = FileBackend::open(&root).unwrap();
        assert!(root.exists());
        assert_eq!(backend.root(), root);
        assert!(backend.list("blocks", "").unwrap().is_empty());
    }

    #[test]
    fn file_put_and_get() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        assert!(backend
            .put_if_absent("blocks", "repo/abc", b"hello world", 1_000)
            .unwrap());
        assert_eq!(
            backend.get("blocks", "repo/abc").unwrap().unwrap(),
            b"hello world"
        );
        assert!(dir.path().join("blocks").join("repo").join("abc").exists());
    }

    #[test]
    fn file_put_if_absent_keeps_first_value() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put_if_absent("fs", "r/x", b"first", 1_000).unwrap();
        assert!(!backend.put_if_absent("fs", "r/x", b"second", 2_000).unwrap());
        assert_eq!(backend.get("fs", "r/x").unwrap().unwrap(), b"first");
    }

    #[test]
    fn file_stamp_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.put("commits", "r/c1", b"commit", 1_700_000_000_123).unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            let meta = backend.stat("commits", "r/c1").unwrap().unwrap();
            assert_eq!(meta.stamp, 1_700_000_000_123);
            assert_eq!(meta.len, 6);
        }
    }

    #[test]
    fn file_touch_and_remove_if_older() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("blocks", "r/a", b"a", 1_000).unwrap();
        assert!(!backend.remove_if_older("blocks", "r/a", 1_000).unwrap());

        backend.touch("blocks", "r/a", 5_000).unwrap();
        assert!(!backend.remove_if_older("blocks", "r/a", 4_000).unwrap());
        assert!(backend.remove_if_older("blocks", "r/a", 6_000).unwrap());
        assert_eq!(backend.get("blocks", "r/a").unwrap(), None);
    }

    #[test]
    fn file_list_by_prefix() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("blocks", "r1/b", b"", 1_000).unwrap();
        backend.put("blocks", "r1/a", b"", 1_000).unwrap();
        backend.put("blocks", "r2/a", b"", 1_000).unwrap();

        let keys: Vec<_> = backend
            .list("blocks", "r1/")
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["r1/a".to_string(), "r1/b".to_string()]);
        assert_eq!(backend.list("blocks", "").unwrap().len(), 3);
        assert!(backend.list("blocks", "r3/").unwrap().is_empty());
    }

    #[test]
    fn file_remove() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.put("repos", "r", b"x", 1_000).unwrap();
        assert!(backend.remove("repos", "r").unwrap());
        assert!(!backend.remove("repos", "r").unwrap());
    }

    #[test]
    fn file_open_clears_stale_tmp() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(TMP_DIR)).unwrap();
        std::fs::write(dir.path().join(TMP_DIR).join("junk"), b"partial").unwrap();

        let _backend = FileBackend::open(dir.path()).unwrap();
        assert!(!dir.path().join(TMP_DIR).join("junk").exists());
    }
}
