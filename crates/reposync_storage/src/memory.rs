//! In-memory object backend for testing.

use crate::backend::{validate_key, validate_namespace, ObjectBackend, ObjectMeta};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    stamp: u64,
}

/// An in-memory object backend.
///
/// This backend stores all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral replicas that don't need persistence
///
/// # Thread Safety
///
/// All operations take a single lock, so conditional operations
/// (`put_if_absent`, `remove_if_older`) are atomic.
///
/// # Example
///
/// ```rust
/// use reposync_storage::{ObjectBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.put("branches", "repo/master", b"head", 1).unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<(String, String), Entry>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored values across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Overwrites a stored value without touching its stamp.
    ///
    /// Only useful for simulating on-disk corruption in tests.
    pub fn corrupt(&self, namespace: &str, key: &str, data: &[u8]) -> bool {
        match self
            .entries
            .write()
            .get_mut(&(namespace.to_string(), key.to_string()))
        {
            Some(entry) => {
                entry.data = data.to_vec();
                true
            }
            None => false,
        }
    }
}

fn location(namespace: &str, key: &str) -> StorageResult<(String, String)> {
    validate_namespace(namespace)?;
    validate_key(key)?;
    Ok((namespace.to_string(), key.to_string()))
}

impl ObjectBackend for InMemoryBackend {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let loc = location(namespace, key)?;
        Ok(self.entries.read().get(&loc).map(|e| e.data.clone()))
    }

    fn put(&self, namespace: &str, key: &str, data: &[u8], stamp: u64) -> StorageResult<()> {
        let loc = location(namespace, key)?;
        self.entries.write().insert(
            loc,
            Entry {
                data: data.to_vec(),
                stamp,
            },
        );
        Ok(())
    }

    fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
        stamp: u64,
    ) -> StorageResult<bool> {
        let loc = location(namespace, key)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&loc) {
            return Ok(false);
        }
        entries.insert(
            loc,
            Entry {
                data: data.to_vec(),
                stamp,
            },
        );
        Ok(true)
    }

    fn stat(&self, namespace: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let loc = location(namespace, key)?;
        Ok(self.entries.read().get(&loc).map(|e| ObjectMeta {
            key: key.to_string(),
            stamp: e.stamp,
            len: e.data.len() as u64,
        }))
    }

    fn touch(&self, namespace: &str, key: &str, stamp: u64) -> StorageResult<bool> {
        let loc = location(namespace, key)?;
        match self.entries.write().get_mut(&loc) {
            Some(entry) => {
                entry.stamp = entry.stamp.max(stamp);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let loc = location(namespace, key)?;
        Ok(self.entries.write().remove(&loc).is_some())
    }

    fn remove_if_older(&self, namespace: &str, key: &str, epoch: u64) -> StorageResult<bool> {
        let loc = location(namespace, key)?;
        let mut entries = self.entries.write();
        match entries.get(&loc) {
            Some(entry) if entry.stamp < epoch => {
                entries.remove(&loc);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list(&self, namespace: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        validate_namespace(namespace)?;
        let start = (namespace.to_string(), prefix.to_string());
        Ok(self
            .entries
            .read()
            .range(start..)
            .take_while(|((ns, key), _)| ns == namespace && key.starts_with(prefix))
            .map(|((_, key), e)| ObjectMeta {
                key: key.clone(),
                stamp: e.stamp,
                len: e.data.len() as u64,
            })
            .collect())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.get("blocks", "r/a").unwrap(), None);
    }

    #[test]
    fn memory_put_if_absent_is_write_once() {
        let backend = InMemoryBackend::new();
        assert!(backend.put_if_absent("blocks", "r/a", b"one", 1).unwrap());
        assert!(!backend.put_if_absent("blocks", "r/a", b"two", 2).unwrap());

        assert_eq!(backend.get("blocks", "r/a").unwrap().unwrap(), b"one");
        assert_eq!(backend.stat("blocks", "r/a").unwrap().unwrap().stamp, 1);
    }

    #[test]
    fn memory_put_replaces() {
        let backend = InMemoryBackend::new();
        backend.put("branches", "r/master", b"old", 1).unwrap();
        backend.put("branches", "r/master", b"new", 2).unwrap();
        assert_eq!(backend.get("branches", "r/master").unwrap().unwrap(), b"new");
    }

    #[test]
    fn memory_touch_only_raises_stamp() {
        let backend = InMemoryBackend::new();
        backend.put("fs", "r/x", b"data", 10).unwrap();

        assert!(backend.touch("fs", "r/x", 5).unwrap());
        assert_eq!(backend.stat("fs", "r/x").unwrap().unwrap().stamp, 10);

        assert!(backend.touch("fs", "r/x", 20).unwrap());
        assert_eq!(backend.stat("fs", "r/x").unwrap().unwrap().stamp, 20);

        assert!(!backend.touch("fs", "r/missing", 20).unwrap());
    }

    #[test]
    fn memory_remove_if_older_respects_epoch() {
        let backend = InMemoryBackend::new();
        backend.put("blocks", "r/old", b"a", 5).unwrap();
        backend.put("blocks", "r/new", b"b", 15).unwrap();

        assert!(backend.remove_if_older("blocks", "r/old", 10).unwrap());
        assert!(!backend.remove_if_older("blocks", "r/new", 10).unwrap());
        assert!(!backend.remove_if_older("blocks", "r/new", 15).unwrap());
        assert!(!backend.remove_if_older("blocks", "r/gone", 10).unwrap());
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_list_filters_namespace_and_prefix() {
        let backend = InMemoryBackend::new();
        backend.put("blocks", "r1/b", b"", 1).unwrap();
        backend.put("blocks", "r1/a", b"", 1).unwrap();
        backend.put("blocks", "r2/a", b"", 1).unwrap();
        backend.put("fs", "r1/z", b"", 1).unwrap();

        let keys: Vec<_> = backend
            .list("blocks", "r1/")
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["r1/a".to_string(), "r1/b".to_string()]);
        assert_eq!(backend.list("blocks", "").unwrap().len(), 3);
    }

    #[test]
    fn memory_invalid_key_rejected() {
        let backend = InMemoryBackend::new();
        let result = backend.put("blocks", "../x", b"", 1);
        assert!(matches!(result, Err(StorageError::InvalidKey { .. })));
    }

    #[test]
    fn memory_corrupt_keeps_stamp() {
        let backend = InMemoryBackend::new();
        backend.put("blocks", "r/a", b"good", 3).unwrap();
        assert!(backend.corrupt("blocks", "r/a", b"bad"));
        assert_eq!(backend.get("blocks", "r/a").unwrap().unwrap(), b"bad");
        assert_eq!(backend.stat("blocks", "r/a").unwrap().unwrap().stamp, 3);
    }
}
