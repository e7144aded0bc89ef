//! Object backend trait definition.

use crate::error::{StorageError, StorageResult};

/// Metadata about one stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Key within its namespace.
    pub key: String,
    /// Write stamp recorded by the last `put`/`touch`.
    pub stamp: u64,
    /// Length of the stored value in bytes.
    pub len: u64,
}

/// A low-level keyed object backend.
///
/// Backends are **opaque byte stores**. Callers decide what a namespace or a
/// key means; the backend only guarantees that a value read back is the value
/// written, and that each value carries the stamp it was written or last
/// touched with.
///
/// # Invariants
///
/// - `put_if_absent` never replaces an existing value
/// - `touch` only ever raises a stamp, never lowers it
/// - `remove_if_older` removes a value only if its stamp is strictly below
///   the given epoch at the moment of removal
/// - `list` returns entries sorted by key
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait ObjectBackend: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `data` under `key`, replacing any existing value.
    ///
    /// Used for the mutable tables (branches, repo records). Content-addressed
    /// objects go through [`ObjectBackend::put_if_absent`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn put(&self, namespace: &str, key: &str, data: &[u8], stamp: u64) -> StorageResult<()>;

    /// Stores `data` under `key` unless a value already exists.
    ///
    /// Returns `true` if the value was written, `false` if one was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn put_if_absent(
        &self,
        namespace: &str,
        key: &str,
        data: &[u8],
        stamp: u64,
    ) -> StorageResult<bool>;

    /// Returns metadata for `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn stat(&self, namespace: &str, key: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Raises the stamp of an existing value to `stamp`.
    ///
    /// Returns `false` if no value exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn touch(&self, namespace: &str, key: &str, stamp: u64) -> StorageResult<bool>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Removes the value under `key` only if its stamp is below `epoch`.
    ///
    /// Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove_if_older(&self, namespace: &str, key: &str, epoch: u64) -> StorageResult<bool>;

    /// Lists every entry in `namespace` whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is invalid or an I/O error occurs.
    fn list(&self, namespace: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>>;

    /// Makes all previously written values durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}

/// Checks that a namespace is a single, non-hidden path segment.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the problem.
pub fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.contains('/') {
        return Err(invalid(namespace, "namespace must not contain '/'"));
    }
    validate_segment(namespace, namespace)
}

/// Checks that a key is a `/`-separated list of usable path segments.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the problem.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(invalid(key, "key must not be empty"));
    }
    key.split('/')
        .try_for_each(|segment| validate_segment(key, segment))
}

fn validate_segment(whole: &str, segment: &str) -> StorageResult<()> {
    if segment.is_empty() {
        return Err(invalid(whole, "empty path segment"));
    }
    if segment.starts_with('.') {
        return Err(invalid(whole, "segment must not start with '.'"));
    }
    if segment.contains(['\\', '\0']) {
        return Err(invalid(whole, "segment contains a forbidden character"));
    }
    Ok(())
}

fn invalid(key: &str, reason: &'static str) -> StorageError {
    StorageError::InvalidKey {
        key: key.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_segments_are_valid() {
        assert!(validate_key("repo/abcdef").is_ok());
        assert!(validate_key("plain").is_ok());
    }

    #[test]
    fn traversal_and_empty_segments_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a/.hidden").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn namespace_is_single_segment() {
        assert!(validate_namespace("blocks").is_ok());
        assert!(validate_namespace("a/b").is_err());
        assert!(validate_namespace(".tmp").is_err());
    }
}
