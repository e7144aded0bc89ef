//! # reposync storage
//!
//! Object backend trait and implementations for reposync.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque keyed byte stores** - they do not interpret the data they hold
//! and know nothing about blocks, fs-objects, commits or branches.
//!
//! ## Design Principles
//!
//! - Values live under a `(namespace, key)` pair; keys may contain `/`
//! - Every value carries a write stamp supplied by the caller
//! - `put_if_absent` is the write-once primitive content addressing builds on
//! - `remove_if_older` is the only conditional delete, used by the collector
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - One file per value under a root directory
//!
//! ## Example
//!
//! ```rust
//! use reposync_storage::{ObjectBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! assert!(backend.put_if_absent("blocks", "repo/ab12", b"hello", 7).unwrap());
//! assert!(!backend.put_if_absent("blocks", "repo/ab12", b"hello", 8).unwrap());
//! assert_eq!(backend.get("blocks", "repo/ab12").unwrap().unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, validate_namespace, ObjectBackend, ObjectMeta};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
