//! # reposync core
//!
//! The content-addressed side of reposync: the data model, the object store,
//! the branch table and the garbage collector.
//!
//! This crate provides:
//! - [`ObjectId`] / [`RepoId`] identifiers and SHA-256 content addressing
//! - Blocks, fs-objects ([`FsObject`]) and [`Commit`]s, all write-once
//! - [`ObjectStore`] keyed per repo, with write stamps from [`HybridClock`]
//! - [`BranchTable`] with compare-and-swap head updates
//! - Commit DAG walks ([`dag`]) and path-aligned tree diffs ([`tree`])
//! - [`Depot`], the explicit context bundling all persisted state
//! - Mark-and-sweep garbage collection ([`gc`]) fenced by epoch and barrier
//!
//! ## Key Invariants
//!
//! - An object's id is always recomputable from its bytes
//! - Nothing is stored under an id that does not match its content
//! - A commit is accepted only if its parents are present or it is a
//!   shallow boundary
//! - A branch only moves by compare-and-swap, and only onto a complete tree
//! - The collector never removes an object stamped at or after its epoch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod branch;
mod clock;
pub mod dag;
mod depot;
mod error;
pub mod gc;
mod id;
mod object;
mod repo;
mod store;
pub mod tree;

pub use branch::{validate_branch_name, Branch, BranchTable, DEFAULT_BRANCH};
pub use clock::HybridClock;
pub use depot::Depot;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use id::{ObjectId, RepoId};
pub use object::{
    BlockRef, Commit, CommitBuilder, Dir, DirEntry, EntryKind, FileManifest, FsObject, ObjectKind,
};
pub use repo::{RepoInfo, RepoTable};
pub use store::{ObjectStore, StoredObject};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
