//! # reposync testkit
//!
//! Test utilities for reposync.
//!
//! This crate provides:
//! - [`TestDepot`], in memory or over a temporary directory
//! - [`RepoBuilder`] for building trees and commit histories from file maps
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reposync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_repo() {
//!     let depot = TestDepot::memory();
//!     let mut repo = RepoBuilder::create(&depot);
//!     let head = repo.commit("master", &files(&[("README", b"hi")]));
//!     assert_complete(&depot, repo.repo(), &head);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
