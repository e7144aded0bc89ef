//! # reposync engine
//!
//! The initiating side of a sync: drives a full transaction against a
//! server through a [`SyncTransport`].
//!
//! This crate provides:
//! - [`Orchestrator`] with upload and download of one branch
//! - Retry with exponential backoff
//! - Resumable block transfers in both directions (block protocol v2)
//! - A loopback transport running an in-process server through the codec
//!
//! ## Transaction order
//!
//! Each sync opens a session with Check-Tx and then transfers:
//! 1. Commits the receiver lacks, parents first
//! 2. Changed fs-objects, followed by a completeness check of the roots
//! 3. Missing blocks
//! 4. The head update, a compare-and-swap on the receiving branch
//!
//! ## Key Invariants
//!
//! - No object is sent that the receiver reported as present
//! - A branch only moves after everything its new head needs is stored
//! - A failed sync moves no branch; stored objects stay for the next attempt
//! - A stale head is retryable, a non-fast-forward update is not

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod download;
mod error;
mod orchestrator;
mod state;
mod transport;
mod upload;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use orchestrator::Orchestrator;
pub use state::{Direction, SyncReport, SyncState, SyncStats};
pub use transport::{LoopbackTransport, SyncTransport};
