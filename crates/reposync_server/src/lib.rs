//! # reposync server
//!
//! The responding side of a sync session.
//!
//! This crate provides:
//! - Check-Tx processing (basic and v2) with version negotiation
//! - Commit, fs-object, block and branch transfer processors
//! - A session registry with forward-only phases and idle expiry
//! - Resumable chunked block uploads
//! - Authorization (HMAC-SHA256 tokens or trust-all)
//!
//! # Sessions
//!
//! Every session starts with Check-Tx and then moves through
//! `commits`, `fs`, `blocks` and `committing`. A request for an earlier phase
//! fails the session. Any processor error fails it too, and the peer sees a
//! [`SyncMessage::Error`](reposync_protocol::SyncMessage::Error) carrying
//! one [`ErrorKind`](reposync_core::ErrorKind).
//!
//! # Authentication
//!
//! ```rust,ignore
//! use reposync_server::{AuthConfig, HmacAuthorizer, Permission, ServerConfig};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//!
//! // Issue tokens for peers
//! let issuer = HmacAuthorizer::new(AuthConfig::new(secret));
//! let token = issuer.create_token("laptop", repo, Permission::ReadWrite)?;
//! ```
//!
//! # Concurrency
//!
//! Processors run on the caller's thread. Many sessions may be served at
//! once; the branch table's compare-and-swap makes concurrent uploads to one
//! branch safe, with at most one of them winning a given head.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod processor;
mod server;
mod session;
mod uploads;

pub use auth::{AllowAll, AuthConfig, Authorizer, HmacAuthorizer, Permission};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use session::{PendingChild, SessionInfo, SessionPhase, SessionRegistry};
pub use uploads::{ChunkOutcome, PartialUploads};
