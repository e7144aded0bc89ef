//! Sync server front end.

use crate::auth::Authorizer;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::session::SessionInfo;
use reposync_core::Depot;
use reposync_protocol::{SessionId, SyncMessage};
use std::sync::Arc;

/// The sync server.
///
/// Serves any number of concurrent sessions over a shared [`Depot`]. The
/// server is transport-agnostic: callers hand it decoded messages or raw
/// frames and send back what it returns.
///
/// # Example
///
/// ```
/// use reposync_core::{Depot, RepoId};
/// use reposync_protocol::{Capabilities, CheckTxV2Request, SyncMessage};
/// use reposync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let depot = Arc::new(Depot::in_memory());
/// let repo = RepoId::new();
/// depot.create_repo(repo, false).unwrap();
///
/// let server = SyncServer::new(ServerConfig::default(), depot);
/// let response = server.handle_message(SyncMessage::CheckTxV2(CheckTxV2Request {
///     repo,
///     branch: "master".into(),
///     peer: "laptop".into(),
///     head: None,
///     token: None,
///     write: false,
///     capabilities: Capabilities::all(),
/// }));
/// assert!(matches!(response, SyncMessage::CheckTxAccepted(_)));
/// ```
#[derive(Debug)]
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server over `depot`.
    pub fn new(config: ServerConfig, depot: Arc<Depot>) -> Self {
        Self::with_context(Arc::new(HandlerContext::new(config, depot)))
    }

    /// Creates a server with a custom authorizer.
    pub fn with_authorizer(
        config: ServerConfig,
        depot: Arc<Depot>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self::with_context(Arc::new(HandlerContext::with_authorizer(
            config, depot, authorizer,
        )))
    }

    /// Creates a server over an existing context.
    pub fn with_context(context: Arc<HandlerContext>) -> Self {
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles one request. Failures come back as [`SyncMessage::Error`].
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        self.handler.handle(message)
    }

    /// Handles one encoded request frame and returns the encoded response.
    ///
    /// An undecodable frame is answered with an error frame.
    ///
    /// # Errors
    ///
    /// Returns an error only if the response cannot be encoded.
    pub fn handle_bytes(&self, frame: &[u8]) -> ServerResult<Vec<u8>> {
        let response = match SyncMessage::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                tracing::warn!(len = frame.len(), error = %e, "undecodable frame");
                SyncMessage::error(e.kind(), e.to_string())
            }
        };
        Ok(response.encode()?)
    }

    /// The depot this server serves.
    pub fn depot(&self) -> &Arc<Depot> {
        &self.context.depot
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Snapshot of a live session.
    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.context.sessions.get(id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.context.sessions.len()
    }

    /// Drops idle sessions and expired partial uploads. Returns how many
    /// sessions were dropped.
    pub fn reap(&self) -> usize {
        let expired = self.context.uploads.expire();
        if expired > 0 {
            tracing::debug!(expired, "partial uploads expired");
        }
        self.context.sessions.reap()
    }
}
