//! Request dispatch.

use crate::auth::{AllowAll, AuthConfig, Authorizer, HmacAuthorizer};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::session::{SessionInfo, SessionPhase, SessionRegistry};
use crate::uploads::PartialUploads;
use reposync_core::Depot;
use reposync_protocol::{CheckTxV2Request, SyncMessage};
use std::sync::Arc;

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Persisted state shared with other servers, orchestrators and the
    /// collector.
    pub depot: Arc<Depot>,
    /// Live sessions.
    pub sessions: SessionRegistry,
    /// Block v2 uploads in progress.
    pub uploads: PartialUploads,
    authorizer: Arc<dyn Authorizer>,
}

impl HandlerContext {
    /// Creates a context. Peers are authorized by HMAC token when the
    /// configuration carries a secret and trusted otherwise.
    pub fn new(config: ServerConfig, depot: Arc<Depot>) -> Self {
        let authorizer: Arc<dyn Authorizer> = match &config.auth_secret {
            Some(secret) => Arc::new(HmacAuthorizer::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            None => Arc::new(AllowAll),
        };
        Self::with_authorizer(config, depot, authorizer)
    }

    /// Creates a context with a custom authorizer.
    pub fn with_authorizer(
        config: ServerConfig,
        depot: Arc<Depot>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(config.session_timeout),
            uploads: PartialUploads::new(config.partial_upload_expiry, config.max_block_size),
            config,
            depot,
            authorizer,
        }
    }

    pub(crate) fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("uploads", &self.uploads)
            .finish()
    }
}

/// Routes each request to its processor.
///
/// Processor failures become [`SyncMessage::Error`] responses and fail the
/// session the request belonged to.
#[derive(Debug)]
pub struct RequestHandler {
    pub(crate) context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a handler over `context`.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one request and returns its response.
    pub fn handle(&self, message: SyncMessage) -> SyncMessage {
        let session = message.session();
        let request = message.name();
        match self.dispatch(message) {
            Ok(response) => response,
            Err(e) => {
                let kind = e.kind();
                match session.and_then(|id| self.context.sessions.finish(id, SessionPhase::Failed)) {
                    Some(info) => tracing::warn!(
                        session = %info.id,
                        repo = %info.repo,
                        peer = %info.peer,
                        request,
                        %kind,
                        error = %e,
                        "session failed"
                    ),
                    None => tracing::warn!(request, %kind, error = %e, "request rejected"),
                }
                SyncMessage::error(kind, e.to_string())
            }
        }
    }

    fn dispatch(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::CheckTx(req) => self.check_tx(CheckTxV2Request::from_basic(req), "basic"),
            SyncMessage::CheckTxV2(req) => self.check_tx(req, "v2"),

            SyncMessage::CommitQuery { session, ids } => self.commit_query(session, &ids),
            SyncMessage::GetCommits { session, ids } => self.get_commits(session, &ids),
            SyncMessage::PutCommits {
                session,
                records,
                shallow,
            } => self.put_commits(session, &records, &shallow),

            SyncMessage::FsQuery { session, ids } => self.fs_query(session, &ids),
            SyncMessage::GetFs { session, ids } => self.get_fs(session, &ids),
            SyncMessage::PutFs { session, objects } => self.put_fs(session, &objects),
            SyncMessage::FinishFs { session, roots } => self.finish_fs(session, &roots),

            SyncMessage::BlockQuery { session, ids } => self.block_query(session, &ids),
            SyncMessage::GetBlock { session, id } => self.get_block(session, &id),
            SyncMessage::PutBlock { session, id, data } => self.put_block(session, &id, &data),
            SyncMessage::GetBlockRange {
                session,
                id,
                offset,
                len,
            } => self.get_block_range(session, &id, offset, len),
            SyncMessage::PutBlockChunk {
                session,
                id,
                offset,
                last,
                data,
            } => self.put_block_chunk(session, &id, offset, &data, last),
            SyncMessage::BlockUploadStatus { session, id } => self.block_upload_status(session, &id),

            SyncMessage::UpdateBranch {
                session,
                expected,
                new,
                force,
            } => self.update_branch(session, expected, new, force),
            SyncMessage::CloseSession { session } => self.close_session(session),
            SyncMessage::AbortSession { session, reason } => self.abort_session(session, &reason),

            other => Err(ServerError::InvalidRequest(format!(
                "{} is not a request",
                other.name()
            ))),
        }
    }

    pub(crate) fn check_batch(&self, len: usize) -> ServerResult<()> {
        let max = self.context.config.max_batch;
        if len > max {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {len} exceeds limit {max}"
            )));
        }
        Ok(())
    }
}

pub(crate) fn require_write(info: &SessionInfo) -> ServerResult<()> {
    if !info.write {
        return Err(ServerError::NotAuthorized(format!(
            "session {} was opened read-only",
            info.id
        )));
    }
    Ok(())
}
