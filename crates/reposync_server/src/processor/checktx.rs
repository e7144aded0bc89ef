//! Check-Tx: pre-flight for a sync session.

use crate::auth::Permission;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use reposync_core::{validate_branch_name, CoreError};
use reposync_protocol::{CheckTxResponse, CheckTxV2Request, SyncMessage};

impl RequestHandler {
    /// Both Check-Tx variants end here; the basic one arrives with legacy
    /// capabilities.
    pub(crate) fn check_tx(
        &self,
        req: CheckTxV2Request,
        variant: &'static str,
    ) -> ServerResult<SyncMessage> {
        let ctx = &self.context;
        ctx.sessions.reap();
        ctx.uploads.expire();

        ctx.depot.repos().get(req.repo)?;
        let permission = ctx
            .authorizer()
            .authorize(&req.peer, req.repo, req.token.as_deref())?;
        if req.write && permission < Permission::ReadWrite {
            return Err(ServerError::NotAuthorized(format!(
                "peer {} has {} access to {}",
                req.peer, permission, req.repo
            )));
        }
        validate_branch_name(&req.branch)?;
        let negotiated = ctx.config.capabilities.negotiate(&req.capabilities)?;

        let head = match ctx.depot.branches().get(req.repo, &req.branch) {
            Some(branch) => branch.head,
            // Uploads may create the branch.
            None if req.write => None,
            None => {
                return Err(CoreError::BranchNotFound {
                    repo: req.repo,
                    branch: req.branch,
                }
                .into())
            }
        };

        let info = ctx.sessions.open(
            req.repo,
            req.branch,
            req.peer,
            permission,
            req.write,
            negotiated,
        );
        tracing::info!(
            session = %info.id,
            repo = %info.repo,
            peer = %info.peer,
            branch = %info.branch,
            variant,
            %negotiated,
            write = info.write,
            peer_head = ?req.head.map(|h| h.short()),
            head = ?head.map(|h| h.short()),
            "session opened"
        );
        Ok(SyncMessage::CheckTxAccepted(CheckTxResponse {
            session: info.id,
            commit: negotiated.commit,
            block: negotiated.block,
            head,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::processor::testing::{open, server, server_with};
    use crate::{HmacAuthorizer, AuthConfig, Permission, ServerConfig, SyncServer};
    use reposync_core::{Depot, ErrorKind, RepoId};
    use reposync_protocol::{
        BlockProtocol, Capabilities, CheckTxRequest, CheckTxV2Request, CommitProtocol, SyncMessage,
    };
    use std::sync::Arc;

    fn basic(repo: RepoId, token: Option<String>, write: bool) -> SyncMessage {
        SyncMessage::CheckTx(CheckTxRequest {
            repo,
            branch: "master".into(),
            peer: "peer-1".into(),
            head: None,
            token,
            write,
        })
    }

    fn error_kind(msg: SyncMessage) -> ErrorKind {
        match msg {
            SyncMessage::Error { kind, .. } => kind,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn basic_request_negotiates_v1() {
        let (server, repo) = server();
        match server.handle_message(basic(repo, None, false)) {
            SyncMessage::CheckTxAccepted(r) => {
                assert_eq!(r.commit, CommitProtocol::V1);
                assert_eq!(r.block, BlockProtocol::V1);
                assert_eq!(r.head, None);
                assert!(server.session(r.session).is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v2_request_negotiates_highest_common() {
        let (server, repo) = server();
        let peer = Capabilities::all().with_commit([CommitProtocol::V1, CommitProtocol::V2]);
        let r = open(&server, repo, false, peer);
        assert_eq!(r.commit, CommitProtocol::V2);
        assert_eq!(r.block, BlockProtocol::V2);
    }

    #[test]
    fn no_common_version_is_incompatible() {
        let (server, repo) = server_with(
            ServerConfig::default().with_capabilities(Capabilities::all().with_commit([CommitProtocol::V3])),
        );
        assert_eq!(
            error_kind(server.handle_message(basic(repo, None, false))),
            ErrorKind::IncompatibleVersion
        );
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn unknown_repo_is_rejected() {
        let (server, _) = server();
        assert_eq!(
            error_kind(server.handle_message(basic(RepoId::new(), None, false))),
            ErrorKind::RepoNotFound
        );
    }

    #[test]
    fn tokens_gate_access() {
        let secret = b"server-secret".to_vec();
        let depot = Arc::new(Depot::in_memory());
        let repo = RepoId::new();
        depot.create_repo(repo, false).unwrap();
        let server = SyncServer::new(ServerConfig::default().with_auth(secret.clone()), depot);
        let issuer = HmacAuthorizer::new(AuthConfig::new(secret));

        assert_eq!(
            error_kind(server.handle_message(basic(repo, None, false))),
            ErrorKind::Unauthorized
        );

        let read = issuer.create_token("peer-1", repo, Permission::Read).unwrap();
        assert!(matches!(
            server.handle_message(basic(repo, Some(read.clone()), false)),
            SyncMessage::CheckTxAccepted(_)
        ));
        assert_eq!(
            error_kind(server.handle_message(basic(repo, Some(read), true))),
            ErrorKind::Unauthorized
        );

        let write = issuer.create_token("peer-1", repo, Permission::ReadWrite).unwrap();
        assert!(matches!(
            server.handle_message(basic(repo, Some(write), true)),
            SyncMessage::CheckTxAccepted(_)
        ));
    }

    #[test]
    fn download_of_missing_branch_is_rejected() {
        let (server, repo) = server();
        let msg = SyncMessage::CheckTxV2(CheckTxV2Request {
            repo,
            branch: "feature".into(),
            peer: "peer-1".into(),
            head: None,
            token: None,
            write: false,
            capabilities: Capabilities::all(),
        });
        assert_eq!(error_kind(server.handle_message(msg)), ErrorKind::InvalidRequest);
    }
}
