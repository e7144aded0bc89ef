//! Peer authorization.
//!
//! Tokens are HMAC-SHA256 signed and bound to the peer identity and the
//! repo they were issued for.
//!
//! ## Token Format
//!
//! - 1 byte: permission
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over peer, repo, permission and issue time
//!
//! Total: 41 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use reposync_core::RepoId;
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 41;

/// What a peer may do with a repo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// Download only.
    Read,
    /// Download and upload with fast-forward head updates.
    ReadWrite,
    /// Everything, including forced head updates.
    Admin,
}

impl Permission {
    fn to_byte(self) -> u8 {
        match self {
            Permission::Read => 1,
            Permission::ReadWrite => 2,
            Permission::Admin => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Permission::Read),
            2 => Some(Permission::ReadWrite),
            3 => Some(Permission::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => f.write_str("read"),
            Permission::ReadWrite => f.write_str("read-write"),
            Permission::Admin => f.write_str("admin"),
        }
    }
}

/// Decides what a peer may do with a repo.
pub trait Authorizer: Send + Sync {
    /// Returns the peer's permission on `repo`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the peer has no access.
    fn authorize(&self, peer: &str, repo: RepoId, token: Option<&str>) -> ServerResult<Permission>;
}

/// Grants every peer full access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _peer: &str, _repo: RepoId, _token: Option<&str>) -> ServerResult<Permission> {
        Ok(Permission::Admin)
    }
}

/// Authorization configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a 24 hour token lifetime.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Issues and validates HMAC tokens.
#[derive(Debug, Clone)]
pub struct HmacAuthorizer {
    config: AuthConfig,
}

impl HmacAuthorizer {
    /// Creates an authorizer.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `peer` on `repo`.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC cannot be keyed.
    pub fn create_token(&self, peer: &str, repo: RepoId, permission: Permission) -> ServerResult<String> {
        self.create_token_at(peer, repo, permission, now_millis())
    }

    fn create_token_at(
        &self,
        peer: &str,
        repo: RepoId,
        permission: Permission,
        issued: u64,
    ) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.push(permission.to_byte());
        token.extend_from_slice(&issued.to_be_bytes());
        let mac = self.mac(peer, repo, &token)?.finalize().into_bytes();
        token.extend_from_slice(&mac);
        Ok(hex::encode(token))
    }

    /// Validates a token and returns the permission it grants.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for a malformed, forged,
    /// foreign or expired token.
    pub fn validate_token(&self, token: &str, peer: &str, repo: RepoId) -> ServerResult<Permission> {
        let bytes =
            hex::decode(token).map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }
        let (data, signature) = bytes.split_at(9);

        self.mac(peer, repo, data)?
            .verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let permission = Permission::from_byte(data[0])
            .ok_or_else(|| ServerError::NotAuthorized("unknown permission".into()))?;
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&data[1..9]);
        let issued = u64::from_be_bytes(issued);
        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(permission)
    }

    fn mac(&self, peer: &str, repo: RepoId, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::InvalidRequest(format!("unusable auth secret: {e}")))?;
        mac.update(peer.as_bytes());
        mac.update(&[0]);
        mac.update(repo.to_string().as_bytes());
        mac.update(&[0]);
        mac.update(data);
        Ok(mac)
    }
}

impl Authorizer for HmacAuthorizer {
    fn authorize(&self, peer: &str, repo: RepoId, token: Option<&str>) -> ServerResult<Permission> {
        let token = token.ok_or_else(|| ServerError::NotAuthorized("token required".into()))?;
        self.validate_token(token, peer, repo)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> HmacAuthorizer {
        HmacAuthorizer::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let auth = authorizer();
        let repo = RepoId::new();
        let token = auth.create_token("replica-1", repo, Permission::ReadWrite).unwrap();
        assert_eq!(token.len(), TOKEN_LEN * 2);
        assert_eq!(
            auth.authorize("replica-1", repo, Some(&token)).unwrap(),
            Permission::ReadWrite
        );
    }

    #[test]
    fn reject_wrong_peer_or_repo() {
        let auth = authorizer();
        let repo = RepoId::new();
        let token = auth.create_token("replica-1", repo, Permission::Read).unwrap();
        assert!(auth.validate_token(&token, "replica-2", repo).is_err());
        assert!(auth.validate_token(&token, "replica-1", RepoId::new()).is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let auth = authorizer();
        let repo = RepoId::new();
        let token = auth.create_token("p", repo, Permission::Read).unwrap();
        // Upgrade the permission byte without re-signing.
        let forged = format!("03{}", &token[2..]);
        let err = auth.validate_token(&forged, "p", repo).unwrap_err();
        assert!(matches!(err, ServerError::NotAuthorized(_)));
    }

    #[test]
    fn reject_expired_token() {
        let auth = HmacAuthorizer::new(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::from_secs(60)),
        );
        let repo = RepoId::new();
        let token = auth
            .create_token_at("p", repo, Permission::Read, now_millis() - 120_000)
            .unwrap();
        assert!(auth.validate_token(&token, "p", repo).is_err());
    }

    #[test]
    fn missing_token_is_unauthorized() {
        let err = authorizer().authorize("p", RepoId::new(), None).unwrap_err();
        assert_eq!(err.kind(), reposync_core::ErrorKind::Unauthorized);
    }

    #[test]
    fn allow_all_grants_admin() {
        assert_eq!(
            AllowAll.authorize("anyone", RepoId::new(), None).unwrap(),
            Permission::Admin
        );
        assert!(Permission::Admin > Permission::ReadWrite);
    }
}
