//! Server configuration.

use reposync_protocol::Capabilities;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sessions idle longer than this are reaped.
    pub session_timeout: Duration,
    /// How long an fs-object may reference a child that has not arrived.
    pub missing_child_wait: Duration,
    /// Maximum ids or objects in one request.
    pub max_batch: usize,
    /// Largest block accepted.
    pub max_block_size: u64,
    /// Largest range served by one block v2 read.
    pub chunk_size: u64,
    /// Partial v2 uploads idle longer than this are discarded.
    pub partial_upload_expiry: Duration,
    /// Protocol versions offered to peers.
    pub capabilities: Capabilities,
    /// Secret for HMAC token validation. Without one every peer is trusted.
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of HMAC tokens.
    pub token_expiry: Duration,
    /// Whether uploads may declare shallow boundaries.
    pub shallow_uploads: bool,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            session_timeout: Duration::from_secs(300),
            missing_child_wait: Duration::from_secs(5),
            max_batch: 1000,
            max_block_size: 8 * 1024 * 1024,
            chunk_size: 256 * 1024,
            partial_upload_expiry: Duration::from_secs(3600),
            capabilities: Capabilities::all(),
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            shallow_uploads: true,
        }
    }

    /// Sets the idle session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the missing-child wait.
    pub fn with_missing_child_wait(mut self, wait: Duration) -> Self {
        self.missing_child_wait = wait;
        self
    }

    /// Sets the per-request batch limit.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = max;
        self
    }

    /// Sets the largest accepted block.
    pub fn with_max_block_size(mut self, size: u64) -> Self {
        self.max_block_size = size;
        self
    }

    /// Sets the largest v2 read range.
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the partial upload expiry.
    pub fn with_partial_upload_expiry(mut self, expiry: Duration) -> Self {
        self.partial_upload_expiry = expiry;
        self
    }

    /// Sets the offered protocol versions.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Enables token authorization with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Allows or refuses shallow boundaries in uploads.
    pub fn with_shallow_uploads(mut self, allowed: bool) -> Self {
        self.shallow_uploads = allowed;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_protocol::CommitProtocol;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_batch, 1000);
        assert!(config.auth_secret.is_none());
        assert_eq!(config.capabilities, Capabilities::all());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_batch(50)
            .with_missing_child_wait(Duration::from_millis(10))
            .with_capabilities(Capabilities::all().with_commit([CommitProtocol::V1]))
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_batch, 50);
        assert_eq!(config.missing_child_wait, Duration::from_millis(10));
        assert_eq!(config.capabilities.commit, vec![CommitProtocol::V1]);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
    }
}
