//! Configuration for the sync orchestrator.

use reposync_protocol::Capabilities;
use std::time::Duration;

/// Configuration for sync sessions.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identity presented to the server.
    pub peer: String,
    /// Access token, when the server requires one.
    pub token: Option<String>,
    /// Protocol versions offered at Check-Tx.
    pub capabilities: Capabilities,
    /// Send the basic Check-Tx instead of the v2 one.
    pub basic_check_tx: bool,
    /// Maximum ids or objects per request.
    pub batch_size: usize,
    /// Chunk size for block protocol v2 transfers.
    pub chunk_size: u64,
    /// History depth; commits at this distance from the head become shallow
    /// boundaries.
    pub depth: Option<usize>,
    /// Allow non-fast-forward head updates.
    pub force: bool,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for `peer`.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            token: None,
            capabilities: Capabilities::all(),
            basic_check_tx: false,
            batch_size: 500,
            chunk_size: 256 * 1024,
            depth: None,
            force: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the offered protocol versions.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Uses the basic Check-Tx, which implies the legacy versions.
    pub fn with_basic_check_tx(mut self) -> Self {
        self.basic_check_tx = true;
        self.capabilities = Capabilities::legacy();
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the v2 chunk size.
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Limits history depth.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth.max(1));
        self
    }

    /// Allows non-fast-forward head updates.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Delay before `attempt` (0-indexed; the first attempt has none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% on top.
            Duration::from_secs_f64(delay + delay * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` drawn from the wall clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_protocol::{BlockProtocol, CommitProtocol};

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("laptop")
            .with_token("t0ken")
            .with_batch_size(0)
            .with_chunk_size(4096)
            .with_depth(5)
            .with_force(true);

        assert_eq!(config.peer, "laptop");
        assert_eq!(config.token.as_deref(), Some("t0ken"));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.depth, Some(5));
        assert!(config.force);
        assert!(!config.basic_check_tx);
    }

    #[test]
    fn basic_check_tx_offers_legacy_versions() {
        let config = SyncConfig::new("old-peer").with_basic_check_tx();
        assert!(config.basic_check_tx);
        assert_eq!(config.capabilities.commit, vec![CommitProtocol::V1]);
        assert_eq!(config.capabilities.block, vec![BlockProtocol::V1]);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
