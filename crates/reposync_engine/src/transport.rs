//! Transport abstraction.

use crate::error::{SyncError, SyncResult};
use reposync_protocol::SyncMessage;
use reposync_server::SyncServer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Carries one request to the server and brings back its response.
///
/// Implementations own framing below the message level: a socket, an HTTP
/// exchange, or a direct call into an in-process server.
pub trait SyncTransport: Send + Sync {
    /// Sends `request` and waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] or [`SyncError::NotConnected`] when
    /// the exchange fails. Failures reported by the server arrive as a
    /// [`SyncMessage::Error`] response, not as an `Err`.
    fn round_trip(&self, request: SyncMessage) -> SyncResult<SyncMessage>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    fn round_trip(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        (**self).round_trip(request)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        (**self).close()
    }
}

/// Routes requests to an in-process [`SyncServer`] through the wire codec.
///
/// Every request and response is encoded and decoded exactly as it would
/// be on a network, so tests exercise the full framing path.
#[derive(Debug)]
pub struct LoopbackTransport {
    server: Arc<SyncServer>,
    connected: AtomicBool,
    requests: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl LoopbackTransport {
    /// Creates a transport connected to `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            connected: AtomicBool::new(true),
            requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// The server behind this transport.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }

    /// Number of requests sent.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Encoded bytes sent and received.
    pub fn bytes(&self) -> (u64, u64) {
        (
            self.bytes_sent.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
        )
    }

    /// Reconnects after [`SyncTransport::close`].
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

impl SyncTransport for LoopbackTransport {
    fn round_trip(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let frame = request.encode()?;
        let response = self
            .server
            .handle_bytes(&frame)
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;

        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(response.len() as u64, Ordering::Relaxed);
        Ok(SyncMessage::decode(&response)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
