//! Notification hooks for sessions and servers.
//!
//! Every hook runs on the session's strand, so hooks of one session never
//! overlap. Hooks may call back into the session (`send`, `disconnect`).

use crate::server::TcpServer;
use crate::session::TcpSession;
use std::sync::Arc;

/// Per-session notification hooks
pub trait SessionHandler: Send + Sync {
    /// Fired once, after the first receive is armed
    fn on_connected(&self, _session: &Arc<TcpSession>) {}

    /// Fired once, after the socket is closed and buffers are cleared
    fn on_disconnected(&self, _session: &Arc<TcpSession>) {}

    /// Handle another chunk of received bytes.
    ///
    /// `data` starts with whatever the previous call left unconsumed.
    /// Return how many leading bytes were handled; the rest is kept and
    /// presented again, followed by new bytes, on the next call.
    fn on_received(&self, _session: &Arc<TcpSession>, data: &[u8]) -> usize {
        data.len()
    }

    /// Fired after each completed write with the bytes written and still pending
    fn on_sent(&self, _session: &Arc<TcpSession>, _sent: usize, _pending: usize) {}

    /// Fired on socket failures other than aborts and peer closure
    fn on_error(&self, _session: &Arc<TcpSession>, _code: i32, _category: &str, _message: &str) {}
}

/// Server-level hooks and the per-connection handler factory
pub trait ServerHandler: Send + Sync {
    /// Create the hooks for a newly accepted connection
    fn create_session_handler(&self, server: &Arc<TcpServer>) -> Arc<dyn SessionHandler>;

    /// Server started accepting
    fn on_started(&self, _server: &Arc<TcpServer>) {}

    /// Server stopped accepting
    fn on_stopped(&self, _server: &Arc<TcpServer>) {}

    /// A session finished connecting
    fn on_connected(&self, _session: &Arc<TcpSession>) {}

    /// A session finished disconnecting and left the registry
    fn on_disconnected(&self, _session: &Arc<TcpSession>) {}

    /// Accept failure
    fn on_error(&self, _code: i32, _category: &str, _message: &str) {}
}
