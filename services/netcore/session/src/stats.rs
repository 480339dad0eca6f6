//! Byte counters for sessions and servers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Total bytes written to the socket
    pub bytes_sent: u64,
    /// Total bytes read from the socket
    pub bytes_received: u64,
}

/// Monotonic counters, written on the strand and readable from any thread
#[derive(Debug, Default)]
pub(crate) struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Counters {
    pub(crate) fn add_sent(&self, count: usize) {
        self.bytes_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, count: usize) {
        self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        SessionStats {
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
        }
    }
}
