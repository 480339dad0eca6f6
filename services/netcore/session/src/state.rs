//! Connection flags and strand-owned I/O state.

use netcore_buffer::ByteBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;

/// Flags observable from any thread
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    connected: AtomicBool,
    disconnect_requested: AtomicBool,
    // Server-level on_connected fired
    announced: AtomicBool,
}

impl SessionState {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Latch the disconnect request; true only for the first caller
    pub(crate) fn request_disconnect(&self) -> bool {
        !self.disconnect_requested.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::Acquire)
    }

    pub(crate) fn is_announced(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }

    pub(crate) fn set_announced(&self) {
        self.announced.store(true, Ordering::Release);
    }
}

/// State touched only from the session's strand
#[derive(Debug)]
pub(crate) struct IoState {
    /// None once the session is closed
    pub(crate) socket: Option<Arc<TcpStream>>,
    /// Retained tail between receives; taken while a read is in flight
    pub(crate) receive_buffer: ByteBuffer,
    /// Bytes handed to the current write; taken while a write is in flight
    pub(crate) send_flush: ByteBuffer,
    pub(crate) receiving: bool,
    pub(crate) sending: bool,
}

impl IoState {
    pub(crate) fn new(socket: TcpStream, chunk_size: usize) -> Self {
        Self {
            socket: Some(Arc::new(socket)),
            receive_buffer: ByteBuffer::with_capacity(chunk_size),
            send_flush: ByteBuffer::new(),
            receiving: false,
            sending: false,
        }
    }
}

/// Lock a mutex, recovering the data if a hook panicked while it was held
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
