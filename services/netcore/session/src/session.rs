//! Per-connection TCP session.
//!
//! A session owns one accepted socket. The receive loop keeps exactly one
//! read in flight and hands received bytes to [`SessionHandler::on_received`];
//! the send loop drains the pending send buffer with at most one write in
//! flight. Every completion, and every lifecycle transition, runs on the
//! session's strand. Continuations hold an `Arc<TcpSession>`, so the session
//! outlives any operation it started.

use netcore_buffer::ByteBuffer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::handler::SessionHandler;
use crate::server::TcpServer;
use crate::service::{Service, Strand};
use crate::state::{lock, IoState, SessionState};
use crate::stats::{Counters, SessionStats};
use crate::transport;

/// Receive granularity in bytes
pub const CHUNK: usize = 8192;

/// Configuration for sessions accepted by a server
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Maximum bytes requested per socket read
    pub chunk_size: usize,
    /// Maximum retained (unconsumed) receive bytes; 0 disables the check
    pub max_receive_buffer: usize,
    /// Set TCP_NODELAY on accepted sockets
    pub no_delay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK,
            max_receive_buffer: 16 * 1024 * 1024, // 16 MiB
            no_delay: true,
        }
    }
}

/// TCP session
pub struct TcpSession {
    id: Uuid,
    server: Arc<TcpServer>,
    strand: Strand,
    handler: Arc<dyn SessionHandler>,
    config: SessionConfig,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    state: SessionState,
    io: Mutex<IoState>,
    // Send lock
    send_buffer: Mutex<ByteBuffer>,
    counters: Counters,
    // Flipped to true on close; wakes in-flight reads and writes
    closed: watch::Sender<bool>,
}

impl TcpSession {
    /// Wrap an accepted socket; the server connects it afterwards
    pub(crate) fn new(
        server: Arc<TcpServer>,
        socket: TcpStream,
        handler: Arc<dyn SessionHandler>,
        config: SessionConfig,
    ) -> std::io::Result<Arc<Self>> {
        let peer_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr()?;
        socket.set_nodelay(config.no_delay)?;

        let strand = server.service().strand();
        let (closed, _) = watch::channel(false);

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            server,
            strand,
            handler,
            peer_addr,
            local_addr,
            state: SessionState::default(),
            io: Mutex::new(IoState::new(socket, config.chunk_size)),
            send_buffer: Mutex::new(ByteBuffer::new()),
            counters: Counters::default(),
            closed,
            config,
        }))
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Executor shared with the owning server
    pub fn service(&self) -> &Arc<Service> {
        self.server.service()
    }

    /// Owning server
    pub fn server(&self) -> &Arc<TcpServer> {
        &self.server
    }

    /// Strand all callbacks of this session run on
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// Underlying socket, until the session is closed
    pub fn socket(&self) -> Option<Arc<TcpStream>> {
        lock(&self.io).socket.clone()
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bytes written to the socket so far
    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes_sent()
    }

    /// Bytes read from the socket so far
    pub fn bytes_received(&self) -> u64 {
        self.counters.bytes_received()
    }

    /// Both counters at once
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Is the session connected?
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Queue bytes for sending.
    ///
    /// Returns the number of bytes queued behind the write in flight after the
    /// append, or 0 when the session is not connected or `data` is empty. Safe to call from any
    /// thread; bytes go out in the order the calls took the send lock.
    pub fn send(self: &Arc<Self>, data: &[u8]) -> usize {
        if !self.is_connected() || data.is_empty() {
            return 0;
        }

        let pending = {
            let mut buffer = lock(&self.send_buffer);
            buffer.append(data);
            buffer.len()
        };

        let session = Arc::clone(self);
        self.strand.post(move || session.try_send());
        pending
    }

    /// Queue a text string for sending
    pub fn send_text(self: &Arc<Self>, text: &str) -> usize {
        self.send(text.as_bytes())
    }

    /// Disconnect the session.
    ///
    /// Returns true for the call that initiated the disconnect, false when the
    /// session is already disconnected or disconnecting. The close itself runs
    /// on the strand, inline when called from one of this session's hooks.
    pub fn disconnect(self: &Arc<Self>) -> bool {
        self.disconnect_with(false)
    }

    /// Disconnect, forcing the close onto the strand queue when `dispatch` is set.
    ///
    /// A session whose connect is still queued only latches the request; the
    /// queued connect then drops the connection without firing any hook.
    pub(crate) fn disconnect_with(self: &Arc<Self>, dispatch: bool) -> bool {
        if !self.state.request_disconnect() {
            return false;
        }
        let connected = self.is_connected();

        let session = Arc::clone(self);
        if dispatch {
            self.strand.post(move || session.close());
        } else {
            self.strand.dispatch(move || session.close());
        }
        connected
    }

    /// Mark connected, arm the first receive and notify. Runs on the strand.
    pub(crate) fn connect(self: &Arc<Self>) {
        if self.state.is_disconnect_requested() || !self.server.is_started() {
            self.abandon();
            return;
        }

        self.state.set_connected(true);
        info!("Session {} connected from {}", self.id, self.peer_addr);

        self.try_receive();

        self.handler.on_connected(self);
        if self.is_connected() {
            self.state.set_announced();
            self.server.handler().on_connected(self);
        }
    }

    /// Whether the server-level `on_connected` fired for this session
    pub(crate) fn is_announced(&self) -> bool {
        self.state.is_announced()
    }

    // Drop a connection that was never connected; no hook fires
    fn abandon(self: &Arc<Self>) {
        debug!("Session {} with {} dropped before connecting", self.id, self.peer_addr);

        let socket = lock(&self.io).socket.take();
        if let Some(socket) = socket {
            if let Err(e) = transport::shutdown_both(&socket) {
                debug!("Session {} shutdown failed: {}", self.id, e);
            }
        }

        self.closed.send_replace(true);
        self.clear_buffers();
        self.server.unregister_session(self);
    }

    fn close(self: &Arc<Self>) {
        if !self.is_connected() {
            return;
        }

        let socket = lock(&self.io).socket.take();
        if let Some(socket) = socket {
            if let Err(e) = transport::shutdown_both(&socket) {
                if !transport::is_benign_close_error(&e) {
                    self.send_error(&SessionError::Io(e));
                }
            }
        }

        self.state.set_connected(false);
        self.closed.send_replace(true);
        self.clear_buffers();

        info!(
            "Session {} with {} disconnected (sent {} bytes, received {} bytes)",
            self.id,
            self.peer_addr,
            self.bytes_sent(),
            self.bytes_received()
        );

        self.handler.on_disconnected(self);
        self.server.unregister_session(self);
    }

    fn try_receive(self: &Arc<Self>) {
        if !self.is_connected() {
            return;
        }

        let (socket, mut buffer) = {
            let mut io = lock(&self.io);
            if io.receiving {
                return;
            }
            let Some(socket) = io.socket.clone() else {
                return;
            };
            io.receiving = true;
            (socket, std::mem::take(&mut io.receive_buffer))
        };

        let session = Arc::clone(self);
        let closed = self.closed.subscribe();
        let max = self.config.chunk_size;
        self.service().spawn(async move {
            let result = tokio::select! {
                _ = closed_signal(closed) => Err(SessionError::Aborted),
                read = transport::read_some(&socket, &mut buffer, max) => read.map_err(SessionError::from),
            };
            drop(socket);

            let strand = session.strand.clone();
            strand.post(move || session.on_receive_complete(result, buffer));
        });
    }

    fn on_receive_complete(self: &Arc<Self>, result: Result<usize, SessionError>, mut buffer: ByteBuffer) {
        lock(&self.io).receiving = false;
        if !self.is_connected() {
            return;
        }

        match result {
            Ok(0) => {
                debug!("Session {} closed by peer {}", self.id, self.peer_addr);
                self.disconnect_with(false);
            }
            Ok(received) => {
                self.counters.add_received(received);
                self.server.counters().add_received(received);
                trace!("Session {} received {} bytes", self.id, received);

                let size = buffer.len();
                let consumed = self.handler.on_received(self, buffer.as_slice()).min(size);
                buffer.consume(consumed);

                if !self.is_connected() {
                    return;
                }

                let limit = self.config.max_receive_buffer;
                if limit > 0 && buffer.len() >= limit {
                    self.send_error(&SessionError::ReceiveBufferOverflow {
                        size: buffer.len(),
                        limit,
                    });
                    self.disconnect_with(false);
                    return;
                }

                lock(&self.io).receive_buffer = buffer;
                self.try_receive();
            }
            Err(e) if e.is_aborted() => {}
            Err(e) if e.is_disconnect() => {
                debug!("Session {} receive ended: {}", self.id, e);
                self.disconnect_with(false);
            }
            Err(e) => {
                self.send_error(&e);
                self.disconnect_with(false);
            }
        }
    }

    fn try_send(self: &Arc<Self>) {
        if !self.is_connected() {
            return;
        }

        let (socket, mut flush) = {
            let mut io = lock(&self.io);
            if io.sending {
                return;
            }
            let Some(socket) = io.socket.clone() else {
                return;
            };
            io.sending = true;
            (socket, std::mem::take(&mut io.send_flush))
        };

        // Swap the queued bytes into the flush buffer; `send` keeps appending
        // to the emptied one while the write is in flight
        if flush.is_empty() {
            std::mem::swap(&mut *lock(&self.send_buffer), &mut flush);
        }
        if flush.is_empty() {
            let mut io = lock(&self.io);
            io.send_flush = flush;
            io.sending = false;
            return;
        }

        let session = Arc::clone(self);
        let closed = self.closed.subscribe();
        self.service().spawn(async move {
            let result = tokio::select! {
                _ = closed_signal(closed) => Err(SessionError::Aborted),
                written = transport::write_all(&socket, flush.as_slice()) => written
                    .map(|()| flush.len())
                    .map_err(SessionError::from),
            };
            drop(socket);

            let strand = session.strand.clone();
            strand.post(move || session.on_send_complete(result, flush));
        });
    }

    fn on_send_complete(self: &Arc<Self>, result: Result<usize, SessionError>, mut flush: ByteBuffer) {
        lock(&self.io).sending = false;
        if !self.is_connected() {
            return;
        }

        match result {
            Ok(sent) => {
                self.counters.add_sent(sent);
                self.server.counters().add_sent(sent);

                flush.consume(sent);
                let pending = flush.len() + lock(&self.send_buffer).len();
                lock(&self.io).send_flush = flush;
                trace!("Session {} sent {} bytes, {} pending", self.id, sent, pending);

                self.handler.on_sent(self, sent, pending);

                if pending > 0 {
                    self.try_send();
                }
            }
            Err(e) if e.is_aborted() => {}
            Err(e) if e.is_disconnect() => {
                debug!("Session {} send ended: {}", self.id, e);
                self.disconnect_with(false);
            }
            Err(e) => {
                self.send_error(&e);
                self.disconnect_with(false);
            }
        }
    }

    fn clear_buffers(&self) {
        {
            let mut io = lock(&self.io);
            io.receive_buffer.clear();
            io.send_flush.clear();
            io.receiving = false;
            io.sending = false;
        }
        lock(&self.send_buffer).clear();
    }

    fn send_error(self: &Arc<Self>, error: &SessionError) {
        if error.is_aborted() || error.is_disconnect() {
            return;
        }
        warn!("Session {} error ({}:{}): {}", self.id, error.category(), error.code(), error);
        self.handler
            .on_error(self, error.code(), error.category(), &error.to_string());
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        debug!("Session {} released", self.id);
    }
}

impl std::fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Resolves once the session is closed
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}
