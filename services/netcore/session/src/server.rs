//! TCP server owning the accept loop and the live-session registry.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::handler::ServerHandler;
use crate::service::Service;
use crate::session::{SessionConfig, TcpSession};
use crate::state::lock;
use crate::stats::{Counters, SessionStats};
use crate::transport;

/// TCP server
pub struct TcpServer {
    id: Uuid,
    service: Arc<Service>,
    address: SocketAddr,
    config: SessionConfig,
    handler: Arc<dyn ServerHandler>,
    /// Live sessions by id
    sessions: DashMap<Uuid, Arc<TcpSession>>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl TcpServer {
    /// Create a server that will listen on `address`.
    ///
    /// A `chunk_size` of 0 is raised to 1; a zero-length read would look like
    /// the peer closing the connection.
    pub fn new(
        service: Arc<Service>,
        address: SocketAddr,
        config: SessionConfig,
        handler: Arc<dyn ServerHandler>,
    ) -> Arc<Self> {
        let config = SessionConfig {
            chunk_size: config.chunk_size.max(1),
            ..config
        };
        Arc::new(Self {
            id: Uuid::new_v4(),
            service,
            address,
            config,
            handler,
            sessions: DashMap::new(),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    /// Server identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Executor shared by every session of this server
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Server hooks
    pub fn handler(&self) -> &Arc<dyn ServerHandler> {
        &self.handler
    }

    /// Configured listen address
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Session settings after validation
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bound address while started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Is the server accepting connections?
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Total bytes sent by all sessions
    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes_sent()
    }

    /// Total bytes received by all sessions
    pub fn bytes_received(&self) -> u64 {
        self.counters.bytes_received()
    }

    /// Both totals at once
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Bind the listener and start accepting; returns the bound address
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, SessionError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyStarted);
        }

        let listener = match transport::listen_tcp(self.address).await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        let bound = listener.local_addr()?;
        *lock(&self.local_addr) = Some(bound);

        let task = self
            .service
            .spawn(accept_loop(Arc::downgrade(self), listener));
        *lock(&self.accept_task) = Some(task);

        info!("Server {} listening on {}", self.id, bound);
        self.handler.on_started(self);
        Ok(bound)
    }

    /// Stop accepting and disconnect every session
    pub fn stop(self: &Arc<Self>) -> Result<(), SessionError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Err(SessionError::NotStarted);
        }

        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }
        *lock(&self.local_addr) = None;

        self.disconnect_all();

        info!("Server {} stopped", self.id);
        self.handler.on_stopped(self);
        Ok(())
    }

    /// Send bytes to every connected session; returns how many sessions got them
    pub fn multicast(&self, data: &[u8]) -> usize {
        if !self.is_started() {
            return 0;
        }
        self.live_sessions()
            .iter()
            .filter(|session| session.send(data) > 0)
            .count()
    }

    /// Queue a disconnect for every session
    pub fn disconnect_all(&self) -> bool {
        let sessions = self.live_sessions();
        for session in &sessions {
            session.disconnect_with(true);
        }
        !sessions.is_empty()
    }

    /// Look up a live session by id
    pub fn find_session(&self, id: Uuid) -> Option<Arc<TcpSession>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live sessions
    pub fn connected_sessions(&self) -> usize {
        self.sessions.len()
    }

    // Snapshot so no registry shard lock is held while sessions run hooks
    fn live_sessions(&self) -> Vec<Arc<TcpSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn accept_session(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let handler = self.handler.create_session_handler(self);
        match TcpSession::new(Arc::clone(self), stream, handler, self.config.clone()) {
            Ok(session) => {
                debug!("Accepted {} as session {}", peer, session.id());
                self.register_session(&session);

                let connecting = Arc::clone(&session);
                session.strand().post(move || connecting.connect());
            }
            Err(e) => {
                warn!("Failed to set up session for {}: {}", peer, e);
                let e = SessionError::from(e);
                self.handler.on_error(e.code(), e.category(), &e.to_string());
            }
        }
    }

    pub(crate) fn register_session(&self, session: &Arc<TcpSession>) {
        self.sessions.insert(session.id(), Arc::clone(session));
    }

    pub(crate) fn unregister_session(&self, session: &Arc<TcpSession>) {
        if self.sessions.remove(&session.id()).is_some() && session.is_announced() {
            self.handler.on_disconnected(session);
        }
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("started", &self.is_started())
            .field("sessions", &self.connected_sessions())
            .finish()
    }
}

async fn accept_loop(server: Weak<TcpServer>, listener: TcpListener) {
    loop {
        let accepted = listener.accept().await;
        let Some(server) = server.upgrade() else {
            break;
        };

        match accepted {
            Ok((stream, peer)) => server.accept_session(stream, peer),
            Err(e) => {
                error!("Accept failed on {}: {}", server.address, e);
                let e = SessionError::from(e);
                server.handler.on_error(e.code(), e.category(), &e.to_string());
            }
        }
    }
    debug!("Accept loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{start_server, wait_until, Behavior, Event};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_registry_tracks_sessions() {
        let (server, addr, mut events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        assert!(server.is_started());
        assert_eq!(server.local_addr(), Some(addr));

        let _first = transport::connect_tcp(addr).await.unwrap();
        let _second = transport::connect_tcp(addr).await.unwrap();
        let a = events.expect_connected().await;
        let b = events.expect_connected().await;

        assert_ne!(a.id(), b.id());
        assert_eq!(server.connected_sessions(), 2);
        wait_until(|| events.server_hooks.connected() == 2).await;
        assert!(Arc::ptr_eq(&server.find_session(a.id()).unwrap(), &a));
        assert!(Arc::ptr_eq(a.server(), &server));

        assert!(a.disconnect());
        assert_eq!(events.next().await, Event::Disconnected);
        wait_until(|| server.connected_sessions() == 1).await;
        wait_until(|| events.server_hooks.disconnected() == 1).await;
        assert!(server.find_session(a.id()).is_none());
        assert!(server.find_session(b.id()).is_some());
    }

    #[tokio::test]
    async fn test_multicast_reaches_every_session() {
        let (server, addr, mut events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        let mut first = transport::connect_tcp(addr).await.unwrap();
        let mut second = transport::connect_tcp(addr).await.unwrap();
        events.expect_connected().await;
        events.expect_connected().await;

        assert_eq!(server.multicast(b"news"), 2);

        for client in [&mut first, &mut second] {
            let mut buf = [0u8; 4];
            timeout(Duration::from_secs(2), client.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf, b"news");
        }
    }

    #[tokio::test]
    async fn test_stop_disconnects_all() {
        let (server, addr, mut events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        let mut client = transport::connect_tcp(addr).await.unwrap();
        let session = events.expect_connected().await;

        server.stop().unwrap();
        assert!(!server.is_started());
        assert_eq!(events.next().await, Event::Disconnected);
        assert!(!session.is_connected());
        wait_until(|| server.connected_sessions() == 0).await;

        let mut rest = Vec::new();
        timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        assert!(matches!(server.stop(), Err(SessionError::NotStarted)));
        assert_eq!(server.multicast(b"ignored"), 0);
    }

    /// Accepted connection that has not been handed to the server yet
    async fn accepted_elsewhere() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = transport::listen_tcp(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let client = transport::connect_tcp(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (stream, peer, client)
    }

    async fn expect_eof(mut client: TcpStream) {
        let mut rest = Vec::new();
        timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_stop_drops_session_still_connecting() {
        let (server, _addr, mut events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        let (stream, peer, client) = accepted_elsewhere().await;

        // Registered, but its connect job has not run yet
        server.accept_session(stream, peer);
        assert_eq!(server.connected_sessions(), 1);
        server.stop().unwrap();

        wait_until(|| server.connected_sessions() == 0).await;
        events.expect_silence().await;
        assert_eq!(events.server_hooks.connected(), 0);
        assert_eq!(events.server_hooks.disconnected(), 0);
        expect_eof(client).await;
    }

    #[tokio::test]
    async fn test_accept_after_stop_is_dropped() {
        let (server, _addr, mut events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        let (stream, peer, client) = accepted_elsewhere().await;

        server.stop().unwrap();
        server.accept_session(stream, peer);

        wait_until(|| server.connected_sessions() == 0).await;
        events.expect_silence().await;
        expect_eof(client).await;
    }

    #[tokio::test]
    async fn test_disconnect_in_on_connected_skips_server_hooks() {
        let (server, addr, mut events) =
            start_server(Behavior::DisconnectOnConnect, SessionConfig::default()).await;
        let _client = transport::connect_tcp(addr).await.unwrap();

        let session = events.expect_connected().await;
        assert_eq!(events.next().await, Event::Disconnected);
        wait_until(|| server.connected_sessions() == 0).await;
        events.expect_silence().await;

        assert!(!session.is_connected());
        assert_eq!(events.server_hooks.connected(), 0);
        assert_eq!(events.server_hooks.disconnected(), 0);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let (server, _addr, _events) =
            start_server(Behavior::Record, SessionConfig::default()).await;
        assert!(matches!(server.start().await, Err(SessionError::AlreadyStarted)));
    }
}
