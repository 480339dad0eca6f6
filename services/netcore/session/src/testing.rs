//! Recording hooks and a loopback server for tests.

use crate::handler::{ServerHandler, SessionHandler};
use crate::server::TcpServer;
use crate::service::Service;
use crate::session::{SessionConfig, TcpSession};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Hook invocation as seen by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Connected,
    Received(Vec<u8>),
    Sent { sent: usize, pending: usize },
    Error { code: i32, category: String, message: String },
    Disconnected,
}

/// What the recording handler does besides recording
#[derive(Debug, Clone, Copy)]
pub(crate) enum Behavior {
    Record,
    Echo,
    ConsumeOne,
    ConsumeNone,
    DisconnectOnReceive,
    DisconnectOnConnect,
    Greet,
}

pub(crate) struct Recorder {
    behavior: Behavior,
    events: mpsc::UnboundedSender<Event>,
    sessions: mpsc::UnboundedSender<Arc<TcpSession>>,
}

impl SessionHandler for Recorder {
    fn on_connected(&self, session: &Arc<TcpSession>) {
        let _ = self.sessions.send(Arc::clone(session));
        let _ = self.events.send(Event::Connected);
        match self.behavior {
            Behavior::Greet => {
                session.send_text("welcome\n");
            }
            Behavior::DisconnectOnConnect => {
                session.disconnect();
            }
            _ => {}
        }
    }

    fn on_disconnected(&self, _session: &Arc<TcpSession>) {
        let _ = self.events.send(Event::Disconnected);
    }

    fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) -> usize {
        let _ = self.events.send(Event::Received(data.to_vec()));
        match self.behavior {
            Behavior::Echo => {
                session.send(data);
                data.len()
            }
            Behavior::ConsumeOne => 1,
            Behavior::ConsumeNone => 0,
            Behavior::DisconnectOnReceive => {
                session.disconnect();
                data.len()
            }
            Behavior::Record | Behavior::Greet | Behavior::DisconnectOnConnect => data.len(),
        }
    }

    fn on_sent(&self, _session: &Arc<TcpSession>, sent: usize, pending: usize) {
        let _ = self.events.send(Event::Sent { sent, pending });
    }

    fn on_error(&self, _session: &Arc<TcpSession>, code: i32, category: &str, message: &str) {
        let _ = self.events.send(Event::Error {
            code,
            category: category.to_string(),
            message: message.to_string(),
        });
    }
}

/// Server-level hook counts
#[derive(Debug, Default)]
pub(crate) struct ServerHooks {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
}

impl ServerHooks {
    pub(crate) fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnected(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

struct RecorderFactory {
    behavior: Behavior,
    events: mpsc::UnboundedSender<Event>,
    sessions: mpsc::UnboundedSender<Arc<TcpSession>>,
    hooks: Arc<ServerHooks>,
}

impl ServerHandler for RecorderFactory {
    fn create_session_handler(&self, _server: &Arc<TcpServer>) -> Arc<dyn SessionHandler> {
        Arc::new(Recorder {
            behavior: self.behavior,
            events: self.events.clone(),
            sessions: self.sessions.clone(),
        })
    }

    fn on_connected(&self, _session: &Arc<TcpSession>) {
        self.hooks.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, _session: &Arc<TcpSession>) {
        self.hooks.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

/// Receiving side of the recorder channels
pub(crate) struct Events {
    events: mpsc::UnboundedReceiver<Event>,
    sessions: mpsc::UnboundedReceiver<Arc<TcpSession>>,
    pub(crate) server_hooks: Arc<ServerHooks>,
}

impl Events {
    /// Next hook invocation, failing the test after two seconds
    pub(crate) async fn next(&mut self) -> Event {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    /// Wait for `on_connected` and return the session it fired for
    pub(crate) async fn expect_connected(&mut self) -> Arc<TcpSession> {
        assert_eq!(self.next().await, Event::Connected);
        timeout(Duration::from_secs(2), self.sessions.recv())
            .await
            .expect("timed out waiting for session")
            .expect("session channel closed")
    }

    /// Assert that no hook fires for a short while
    pub(crate) async fn expect_silence(&mut self) {
        if let Ok(Some(event)) = timeout(Duration::from_millis(100), self.events.recv()).await {
            panic!("unexpected event {:?}", event);
        }
    }
}

/// Start a recording server on an ephemeral loopback port
pub(crate) async fn start_server(
    behavior: Behavior,
    config: SessionConfig,
) -> (Arc<TcpServer>, SocketAddr, Events) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (sessions_tx, sessions) = mpsc::unbounded_channel();
    let server_hooks = Arc::new(ServerHooks::default());
    let factory = RecorderFactory {
        behavior,
        events: events_tx,
        sessions: sessions_tx,
        hooks: Arc::clone(&server_hooks),
    };

    let service = Service::current().unwrap();
    let server = TcpServer::new(
        service,
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        config,
        Arc::new(factory),
    );
    let addr = server.start().await.unwrap();
    (
        server,
        addr,
        Events {
            events,
            sessions,
            server_hooks,
        },
    )
}

/// Poll `condition` until it holds, failing the test after two seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
