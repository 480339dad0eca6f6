//! Per-connection TCP sessions: receive/send loops, lifecycle hooks, strand executor.
//!
//! This crate provides the session core of an asynchronous TCP server. A
//! [`TcpServer`] accepts connections and wraps each one in a [`TcpSession`]
//! that reads and writes asynchronously, buffers outbound bytes from any
//! thread, and reports lifecycle events through a [`SessionHandler`].
//!
//! ## Features
//!
//! - **Receive loop**: one read in flight, unconsumed tails kept for the next chunk
//! - **Send loop**: thread-safe `send`, ordered delivery, one write in flight
//! - **Strands**: all callbacks of a session run serialized on its own strand
//! - **Orderly disconnect**: idempotent, aborts in-flight I/O, fires `on_disconnected` once
//! - **Statistics**: per-session and per-server byte counters
//!
//! ## Example
//!
//! ```rust,no_run
//! use netcore_session::{
//!     Service, ServerHandler, SessionConfig, SessionHandler, TcpServer, TcpSession,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl SessionHandler for Echo {
//!     fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) -> usize {
//!         session.send(data);
//!         data.len()
//!     }
//! }
//!
//! struct EchoServer;
//!
//! impl ServerHandler for EchoServer {
//!     fn create_session_handler(&self, _server: &Arc<TcpServer>) -> Arc<dyn SessionHandler> {
//!         Arc::new(Echo)
//!     }
//! }
//!
//! # async fn example() -> Result<(), netcore_session::SessionError> {
//! let service = Service::current()?;
//! let addr = "127.0.0.1:9000".parse().unwrap();
//! let server = TcpServer::new(service, addr, SessionConfig::default(), Arc::new(EchoServer));
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handler;
pub mod server;
pub mod service;
pub mod session;
pub mod stats;
pub mod transport;

mod state;

#[cfg(test)]
mod testing;

// Re-export main types
pub use error::SessionError;
pub use handler::{ServerHandler, SessionHandler};
pub use server::TcpServer;
pub use service::{Service, Strand};
pub use session::{SessionConfig, TcpSession, CHUNK};
pub use stats::SessionStats;
pub use transport::{connect_tcp, listen_tcp};
