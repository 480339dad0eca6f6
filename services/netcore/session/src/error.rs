//! Session error types.

use std::io;
use thiserror::Error;

/// Errors produced by sessions, servers and the executor
#[derive(Error, Debug)]
pub enum SessionError {
    /// Underlying socket error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation cancelled by a local disconnect
    #[error("operation aborted")]
    Aborted,

    /// The application kept more unconsumed bytes than allowed
    #[error("receive buffer limit exceeded: {size} bytes retained (limit {limit})")]
    ReceiveBufferOverflow {
        /// Bytes retained after the last `on_received`
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Server was already started
    #[error("server already started")]
    AlreadyStarted,

    /// Server is not started
    #[error("server not started")]
    NotStarted,

    /// No tokio runtime is available on this thread
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl SessionError {
    /// Numeric error code passed to `on_error`
    pub fn code(&self) -> i32 {
        match self {
            SessionError::Io(e) => e.raw_os_error().unwrap_or(-1),
            SessionError::Aborted => 1,
            SessionError::ReceiveBufferOverflow { .. } => 2,
            SessionError::AlreadyStarted => 3,
            SessionError::NotStarted => 4,
            SessionError::NoRuntime => 5,
        }
    }

    /// Error category passed to `on_error`
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::Io(e) if e.raw_os_error().is_some() => "system",
            SessionError::Io(_) => "io",
            _ => "session",
        }
    }

    /// Whether this is the benign result of a local close
    pub fn is_aborted(&self) -> bool {
        matches!(self, SessionError::Aborted)
    }

    /// Whether the peer went away; such errors disconnect without `on_error`
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}
