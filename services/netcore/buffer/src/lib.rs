//! Growable byte buffer with head-offset consumption for netcore sessions.
//!
//! A session keeps two of these: one stages bytes read from the socket until
//! the application has consumed them, the other queues bytes accepted by
//! `send` until the socket has written them.
//!
//! ## Example
//!
//! ```rust
//! use netcore_buffer::ByteBuffer;
//!
//! let mut buffer = ByteBuffer::new();
//! buffer.append(b"hello world");
//! buffer.consume(6);
//! assert_eq!(buffer.as_slice(), b"world");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;

pub use buffer::{ByteBuffer, COMPACT_THRESHOLD};
